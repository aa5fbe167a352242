//! 内存 nonce 账本

use super::{NonceLedger, NonceRecord};
use crate::error::LedgerError;
use crate::payload::Nonce;
use async_trait::async_trait;
use attendix_common::Clock;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Inner {
    entries: HashMap<Nonce, NonceRecord>,
    by_expiry: BinaryHeap<Reverse<(DateTime<Utc>, Nonce)>>,
}

impl Inner {
    /// 淘汰 `expires_at < now` 的条目
    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(Reverse((expires_at, nonce))) = self.by_expiry.peek().copied() {
            if expires_at >= now {
                break;
            }
            self.by_expiry.pop();
            // 同一 nonce 过期后可能被重新登记，堆中会残留旧的到期时间
            if self
                .entries
                .get(&nonce)
                .is_some_and(|record| record.expires_at == expires_at)
            {
                self.entries.remove(&nonce);
                removed += 1;
            }
        }
        removed
    }
}

/// 进程内 nonce 账本
///
/// 重启后记录丢失，适合单进程部署或测试。设置容量上限后，
/// 账本被未过期条目填满时拒绝新的登记，不会提前淘汰仍然有效的 nonce。
pub struct MemoryNonceLedger {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    capacity: Option<usize>,
}

impl MemoryNonceLedger {
    pub fn new(clock: Arc<dyn Clock>, capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NonceLedger for MemoryNonceLedger {
    async fn check_and_record(
        &self,
        nonce: &Nonce,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.evict_expired(now);

        if inner.entries.contains_key(nonce) {
            return Err(LedgerError::NonceAlreadyUsed);
        }
        if let Some(capacity) = self.capacity
            && inner.entries.len() >= capacity
        {
            return Err(LedgerError::CapacityExhausted { capacity });
        }

        inner.entries.insert(
            *nonce,
            NonceRecord {
                nonce: *nonce,
                first_seen_at: now,
                expires_at,
            },
        );
        inner.by_expiry.push(Reverse((expires_at, *nonce)));
        Ok(())
    }

    async fn get(&self, nonce: &Nonce) -> Result<Option<NonceRecord>, LedgerError> {
        let now = self.clock.now();
        Ok(self
            .lock()
            .entries
            .get(nonce)
            .filter(|record| record.expires_at >= now)
            .cloned())
    }

    async fn sweep_expired(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        Ok(self.lock().evict_expired(now))
    }

    async fn len(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        Ok(self
            .lock()
            .entries
            .values()
            .filter(|record| record.expires_at >= now)
            .count())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendix_common::ManualClock;
    use chrono::Duration;

    fn setup(capacity: Option<usize>) -> (Arc<ManualClock>, MemoryNonceLedger) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let ledger = MemoryNonceLedger::new(clock.clone(), capacity);
        (clock, ledger)
    }

    #[tokio::test]
    async fn test_duplicate_rejected_until_expiry() {
        let (clock, ledger) = setup(None);
        let nonce = Nonce::from_bytes([9; 16]);
        let expires = clock.now() + Duration::seconds(60);

        ledger.check_and_record(&nonce, expires).await.unwrap();
        assert!(matches!(
            ledger.check_and_record(&nonce, expires).await,
            Err(LedgerError::NonceAlreadyUsed)
        ));

        // 恰好在到期时刻仍然有效
        clock.set(expires);
        assert!(matches!(
            ledger.check_and_record(&nonce, expires).await,
            Err(LedgerError::NonceAlreadyUsed)
        ));

        clock.advance(Duration::milliseconds(1));
        let later = clock.now() + Duration::seconds(60);
        ledger.check_and_record(&nonce, later).await.unwrap();
        assert_eq!(ledger.get(&nonce).await.unwrap().unwrap().expires_at, later);
    }

    #[tokio::test]
    async fn test_capacity_refuses_instead_of_evicting() {
        let (clock, ledger) = setup(Some(2));
        let expires = clock.now() + Duration::seconds(60);

        ledger
            .check_and_record(&Nonce::from_bytes([1; 16]), expires)
            .await
            .unwrap();
        ledger
            .check_and_record(&Nonce::from_bytes([2; 16]), expires)
            .await
            .unwrap();
        assert!(matches!(
            ledger
                .check_and_record(&Nonce::from_bytes([3; 16]), expires)
                .await,
            Err(LedgerError::CapacityExhausted { capacity: 2 })
        ));
        // 已登记的 nonce 仍被拒绝
        assert!(matches!(
            ledger
                .check_and_record(&Nonce::from_bytes([1; 16]), expires)
                .await,
            Err(LedgerError::NonceAlreadyUsed)
        ));

        clock.advance(Duration::seconds(61));
        ledger
            .check_and_record(&Nonce::from_bytes([3; 16]), clock.now() + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_heap_entry_does_not_evict_renewed_nonce() {
        let (clock, ledger) = setup(None);
        let nonce = Nonce::from_bytes([5; 16]);

        ledger
            .check_and_record(&nonce, clock.now() + Duration::seconds(10))
            .await
            .unwrap();
        clock.advance(Duration::seconds(11));
        ledger
            .check_and_record(&nonce, clock.now() + Duration::seconds(100))
            .await
            .unwrap();

        clock.advance(Duration::seconds(1));
        assert_eq!(ledger.sweep_expired().await.unwrap(), 0);
        assert!(ledger.get(&nonce).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_check_and_record_single_winner() {
        let (clock, ledger) = setup(None);
        let ledger = Arc::new(ledger);
        let nonce = Nonce::from_bytes([42; 16]);
        let expires = clock.now() + Duration::seconds(60);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.check_and_record(&nonce, expires).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
