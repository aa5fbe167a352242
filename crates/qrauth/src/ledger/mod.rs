//! nonce 账本
//!
//! 记录已使用的 nonce，直到其所属二维码的有效期结束。
//! `check_and_record` 是原子的"检查并登记"：并发提交同一个 nonce 时只有一个成功。

mod memory;
mod sqlite;

pub use memory::MemoryNonceLedger;
pub use sqlite::SqliteNonceLedger;

use crate::error::LedgerError;
use crate::payload::Nonce;
use async_trait::async_trait;
use attendix_common::metrics::NONCE_LEDGER_ENTRIES;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 账本条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    pub nonce: Nonce,
    pub first_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// nonce 账本后端
#[async_trait]
pub trait NonceLedger: Send + Sync {
    /// 原子地检查并登记 nonce
    ///
    /// 已存在且未过期时返回 [`LedgerError::NonceAlreadyUsed`]。
    /// 过期条目视为不存在，可被重新登记。
    async fn check_and_record(
        &self,
        nonce: &Nonce,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// 查询未过期的条目
    async fn get(&self, nonce: &Nonce) -> Result<Option<NonceRecord>, LedgerError>;

    /// 删除已过期的条目，返回删除数量
    async fn sweep_expired(&self) -> Result<usize, LedgerError>;

    /// 未过期条目数量
    async fn len(&self) -> Result<usize, LedgerError>;

    fn backend_name(&self) -> &'static str;
}

/// 启动后台清理任务
///
/// 按固定间隔清理过期条目并更新监控指标，`shutdown` 取消后退出。
pub fn spawn_sweeper(
    ledger: Arc<dyn NonceLedger>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Nonce ledger sweeper started (backend: {}, interval: {:?})",
            ledger.backend_name(),
            interval
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match ledger.sweep_expired().await {
                        Ok(removed) if removed > 0 => debug!("Swept {} expired nonces", removed),
                        Ok(_) => {}
                        Err(e) => warn!("Nonce ledger sweep failed: {}", e),
                    }
                    if let Ok(len) = ledger.len().await {
                        NONCE_LEDGER_ENTRIES.set(len as i64);
                    }
                }
            }
        }
        info!("Nonce ledger sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendix_common::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_and_stops() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let ledger = Arc::new(MemoryNonceLedger::new(clock.clone(), None));

        ledger
            .check_and_record(
                &Nonce::from_bytes([1; 16]),
                start + chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(11));

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(ledger.clone(), Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ledger.len().await.unwrap(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
