//! SQLite nonce 账本
//!
//! 使用 sqlx 提供异步访问，记录在进程重启后仍然有效

use super::{NonceLedger, NonceRecord};
use crate::error::LedgerError;
use crate::payload::{Nonce, from_millis};
use async_trait::async_trait;
use attendix_common::Clock;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// 每登记多少次顺带清理一次过期条目
const SWEEP_CHECK_INTERVAL: u32 = 128;

pub struct SqliteNonceLedger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    insert_counter: AtomicU32,
}

impl SqliteNonceLedger {
    /// 打开（必要时创建）账本数据库
    pub async fn open<P: AsRef<Path>>(db_file: P, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        let db_file = db_file.as_ref();
        if let Some(parent) = db_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Corrupted(format!(
                    "cannot create ledger directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_file.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nonce_ledger (
                nonce BLOB PRIMARY KEY,
                first_seen_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_nonce_ledger_expires_at ON nonce_ledger(expires_at)",
        )
        .execute(&pool)
        .await?;

        debug!("Nonce ledger opened at {}", db_file.display());

        Ok(Self {
            pool,
            clock,
            insert_counter: AtomicU32::new(0),
        })
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<usize, LedgerError> {
        let result = sqlx::query("DELETE FROM nonce_ledger WHERE expires_at < ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn maybe_sweep(&self, now_ms: i64) {
        let count = self.insert_counter.fetch_add(1, Ordering::Relaxed);
        if count % SWEEP_CHECK_INTERVAL == 0 {
            match self.delete_expired(now_ms).await {
                Ok(removed) if removed > 0 => debug!("Lazily swept {} expired nonces", removed),
                Ok(_) => {}
                Err(e) => debug!("Lazy nonce sweep failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl NonceLedger for SqliteNonceLedger {
    async fn check_and_record(
        &self,
        nonce: &Nonce,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let now_ms = self.clock.now().timestamp_millis();

        // 主键冲突时只覆盖已过期的旧条目；未过期则不修改任何行
        let result = sqlx::query(
            "INSERT INTO nonce_ledger (nonce, first_seen_at, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(nonce) DO UPDATE SET
                first_seen_at = excluded.first_seen_at,
                expires_at = excluded.expires_at
             WHERE nonce_ledger.expires_at < ?",
        )
        .bind(&nonce.as_bytes()[..])
        .bind(now_ms)
        .bind(expires_at.timestamp_millis())
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NonceAlreadyUsed);
        }

        self.maybe_sweep(now_ms).await;
        Ok(())
    }

    async fn get(&self, nonce: &Nonce) -> Result<Option<NonceRecord>, LedgerError> {
        let now_ms = self.clock.now().timestamp_millis();
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT first_seen_at, expires_at FROM nonce_ledger WHERE nonce = ? AND expires_at >= ?",
        )
        .bind(&nonce.as_bytes()[..])
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(first_seen_ms, expires_ms)| {
            Ok(NonceRecord {
                nonce: *nonce,
                first_seen_at: from_millis(first_seen_ms).ok_or_else(|| {
                    LedgerError::Corrupted(format!("first_seen_at {first_seen_ms}"))
                })?,
                expires_at: from_millis(expires_ms)
                    .ok_or_else(|| LedgerError::Corrupted(format!("expires_at {expires_ms}")))?,
            })
        })
        .transpose()
    }

    async fn sweep_expired(&self) -> Result<usize, LedgerError> {
        self.delete_expired(self.clock.now().timestamp_millis()).await
    }

    async fn len(&self) -> Result<usize, LedgerError> {
        let now_ms = self.clock.now().timestamp_millis();
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM nonce_ledger WHERE expires_at >= ?")
                .bind(now_ms)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
