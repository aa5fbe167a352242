//! SQLite 事件库
//!
//! WAL + `synchronous = FULL`：`append` 返回前事件已经持久化，进程崩溃或断电后仍可恢复

use super::EventStore;
use crate::error::StoreError;
use crate::model::{AttendanceEvent, SyncState};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "event_id, employee_id, branch_id, occurred_at, scan_type, status, \
     nonce, sync_state, server_id, conflict_reason";

type EventRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventStore").finish_non_exhaustive()
    }
}

impl SqliteEventStore {
    /// 打开（必要时创建）事件库
    pub async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self, StoreError> {
        let db_file = db_file.as_ref();
        if let Some(parent) = db_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Corrupted(format!(
                    "cannot create event store directory {}: {e}",
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

        let store = Self { pool };
        store.init().await?;

        info!(
            "Event store initialized: path={}, WAL mode, synchronous=FULL",
            db_file.display()
        );
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        // seq 保证同一时刻事件的写入顺序
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                employee_id TEXT NOT NULL,
                branch_id TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                scan_type TEXT NOT NULL,
                status TEXT NOT NULL,
                nonce TEXT,
                sync_state TEXT NOT NULL,
                server_id TEXT,
                conflict_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_employee_time ON attendance_events(employee_id, occurred_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_sync_state ON attendance_events(sync_state, occurred_at, seq)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Event store tables and indexes initialized");
        Ok(())
    }

    async fn current_state(&self, event_id: Uuid) -> Result<SyncState, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT sync_state FROM attendance_events WHERE event_id = ?")
                .bind(event_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let (state,) = row.ok_or(StoreError::NotFound(event_id))?;
        state.parse().map_err(StoreError::Corrupted)
    }

    /// 只在当前状态为 `from` 时更新；否则根据实际状态决定报错还是视为重复调用
    async fn transition(
        &self,
        event_id: Uuid,
        from: SyncState,
        to: SyncState,
        server_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE attendance_events
             SET sync_state = ?,
                 server_id = COALESCE(?, server_id),
                 conflict_reason = ?
             WHERE event_id = ? AND sync_state = ?",
        )
        .bind(to.as_str())
        .bind(server_id)
        .bind(reason)
        .bind(event_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!("Event {} moved {} -> {}", event_id, from, to);
            return Ok(());
        }

        let current = self.current_state(event_id).await?;
        if current == to {
            return Ok(());
        }
        Err(StoreError::InvalidTransition {
            event_id,
            from: current,
            to,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupted(format!("occurred_at {ms}")))
}

fn row_to_event(row: EventRow) -> Result<AttendanceEvent, StoreError> {
    let (
        event_id,
        employee_id,
        branch_id,
        occurred_at,
        scan_type,
        status,
        nonce,
        sync_state,
        server_id,
        conflict_reason,
    ) = row;

    Ok(AttendanceEvent {
        event_id: Uuid::parse_str(&event_id)
            .map_err(|e| StoreError::Corrupted(format!("event_id {event_id}: {e}")))?,
        employee_id,
        branch_id,
        occurred_at: from_millis(occurred_at)?,
        scan_type: scan_type.parse().map_err(StoreError::Corrupted)?,
        status: status.parse().map_err(StoreError::Corrupted)?,
        nonce,
        sync_state: sync_state.parse().map_err(StoreError::Corrupted)?,
        server_id,
        conflict_reason,
    })
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO attendance_events
             (event_id, employee_id, branch_id, occurred_at, scan_type, status, nonce, sync_state, server_id, conflict_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event_id.to_string())
        .bind(&event.employee_id)
        .bind(&event.branch_id)
        .bind(event.occurred_at.timestamp_millis())
        .bind(event.scan_type.as_str())
        .bind(event.status.as_str())
        .bind(event.nonce.as_deref())
        .bind(event.sync_state.as_str())
        .bind(event.server_id.as_deref())
        .bind(event.conflict_reason.as_deref())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(
                    event_id = %event.event_id,
                    employee_id = %event.employee_id,
                    "Event appended"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE") => {
                Err(StoreError::Duplicate(event.event_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pending(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM attendance_events
             WHERE sync_state IN (?, ?)
             ORDER BY occurred_at ASC, seq ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(SyncState::Pending.as_str())
            .bind(SyncState::Conflicted.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_synced(&self, event_id: Uuid, server_id: &str) -> Result<(), StoreError> {
        self.transition(
            event_id,
            SyncState::Pending,
            SyncState::Synced,
            Some(server_id),
            None,
        )
        .await
    }

    async fn mark_conflicted(&self, event_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.transition(
            event_id,
            SyncState::Pending,
            SyncState::Conflicted,
            None,
            Some(reason),
        )
        .await
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AttendanceEvent>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM attendance_events WHERE event_id = ?");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_event).transpose()
    }

    async fn history(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM attendance_events
             WHERE employee_id = ? AND occurred_at >= ? AND occurred_at < ?
             ORDER BY occurred_at ASC, seq ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(employee_id)
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn list_conflicted(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM attendance_events
             WHERE sync_state = ?
             ORDER BY occurred_at ASC, seq ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(SyncState::Conflicted.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn requeue(&self, event_id: Uuid) -> Result<(), StoreError> {
        // 重新排队时清空冲突原因
        self.transition(
            event_id,
            SyncState::Conflicted,
            SyncState::Pending,
            None,
            None,
        )
        .await?;
        info!("Event {} requeued for sync", event_id);
        Ok(())
    }
}
