//! 本地事件库
//!
//! 追加式存储：事件一旦写入就不会被删除，只有同步状态字段会变化。

mod sqlite;

pub use sqlite::SqliteEventStore;

use crate::error::StoreError;
use crate::model::AttendanceEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 事件库接口
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加事件；返回 `Ok` 时事件已落盘
    async fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError>;

    /// 待同步与冲突事件，按发生时间升序，同一时刻按写入顺序
    async fn list_pending(&self) -> Result<Vec<AttendanceEvent>, StoreError>;

    /// Pending → Synced；对已同步事件重复调用不报错
    async fn mark_synced(&self, event_id: Uuid, server_id: &str) -> Result<(), StoreError>;

    /// Pending → Conflicted
    async fn mark_conflicted(&self, event_id: Uuid, reason: &str) -> Result<(), StoreError>;

    async fn get(&self, event_id: Uuid) -> Result<Option<AttendanceEvent>, StoreError>;

    /// 员工在 `[from, to)` 区间内的事件，按发生时间升序
    async fn history(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>, StoreError>;

    /// 等待人工处理的冲突事件
    async fn list_conflicted(&self) -> Result<Vec<AttendanceEvent>, StoreError>;

    /// Conflicted → Pending，人工处理后重新进入同步队列
    async fn requeue(&self, event_id: Uuid) -> Result<(), StoreError>;
}
