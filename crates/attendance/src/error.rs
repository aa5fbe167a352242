//! 考勤模块错误定义

use crate::model::SyncState;
use qrauth::{RejectReason, ValidatorError};
use thiserror::Error;
use uuid::Uuid;

/// 事件库错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event {0} already exists")]
    Duplicate(Uuid),

    #[error("Event {0} not found")]
    NotFound(Uuid),

    /// 同步状态只允许 Pending → Synced / Conflicted，以及 Conflicted → Pending
    #[error("Event {event_id} cannot move from {from} to {to}")]
    InvalidTransition {
        event_id: Uuid,
        from: SyncState,
        to: SyncState,
    },

    #[error("Corrupted event row: {0}")]
    Corrupted(String),
}

/// 扫码错误
///
/// `Rejected` 是正常业务结果（同一个码重试不会成功）；
/// 其余是基础设施故障，提示用户稍后重新扫码。
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan rejected: {0}")]
    Rejected(RejectReason),

    #[error("Invalid employee id: {0:?}")]
    InvalidEmployee(String),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    /// 面向扫码用户的提示
    pub fn user_message(&self) -> &'static str {
        match self {
            ScanError::Rejected(reason) => reason.user_message(),
            ScanError::InvalidEmployee(_) => "员工编号无效",
            ScanError::Validator(_) | ScanError::Store(_) => "系统繁忙，请稍后重新扫码",
        }
    }
}
