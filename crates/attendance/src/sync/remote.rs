//! 远端考勤 API 抽象

use crate::model::{AttendanceEvent, AttendanceStatus, ScanType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 提交给远端的事件
///
/// `event_id` 同时作为幂等键，远端据此识别重复提交。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub event_id: Uuid,
    pub employee_id: String,
    pub branch_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl From<&AttendanceEvent> for SubmitRequest {
    fn from(event: &AttendanceEvent) -> Self {
        Self {
            event_id: event.event_id,
            employee_id: event.employee_id.clone(),
            branch_id: event.branch_id.clone(),
            occurred_at: event.occurred_at,
            scan_type: event.scan_type,
            status: event.status,
            nonce: event.nonce.clone(),
        }
    }
}

/// 远端对单个事件的权威结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 已接受（包括幂等键命中的重复提交）
    Accepted { server_id: String },
    /// 冲突或永久拒绝，事件需要人工处理
    Conflict {
        reason: String,
        server_id: Option<String>,
    },
}

/// 暂时性故障，事件保持 Pending 等待重试
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),
}

/// 远端考勤系统
#[async_trait]
pub trait RemoteAttendanceApi: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitOutcome, RemoteError>;
}
