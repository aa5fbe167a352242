//! 考勤事件模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 扫码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    CheckIn,
    CheckOut,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::CheckIn => "check_in",
            ScanType::CheckOut => "check_out",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "check_in" | "in" => Ok(ScanType::CheckIn),
            "check_out" | "out" => Ok(ScanType::CheckOut),
            other => Err(format!("unknown scan type '{other}'")),
        }
    }
}

/// 考勤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    OnTime,
    Late,
    /// 早于上班时间减宽限期签到
    Early,
    /// 早于下班时间减宽限期签退
    EarlyDeparture,
    /// 由缺勤推断生成
    Absent,
    /// 当天没有排班
    Unscheduled,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::OnTime => "on_time",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Early => "early",
            AttendanceStatus::EarlyDeparture => "early_departure",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Unscheduled => "unscheduled",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "on_time" => AttendanceStatus::OnTime,
            "late" => AttendanceStatus::Late,
            "early" => AttendanceStatus::Early,
            "early_departure" => AttendanceStatus::EarlyDeparture,
            "absent" => AttendanceStatus::Absent,
            "unscheduled" => AttendanceStatus::Unscheduled,
            other => return Err(format!("unknown attendance status '{other}'")),
        })
    }
}

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Synced,
    /// 远端拒绝或冲突，等待人工处理
    Conflicted,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => SyncState::Pending,
            "synced" => SyncState::Synced,
            "conflicted" => SyncState::Conflicted,
            other => return Err(format!("unknown sync state '{other}'")),
        })
    }
}

/// 考勤事件
///
/// 事件本身是不可变的事实；只有同步相关字段（`sync_state`、`server_id`、
/// `conflict_reason`）会被同步流程通过事件库更新。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    /// 客户端生成的全局唯一 ID，同时作为远端幂等键
    pub event_id: Uuid,
    pub employee_id: String,
    pub branch_id: String,
    /// 设备扫码时刻（不是二维码签发时刻）
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub status: AttendanceStatus,
    /// 对应二维码的 nonce（hex），推断生成的缺勤事件为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub sync_state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<String>,
}

impl AttendanceEvent {
    /// 新建待同步事件
    pub fn new(
        employee_id: impl Into<String>,
        branch_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        scan_type: ScanType,
        status: AttendanceStatus,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            employee_id: employee_id.into(),
            branch_id: branch_id.into(),
            occurred_at,
            scan_type,
            status,
            nonce: None,
            sync_state: SyncState::Pending,
            server_id: None,
            conflict_reason: None,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Pending
    }
}
