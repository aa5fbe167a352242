//! 远端同步配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 同步配置
///
/// 未配置 endpoint 时设备以纯离线模式运行，事件只在本地累积
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 远端考勤 API 根地址，例如 "https://attendance.example.com/api"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// 单个事件提交的超时时间（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 周期同步间隔（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// 退避上限（秒）
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// 设备共享密钥，配置后每个请求都附带 nonce 签名凭证
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_secret: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            interval_secs: default_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            device_secret: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_backoff_secs() -> u64 {
    900
}

impl SyncConfig {
    pub fn is_enabled(&self) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|e| !e.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(endpoint) = &self.endpoint
            && !endpoint.starts_with("http://")
            && !endpoint.starts_with("https://")
        {
            errors.push(format!(
                "sync.endpoint '{endpoint}' must start with http:// or https://"
            ));
        }
        if self.timeout_secs == 0 {
            errors.push("sync.timeout_secs must be greater than 0".to_string());
        }
        if self.interval_secs == 0 {
            errors.push("sync.interval_secs must be greater than 0".to_string());
        }
        if self.max_backoff_secs < self.interval_secs {
            errors.push(format!(
                "Warning: sync.max_backoff_secs ({}) is below interval_secs ({}), backoff disabled",
                self.max_backoff_secs, self.interval_secs
            ));
        }
        if self.device_secret.as_ref().is_some_and(|s| s.trim().is_empty()) {
            errors.push("sync.device_secret cannot be empty when set".to_string());
        }

        errors
    }
}
