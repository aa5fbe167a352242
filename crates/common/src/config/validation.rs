//! 扫码校验策略配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// nonce 账本后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// 进程内存，重启后丢失（仅适合不会在窗口期内重启的场景）
    Memory,
    /// SQLite 持久化，重启后仍能拒绝重放
    #[default]
    Sqlite,
}

/// 校验策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// 二维码签发后的有效时长（秒），默认 900（15 分钟）
    #[serde(default = "default_validity_window_secs")]
    pub validity_window_secs: u64,

    /// 签发端与扫码端之间允许的时钟偏差（秒），默认 30
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// nonce 账本后端
    #[serde(default)]
    pub ledger: LedgerBackend,

    /// 内存账本的容量上限，None 表示不限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_capacity: Option<usize>,

    /// 后台清理过期 nonce 的周期（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validity_window_secs: default_validity_window_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            ledger: LedgerBackend::default(),
            ledger_capacity: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_validity_window_secs() -> u64 {
    900
}

fn default_clock_skew_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl ValidationConfig {
    pub fn validity_window(&self) -> Duration {
        Duration::from_secs(self.validity_window_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.validity_window_secs == 0 {
            errors.push("validation.validity_window_secs must be greater than 0".to_string());
        }
        if self.clock_skew_secs > self.validity_window_secs {
            errors.push(format!(
                "Warning: validation.clock_skew_secs ({}) exceeds validity_window_secs ({})",
                self.clock_skew_secs, self.validity_window_secs
            ));
        }
        if self.ledger_capacity == Some(0) {
            errors.push("validation.ledger_capacity must be greater than 0 when set".to_string());
        }
        if self.ledger == LedgerBackend::Sqlite && self.ledger_capacity.is_some() {
            errors.push(
                "Warning: validation.ledger_capacity only applies to the memory ledger".to_string(),
            );
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_memory_ledger() {
        let config: ValidationConfig = toml::from_str(
            r#"
            validity_window_secs = 600
            ledger = "memory"
            ledger_capacity = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.validity_window(), Duration::from_secs(600));
        assert_eq!(config.clock_skew(), Duration::from_secs(30));
        assert_eq!(config.ledger, LedgerBackend::Memory);
        assert_eq!(config.ledger_capacity, Some(5000));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = ValidationConfig {
            validity_window_secs: 0,
            clock_skew_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().iter().any(|e| !e.starts_with("Warning:")));
    }
}
