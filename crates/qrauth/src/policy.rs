//! 时间窗口策略

use attendix_common::AttendixConfig;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// 单个门店的校验策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// 签发后的有效时长
    pub validity_window: Duration,
    /// 允许的时钟偏差（只放宽"未来时间"方向）
    pub clock_skew: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            validity_window: Duration::from_secs(15 * 60),
            clock_skew: Duration::from_secs(30),
        }
    }
}

impl ValidationPolicy {
    pub fn new(validity_window: Duration, clock_skew: Duration) -> Self {
        Self {
            validity_window,
            clock_skew,
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.validity_window.as_millis()).unwrap_or(i64::MAX)
    }

    fn skew_ms(&self) -> i64 {
        i64::try_from(self.clock_skew.as_millis()).unwrap_or(i64::MAX)
    }

    /// `issued_at <= now + skew` 且 `now - issued_at <= window`
    ///
    /// `now` 保留完整精度，窗口末尾不足 1ms 的部分同样视为过期
    pub fn is_within_window(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let skew = chrono::Duration::milliseconds(self.skew_ms());
        let window = chrono::Duration::milliseconds(self.window_ms());

        if issued_at.signed_duration_since(now) > skew {
            return false;
        }
        now.signed_duration_since(issued_at) <= window
    }

    /// nonce 在账本中的保留期限：此后该二维码无论如何都会因过期被拒绝
    pub fn nonce_expiry(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let ms = issued_at
            .timestamp_millis()
            .saturating_add(self.window_ms())
            .saturating_add(self.skew_ms());
        crate::payload::from_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// 按门店查询策略，未单独配置的门店使用默认策略
#[derive(Debug, Clone, Default)]
pub struct PolicyBook {
    default: ValidationPolicy,
    per_branch: HashMap<String, ValidationPolicy>,
}

impl PolicyBook {
    pub fn new(default: ValidationPolicy) -> Self {
        Self {
            default,
            per_branch: HashMap::new(),
        }
    }

    pub fn with_branch(mut self, branch_id: impl Into<String>, policy: ValidationPolicy) -> Self {
        self.per_branch.insert(branch_id.into(), policy);
        self
    }

    pub fn default_policy(&self) -> &ValidationPolicy {
        &self.default
    }

    pub fn policy_for(&self, branch_id: &str) -> &ValidationPolicy {
        self.per_branch.get(branch_id).unwrap_or(&self.default)
    }

    /// 全局策略加上各门店的覆盖项
    pub fn from_config(config: &AttendixConfig) -> Self {
        let default = ValidationPolicy::new(
            config.validation.validity_window(),
            config.validation.clock_skew(),
        );
        let mut book = Self::new(default);
        for branch in &config.branches {
            if branch.validity_window_secs.is_none() && branch.clock_skew_secs.is_none() {
                continue;
            }
            let policy = ValidationPolicy::new(
                branch
                    .validity_window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default.validity_window),
                branch
                    .clock_skew_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default.clock_skew),
            );
            book.per_branch.insert(branch.branch_id.clone(), policy);
        }
        book
    }
}
