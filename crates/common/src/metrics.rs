//! Prometheus 监控指标模块
//!
//! 提供全局指标收集和导出功能

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== 扫码校验 ==========

    /// 扫码校验次数（按结果分组：accepted / expired_or_future / invalid_signature / ...）
    pub static ref SCANS_VALIDATED: IntCounterVec = IntCounterVec::new(
        Opts::new("scans_validated_total", "Total number of scanned codes validated")
            .namespace("attendix"),
        &["outcome"]
    ).unwrap();

    /// nonce 账本中未过期的条目数
    pub static ref NONCE_LEDGER_ENTRIES: IntGauge = IntGauge::new(
        "attendix_nonce_ledger_entries",
        "Number of unexpired nonces held by the replay ledger"
    ).unwrap();

    // ========== 考勤记录 ==========

    /// 考勤事件写入次数
    pub static ref EVENTS_RECORDED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_recorded_total", "Total number of attendance events recorded")
            .namespace("attendix"),
        &["scan_type", "status"]
    ).unwrap();

    // ========== 同步 ==========

    /// 同步提交结果
    pub static ref SYNC_SUBMISSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("sync_submissions_total", "Total number of event submissions to the remote API")
            .namespace("attendix"),
        &["result"]
    ).unwrap();

    /// 同步周期次数
    pub static ref SYNC_CYCLES: IntCounter = IntCounter::new(
        "attendix_sync_cycles_total",
        "Total number of completed sync cycles"
    ).unwrap();

    /// 待同步事件数（含冲突）
    pub static ref PENDING_EVENTS: IntGauge = IntGauge::new(
        "attendix_pending_events",
        "Number of events waiting for sync or review"
    ).unwrap();
}

/// 注册所有指标到全局 Registry
///
/// This function is idempotent - calling it multiple times is safe.
/// Only the first call will actually register the metrics.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(SCANS_VALIDATED.clone()))?;
            REGISTRY.register(Box::new(NONCE_LEDGER_ENTRIES.clone()))?;
            REGISTRY.register(Box::new(EVENTS_RECORDED.clone()))?;
            REGISTRY.register(Box::new(SYNC_SUBMISSIONS.clone()))?;
            REGISTRY.register(Box::new(SYNC_CYCLES.clone()))?;
            REGISTRY.register(Box::new(PENDING_EVENTS.clone()))?;
            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// 导出 Prometheus 文本格式的指标
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_register_metrics_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    #[serial]
    fn test_export_metrics() {
        let _ = register_metrics();

        PENDING_EVENTS.set(7);
        SCANS_VALIDATED.with_label_values(&["accepted"]).inc();

        let output = export_metrics();
        assert!(output.contains("attendix_pending_events 7"), "{output}");
        assert!(output.contains("attendix_scans_validated_total"), "{output}");
    }
}
