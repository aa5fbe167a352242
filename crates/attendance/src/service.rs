//! 扫码服务
//!
//! 串联校验、分类与持久化。整个流程不依赖网络：写入本地事件库即视为成功，
//! 之后由同步任务推送到远端。

use crate::error::ScanError;
use crate::model::{AttendanceEvent, ScanType};
use crate::recorder::AttendanceRecorder;
use crate::store::EventStore;
use crate::sync::SyncTrigger;
use attendix_common::Clock;
use qrauth::{TokenValidator, ValidationOutcome};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 扫码成功的回执
#[derive(Debug, Clone, Serialize)]
pub struct ScanReceipt {
    pub event: AttendanceEvent,
}

impl ScanReceipt {
    pub fn user_message(&self) -> String {
        format!(
            "{} {} ({})",
            self.event.employee_id, self.event.scan_type, self.event.status
        )
    }
}

pub struct ScanService {
    validator: Arc<TokenValidator>,
    recorder: AttendanceRecorder,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    sync: Option<SyncTrigger>,
}

impl ScanService {
    pub fn new(
        validator: Arc<TokenValidator>,
        recorder: AttendanceRecorder,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            validator,
            recorder,
            store,
            clock,
            sync: None,
        }
    }

    /// 写入成功后通知同步任务
    pub fn with_sync_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.sync = Some(trigger);
        self
    }

    /// 处理一次扫码
    ///
    /// 校验通过的码在写入前已经消耗了 nonce；写入失败时需要扫描新的二维码。
    pub async fn scan(
        &self,
        raw: &[u8],
        employee_id: &str,
        scan_type: ScanType,
    ) -> Result<ScanReceipt, ScanError> {
        let employee_id = employee_id.trim();
        if employee_id.is_empty() {
            return Err(ScanError::InvalidEmployee(employee_id.to_string()));
        }

        let now = self.clock.now();
        let payload = match self.validator.validate_for_branch(raw, now).await? {
            ValidationOutcome::Accepted(payload) => payload,
            ValidationOutcome::Rejected(reason) => {
                info!(employee_id, %reason, "Scan rejected");
                return Err(ScanError::Rejected(reason));
            }
        };

        let event = self
            .recorder
            .record_at(employee_id, &payload, scan_type, now);
        if let Err(e) = self.store.append(&event).await {
            warn!(
                employee_id,
                event_id = %event.event_id,
                "Failed to persist accepted scan: {}", e
            );
            return Err(e.into());
        }

        info!(
            employee_id,
            branch_id = %event.branch_id,
            event_id = %event.event_id,
            status = %event.status,
            "Scan recorded"
        );

        if let Some(sync) = &self.sync {
            sync.trigger();
        }
        Ok(ScanReceipt { event })
    }
}
