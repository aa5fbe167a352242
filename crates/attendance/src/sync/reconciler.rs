//! 同步协调器

use super::remote::{RemoteAttendanceApi, RemoteError, SubmitOutcome, SubmitRequest};
use crate::error::StoreError;
use crate::model::SyncState;
use crate::store::EventStore;
use attendix_common::metrics::{PENDING_EVENTS, SYNC_CYCLES, SYNC_SUBMISSIONS};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 同步周期所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Draining,
    Submitting,
    Reconciling,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Draining => "draining",
            SyncPhase::Submitting => "submitting",
            SyncPhase::Reconciling => "reconciling",
        };
        f.write_str(s)
    }
}

/// 单个同步周期的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// 本周期取出的事件数（含冲突）
    pub drained: usize,
    pub synced: usize,
    /// 本周期新产生的冲突
    pub conflicted: usize,
    /// 网络故障或超时，事件保持 Pending
    pub transient_failures: usize,
    /// 已处于冲突状态、等待人工处理的事件
    pub awaiting_review: usize,
    /// 周期被取消，剩余事件未提交
    pub cancelled: bool,
}

impl SyncReport {
    pub fn has_transient_failures(&self) -> bool {
        self.transient_failures > 0
    }

    /// 周期结束后仍为 Pending 的事件数
    pub fn still_pending(&self) -> usize {
        self.drained
            .saturating_sub(self.synced)
            .saturating_sub(self.conflicted)
            .saturating_sub(self.awaiting_review)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Event store error during sync: {0}")]
    Store(#[from] StoreError),
}

/// 同步协调器
///
/// 同一时刻只运行一个周期；并发调用 [`SyncReconciler::run_cycle`] 会排队等待。
pub struct SyncReconciler {
    store: Arc<dyn EventStore>,
    remote: Arc<dyn RemoteAttendanceApi>,
    submit_timeout: Duration,
    phase: Mutex<SyncPhase>,
    cycle: tokio::sync::Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn EventStore>,
        remote: Arc<dyn RemoteAttendanceApi>,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            submit_timeout,
            phase: Mutex::new(SyncPhase::Idle),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// 执行一个同步周期
    ///
    /// `cancel` 只在两次提交之间检查，不会中断正在进行的请求。
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let _cycle = self.cycle.lock().await;
        let result = self.drain_submit_reconcile(cancel).await;
        self.set_phase(SyncPhase::Idle);
        SYNC_CYCLES.inc();

        match &result {
            Ok(report) => {
                PENDING_EVENTS.set((report.still_pending() + report.awaiting_review) as i64);
                if report.drained > 0 {
                    info!(
                        drained = report.drained,
                        synced = report.synced,
                        conflicted = report.conflicted,
                        transient_failures = report.transient_failures,
                        awaiting_review = report.awaiting_review,
                        cancelled = report.cancelled,
                        "Sync cycle finished"
                    );
                }
            }
            Err(e) => warn!("Sync cycle aborted: {}", e),
        }
        result
    }

    async fn drain_submit_reconcile(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        self.set_phase(SyncPhase::Draining);
        let batch = self.store.list_pending().await?;
        let mut report = SyncReport {
            drained: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        self.set_phase(SyncPhase::Submitting);
        let mut results: Vec<(Uuid, Result<SubmitOutcome, RemoteError>)> = Vec::new();
        for event in &batch {
            if event.sync_state == SyncState::Conflicted {
                report.awaiting_review += 1;
                continue;
            }
            if cancel.is_cancelled() {
                debug!("Sync cycle cancelled before submitting {}", event.event_id);
                report.cancelled = true;
                break;
            }

            let request = SubmitRequest::from(event);
            let result = match tokio::time::timeout(self.submit_timeout, self.remote.submit(&request)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout),
            };
            results.push((event.event_id, result));
        }

        self.set_phase(SyncPhase::Reconciling);
        for (event_id, result) in results {
            match result {
                Ok(SubmitOutcome::Accepted { server_id }) => {
                    if self.apply(self.store.mark_synced(event_id, &server_id).await)? {
                        report.synced += 1;
                    }
                    SYNC_SUBMISSIONS.with_label_values(&["synced"]).inc();
                }
                Ok(SubmitOutcome::Conflict { reason, server_id }) => {
                    let reason = match server_id {
                        Some(id) => format!("{reason} (server_id: {id})"),
                        None => reason,
                    };
                    warn!("Event {} conflicted: {}", event_id, reason);
                    if self.apply(self.store.mark_conflicted(event_id, &reason).await)? {
                        report.conflicted += 1;
                    }
                    SYNC_SUBMISSIONS.with_label_values(&["conflicted"]).inc();
                }
                Err(e) => {
                    debug!("Event {} left pending: {}", event_id, e);
                    report.transient_failures += 1;
                    SYNC_SUBMISSIONS.with_label_values(&["transient"]).inc();
                }
            }
        }

        Ok(report)
    }

    /// 回写结果；事件在周期内被人工改动时跳过而不是中断整个周期
    fn apply(&self, result: Result<(), StoreError>) -> Result<bool, SyncError> {
        match result {
            Ok(()) => Ok(true),
            Err(e @ (StoreError::InvalidTransition { .. } | StoreError::NotFound(_))) => {
                warn!("Skipping sync write-back: {}", e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
