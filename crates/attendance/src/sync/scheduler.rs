//! 后台同步调度
//!
//! 触发来源：周期定时器、扫码后的主动触发、网络恢复。
//! 周期运行期间到达的多次触发合并为一次补跑；出现暂时性故障后按指数退避拉长定时间隔，
//! 退避期间的扫码触发推迟到退避结束，只有网络恢复会立即重试。

use super::reconciler::{SyncReconciler, SyncReport};
use attendix_common::config::SyncConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// 启动时是否认为网络可用
    pub start_online: bool,
}

impl SchedulerOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            max_backoff: config.max_backoff(),
            start_online: true,
        }
    }
}

/// 连续失败 `failures` 次后的等待时间：`interval * 2^failures`，不超过上限
pub fn backoff_delay(interval: Duration, max_backoff: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    interval
        .saturating_mul(factor)
        .min(max_backoff.max(interval))
}

struct Shared {
    notify: Notify,
    online: AtomicBool,
    /// 网络刚恢复，下一次唤醒跳过退避
    reconnected: AtomicBool,
    failures: AtomicU32,
    last_report: Mutex<Option<SyncReport>>,
}

/// 可克隆的触发器，供扫码服务等组件使用
#[derive(Clone)]
pub struct SyncTrigger {
    shared: Arc<Shared>,
}

impl SyncTrigger {
    /// 请求尽快同步；多次调用在下一个周期前合并
    ///
    /// 处于退避期时不会提前结束退避。
    pub fn trigger(&self) {
        self.shared.notify.notify_one();
    }

    /// 更新网络状态，恢复在线时立即触发一次同步
    pub fn set_online(&self, online: bool) {
        let was_online = self.shared.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("Connectivity restored, scheduling sync");
            self.shared.reconnected.store(true, Ordering::SeqCst);
            self.shared.notify.notify_one();
        } else if !online && was_online {
            info!("Connectivity lost, sync suspended");
        }
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }
}

/// 后台同步任务句柄
pub struct SyncHandle {
    trigger: SyncTrigger,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn trigger(&self) {
        self.trigger.trigger();
    }

    pub fn set_online(&self, online: bool) {
        self.trigger.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.trigger.is_online()
    }

    pub fn trigger_handle(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    /// 最近一个完成的周期
    pub fn last_report(&self) -> Option<SyncReport> {
        self.trigger
            .shared
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.trigger.shared.failures.load(Ordering::SeqCst)
    }

    /// 停止调度；正在进行的周期在下一个检查点退出
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Sync scheduler task ended abnormally: {}", e);
        }
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// 启动后台同步任务，启动后立即执行一次同步
    pub fn spawn(reconciler: Arc<SyncReconciler>, options: SchedulerOptions) -> SyncHandle {
        let shared = Arc::new(Shared {
            notify: Notify::new(),
            online: AtomicBool::new(options.start_online),
            reconnected: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            last_report: Mutex::new(None),
        });
        let cancel = CancellationToken::new();

        shared.notify.notify_one();
        let task = tokio::spawn(run_loop(
            reconciler,
            options,
            shared.clone(),
            cancel.clone(),
        ));

        SyncHandle {
            trigger: SyncTrigger { shared },
            cancel,
            task,
        }
    }
}

async fn run_loop(
    reconciler: Arc<SyncReconciler>,
    options: SchedulerOptions,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    info!(
        "Sync scheduler started (interval: {:?}, max backoff: {:?})",
        options.interval, options.max_backoff
    );

    loop {
        let failures = shared.failures.load(Ordering::SeqCst);
        let delay = backoff_delay(options.interval, options.max_backoff, failures);

        if !wait_for_next_cycle(&shared, &cancel, delay).await {
            break;
        }

        if !shared.online.load(Ordering::SeqCst) {
            debug!("Offline, skipping sync cycle");
            continue;
        }

        match reconciler.run_cycle(&cancel).await {
            Ok(report) => {
                if report.has_transient_failures() {
                    let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(
                        "Sync cycle had {} transient failures, backing off (consecutive: {})",
                        report.transient_failures, failures
                    );
                } else {
                    shared.failures.store(0, Ordering::SeqCst);
                }
                *shared
                    .last_report
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(report);
            }
            Err(e) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                warn!("Sync cycle failed: {}", e);
            }
        }
    }

    info!("Sync scheduler stopped");
}

/// 等到下一个周期该运行的时刻；取消时返回 false
///
/// 没有失败时任何触发都立即生效。有失败时只有网络恢复能跳过退避，
/// 其余触发被吸收，积压事件在退避到期时一并提交。
async fn wait_for_next_cycle(shared: &Shared, cancel: &CancellationToken, delay: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = shared.notify.notified() => {
                let reconnected = shared.reconnected.swap(false, Ordering::SeqCst);
                if reconnected || shared.failures.load(Ordering::SeqCst) == 0 {
                    debug!("Sync triggered");
                    return true;
                }
                debug!("Sync trigger deferred until backoff expires");
            }
            _ = tokio::time::sleep_until(deadline) => {
                shared.reconnected.store(false, Ordering::SeqCst);
                debug!("Sync timer fired after {:?}", delay);
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttendanceEvent, AttendanceStatus, ScanType};
    use crate::store::{EventStore, SqliteEventStore};
    use crate::sync::remote::{RemoteError, SubmitOutcome};
    use crate::sync::testing::FakeRemote;
    use chrono::Utc;
    use std::future::Future;
    use tempfile::TempDir;

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn eventually<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if cond().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn setup(remote: Arc<FakeRemote>) -> (TempDir, Arc<SqliteEventStore>, Arc<SyncReconciler>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteEventStore::open(dir.path().join("attendance.db"))
                .await
                .unwrap(),
        );
        store
            .append(&AttendanceEvent::new(
                "e-1",
                "HQ",
                Utc::now(),
                ScanType::CheckIn,
                AttendanceStatus::OnTime,
            ))
            .await
            .unwrap();
        let reconciler = Arc::new(SyncReconciler::new(
            store.clone(),
            remote,
            Duration::from_secs(3600),
        ));
        (dir, store, reconciler)
    }

    fn quiet_options(start_online: bool) -> SchedulerOptions {
        SchedulerOptions {
            interval: Duration::from_secs(3600),
            max_backoff: Duration::from_secs(7200),
            start_online,
        }
    }

    fn always_unavailable() -> FakeRemote {
        FakeRemote::new(|_| {
            Err(RemoteError::Server {
                status: 503,
                body: String::new(),
            })
        })
    }

    #[test]
    fn test_backoff_delay() {
        let interval = Duration::from_secs(60);
        let max = Duration::from_secs(900);
        assert_eq!(backoff_delay(interval, max, 0), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, max, 1), Duration::from_secs(120));
        assert_eq!(backoff_delay(interval, max, 3), Duration::from_secs(480));
        assert_eq!(backoff_delay(interval, max, 4), max);
        assert_eq!(backoff_delay(interval, max, 100), max);
        // 上限小于间隔时以间隔为准
        assert_eq!(
            backoff_delay(interval, Duration::from_secs(10), 5),
            interval
        );
    }

    #[tokio::test]
    async fn test_triggers_during_cycle_coalesce_into_one_rerun() {
        let remote = Arc::new(
            FakeRemote::new(|req| {
                Ok(SubmitOutcome::Accepted {
                    server_id: format!("srv-{}", req.event_id),
                })
            })
            .gated(),
        );
        let (_dir, store, reconciler) = setup(remote.clone()).await;
        let handle = SyncScheduler::spawn(reconciler, quiet_options(true));

        // 启动周期阻塞在远端，期间写入新事件并多次触发
        wait_until(|| remote.calls() == 1).await;
        store
            .append(&AttendanceEvent::new(
                "e-2",
                "HQ",
                Utc::now(),
                ScanType::CheckIn,
                AttendanceStatus::OnTime,
            ))
            .await
            .unwrap();
        handle.trigger();
        handle.trigger();
        handle.trigger();
        remote.open_gate();

        wait_until(|| remote.calls() == 2).await;
        eventually(|| {
            let store = store.clone();
            async move { store.list_pending().await.unwrap().is_empty() }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.calls(), 2);
        assert_eq!(handle.consecutive_failures(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_triggers_during_backoff_do_not_submit() {
        let remote = Arc::new(always_unavailable());
        let (_dir, store, reconciler) = setup(remote.clone()).await;
        let handle = SyncScheduler::spawn(reconciler, quiet_options(true));

        wait_until(|| handle.consecutive_failures() == 1).await;
        assert_eq!(remote.calls(), 1);

        for _ in 0..5 {
            handle.trigger();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(handle.consecutive_failures(), 1);
        assert_eq!(store.list_pending().await.unwrap().len(), 1);

        // 网络恢复是新的信号，立即重试
        handle.set_online(false);
        handle.set_online(true);
        wait_until(|| remote.calls() == 2).await;
        wait_until(|| handle.consecutive_failures() == 2).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_suppresses_until_connectivity_returns() {
        let remote = Arc::new(FakeRemote::new(|req| {
            Ok(SubmitOutcome::Accepted {
                server_id: format!("srv-{}", req.event_id),
            })
        }));
        let (_dir, store, reconciler) = setup(remote.clone()).await;
        let handle = SyncScheduler::spawn(reconciler, quiet_options(false));

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.calls(), 0);
        assert!(handle.last_report().is_none());

        handle.set_online(true);
        eventually(|| {
            let store = store.clone();
            async move { store.list_pending().await.unwrap().is_empty() }
        })
        .await;

        wait_until(|| handle.last_report().is_some()).await;
        let report = handle.last_report().unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(handle.consecutive_failures(), 0);

        handle.shutdown().await;
    }
}
