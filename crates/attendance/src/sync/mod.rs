//! 离线优先同步
//!
//! 每个同步周期：`Idle → Draining → Submitting → Reconciling → Idle`。
//! 网络故障只会让事件保持 Pending，下一个周期继续重试；冲突事件等待人工处理。

mod http;
mod reconciler;
mod remote;
mod scheduler;

pub use http::HttpAttendanceApi;
pub use reconciler::{SyncError, SyncPhase, SyncReconciler, SyncReport};
pub use remote::{RemoteAttendanceApi, RemoteError, SubmitOutcome, SubmitRequest};
pub use scheduler::{SchedulerOptions, SyncHandle, SyncScheduler, SyncTrigger, backoff_delay};

#[cfg(test)]
pub(crate) mod testing;
