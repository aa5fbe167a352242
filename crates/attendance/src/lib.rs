//! 考勤记录与同步
//!
//! - [`recorder`]：根据排班对已校验的扫码进行分类，生成考勤事件
//! - [`store`]：本地追加式事件库，离线时同样可用
//! - [`sync`]：将本地待同步事件推送到远端并回写结果
//! - [`service`]：扫码入口，串联校验、记录与存储

pub mod absence;
pub mod error;
pub mod model;
pub mod recorder;
pub mod schedule;
pub mod service;
pub mod store;
pub mod sync;

pub use absence::AbsenceSweeper;
pub use error::{ScanError, StoreError};
pub use model::{AttendanceEvent, AttendanceStatus, ScanType, SyncState};
pub use recorder::AttendanceRecorder;
pub use schedule::{Schedule, Shift, WeeklySchedule};
pub use service::{ScanReceipt, ScanService};
pub use store::{EventStore, SqliteEventStore};
pub use sync::{
    HttpAttendanceApi, RemoteAttendanceApi, RemoteError, SubmitOutcome, SubmitRequest,
    SchedulerOptions, SyncError, SyncHandle, SyncPhase, SyncReconciler, SyncReport, SyncScheduler,
    SyncTrigger,
};
