//! attendix 基础设施库
//!
//! 为考勤扫码校验与同步组件提供共享的基础设施：配置、错误类型、时钟抽象与监控指标

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AttendixConfig;
pub use error::{ConfigError, Result};
