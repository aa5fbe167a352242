//! 错误处理模块
//!
//! 组件各自的领域错误定义在所属 crate 中，这里只保留跨组件共享的配置错误

mod config_error;

pub use config_error::ConfigError;

/// 配置层统一的 Result 类型
pub type Result<T> = std::result::Result<T, ConfigError>;
