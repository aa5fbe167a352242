//! 统一错误处理模型
//!
//! 提供主程序 attendix 的顶层错误类型，聚合各组件 crate 的错误

use thiserror::Error;

/// 主程序的统一错误枚举
#[derive(Debug, Error)]
pub enum Error {
    // ========== 配置相关错误 ==========
    #[error("Configuration error: {0}")]
    Config(#[from] attendix_common::ConfigError),

    // ========== 组件错误 ==========
    #[error("Nonce ledger error: {0}")]
    Ledger(#[from] qrauth::LedgerError),

    #[error("Validator error: {0}")]
    Validator(#[from] qrauth::ValidatorError),

    #[error("QR decode error: {0}")]
    Decode(#[from] qrauth::DecodeError),

    #[error("QR issue error: {0}")]
    Issue(#[from] qrauth::IssueError),

    #[error("Event store error: {0}")]
    Store(#[from] attendance::StoreError),

    #[error("Scan failed: {0}")]
    Scan(#[from] attendance::ScanError),

    #[error("Sync error: {0}")]
    Sync(#[from] attendance::SyncError),

    #[error("Remote API error: {0}")]
    Remote(#[from] attendance::RemoteError),

    // ========== 系统级错误 ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    // ========== 通用错误 ==========
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("{message}")]
    Custom { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom { .. }));
        assert_eq!(err.to_string(), "test error");
    }

    #[test]
    fn test_scan_error_converts() {
        let err: Error = attendance::ScanError::Rejected(qrauth::RejectReason::NonceAlreadyUsed).into();
        assert!(matches!(err, Error::Scan(_)));
    }
}
