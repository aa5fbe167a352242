//! 错误类型定义

use thiserror::Error;

/// 二维码解码错误
///
/// 均为本地错误，重试同一个码没有意义
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("payload is neither binary nor valid base64 text")]
    InvalidEncoding,

    #[error("unsupported payload version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("payload truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("{field} length {len} outside {min}..={max}")]
    FieldOutOfBounds {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("invalid branch_id: {0}")]
    InvalidBranchId(String),

    #[error("issued_at {0} is not a valid unix timestamp in milliseconds")]
    InvalidTimestamp(i64),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// nonce 账本错误
#[derive(Error, Debug)]
pub enum LedgerError {
    /// nonce 已被登记且尚未过期
    #[error("nonce already used")]
    NonceAlreadyUsed,

    /// 账本已满且所有条目都未过期，拒绝写入而不是提前淘汰
    #[error("nonce ledger is full ({capacity} unexpired entries)")]
    CapacityExhausted { capacity: usize },

    #[error("nonce ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("nonce ledger data corrupted: {0}")]
    Corrupted(String),
}

/// 校验器基础设施错误
///
/// 校验拒绝（过期、签名错误、重放等）不是错误，而是 [`crate::ValidationOutcome::Rejected`]；
/// 这里只表示无法得出结论的情况，调用方必须按"未通过"处理。
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("nonce ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

/// 签发错误
#[derive(Error, Debug)]
pub enum IssueError {
    #[error(transparent)]
    Payload(#[from] DecodeError),

    #[error("invalid signing key: {0}")]
    Key(String),
}
