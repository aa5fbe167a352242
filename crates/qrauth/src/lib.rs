//! 考勤二维码校验
//!
//! 扫码得到的原始字节按以下顺序校验，任何一步失败立即返回：
//! 1. 解码（[`codec`]），格式错误不会触发任何密码学运算
//! 2. 时间窗口检查（[`policy`]）
//! 3. HMAC 签名校验（[`signer`]）
//! 4. nonce 原子登记（[`ledger`]），防止同一二维码被重复使用
//!
//! 组件之间通过构造函数显式注入，测试中可以替换任意一环。

pub mod codec;
pub mod error;
pub mod issuer;
pub mod ledger;
pub mod payload;
pub mod policy;
pub mod signer;
pub mod validator;

pub use codec::{decode, encode, encode_text};
pub use error::{DecodeError, IssueError, LedgerError, ValidatorError};
pub use issuer::QrIssuer;
pub use ledger::{MemoryNonceLedger, NonceLedger, NonceRecord, SqliteNonceLedger};
pub use payload::{NONCE_LEN, Nonce, QrPayload};
pub use policy::{PolicyBook, ValidationPolicy};
pub use signer::{KeyRing, PayloadVerifier};
pub use validator::{RejectReason, TokenValidator, ValidationOutcome};
