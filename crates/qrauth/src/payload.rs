//! 二维码载荷与 nonce 类型

use crate::codec::{MAX_BRANCH_ID_LEN, MAX_SIGNATURE_LEN, MIN_SIGNATURE_LEN};
use crate::error::DecodeError;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// nonce 字节长度
pub const NONCE_LEN: usize = 16;

/// 单次签发的随机标识，128 位
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// 生成随机 nonce（v4 UUID 的 16 字节）
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; NONCE_LEN]> for Nonce {
    fn from(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Nonce {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| DecodeError::FieldOutOfBounds {
            field: "nonce",
            len: bytes.len(),
            min: NONCE_LEN,
            max: NONCE_LEN,
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

/// 已签名的二维码载荷
///
/// 构造后不可修改。`issued_at` 只保留毫秒精度，与线上格式一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    branch_id: String,
    issued_at: DateTime<Utc>,
    nonce: Nonce,
    signature: Vec<u8>,
}

impl QrPayload {
    /// 构造载荷，并检查所有字段是否能编码为线上格式
    pub fn new(
        branch_id: impl Into<String>,
        issued_at: DateTime<Utc>,
        nonce: Nonce,
        signature: Vec<u8>,
    ) -> Result<Self, DecodeError> {
        let branch_id = branch_id.into();
        check_branch_id(&branch_id)?;

        let issued_ms = issued_at.timestamp_millis();
        if issued_ms < 0 {
            return Err(DecodeError::InvalidTimestamp(issued_ms));
        }
        let issued_at = from_millis(issued_ms).ok_or(DecodeError::InvalidTimestamp(issued_ms))?;

        if !(MIN_SIGNATURE_LEN..=MAX_SIGNATURE_LEN).contains(&signature.len()) {
            return Err(DecodeError::FieldOutOfBounds {
                field: "signature",
                len: signature.len(),
                min: MIN_SIGNATURE_LEN,
                max: MAX_SIGNATURE_LEN,
            });
        }

        Ok(Self {
            branch_id,
            issued_at,
            nonce,
            signature,
        })
    }

    /// 解码器内部使用，字段已逐一检查过
    pub(crate) fn from_checked_parts(
        branch_id: String,
        issued_at: DateTime<Utc>,
        nonce: Nonce,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            branch_id,
            issued_at,
            nonce,
            signature,
        }
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn issued_at_millis(&self) -> i64 {
        self.issued_at.timestamp_millis()
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

/// branch_id：1..=64 字节 UTF-8，不含空白与控制字符
pub(crate) fn check_branch_id(branch_id: &str) -> Result<(), DecodeError> {
    if branch_id.is_empty() || branch_id.len() > MAX_BRANCH_ID_LEN {
        return Err(DecodeError::FieldOutOfBounds {
            field: "branch_id",
            len: branch_id.len(),
            min: 1,
            max: MAX_BRANCH_ID_LEN,
        });
    }
    if branch_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DecodeError::InvalidBranchId(format!(
            "{branch_id:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// 毫秒时间戳转 UTC 时间
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
