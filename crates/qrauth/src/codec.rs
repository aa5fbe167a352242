//! 二维码载荷线上格式
//!
//! ```text
//! +---------+-----------+-----------+-----------+--------+---------+-----------+
//! | version | branch_len| branch_id | issued_at | nonce  | sig_len | signature |
//! | u8=0x01 | u8 1..=64 | UTF-8     | i64 BE ms | 16 B   | u8      | sig_len B |
//! +---------+-----------+-----------+-----------+--------+---------+-----------+
//! ```
//!
//! 文本形式为 URL-safe 无填充 base64，解码时也接受标准字母表。
//! 首字节等于版本号的输入按二进制处理，其余按文本处理。

use crate::error::DecodeError;
use crate::payload::{NONCE_LEN, Nonce, QrPayload, check_branch_id, from_millis};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

/// 当前格式版本
pub const FORMAT_VERSION: u8 = 0x01;
pub const MAX_BRANCH_ID_LEN: usize = 64;
pub const MIN_SIGNATURE_LEN: usize = 16;
pub const MAX_SIGNATURE_LEN: usize = 64;

/// 二进制形式的最大长度
pub const MAX_ENCODED_LEN: usize = 1 + 1 + MAX_BRANCH_ID_LEN + 8 + NONCE_LEN + 1 + MAX_SIGNATURE_LEN;

/// 文本形式的最大长度（带填充的 base64）
pub const MAX_TEXT_LEN: usize = MAX_ENCODED_LEN.div_ceil(3) * 4;

/// 编码为二进制形式
pub fn encode(payload: &QrPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + 1 + payload.branch_id().len() + 8 + NONCE_LEN + 1 + payload.signature().len(),
    );
    write_unsigned(
        &mut out,
        payload.branch_id(),
        payload.issued_at_millis(),
        payload.nonce(),
    );
    // QrPayload 构造时已保证签名长度在 u8 范围内
    out.push(payload.signature().len() as u8);
    out.extend_from_slice(payload.signature());
    out
}

/// 编码为 URL-safe base64 文本，用于生成二维码
pub fn encode_text(payload: &QrPayload) -> String {
    URL_SAFE_NO_PAD.encode(encode(payload))
}

/// 解码扫码得到的原始字节
///
/// 只做结构检查，不做任何密码学运算。
pub fn decode(raw: &[u8]) -> Result<QrPayload, DecodeError> {
    match raw.first() {
        None => Err(DecodeError::Empty),
        Some(&FORMAT_VERSION) => decode_binary(raw),
        Some(_) => decode_binary(&decode_text(raw)?),
    }
}

/// 签名覆盖的字段：version || branch_len || branch_id || issued_at || nonce
pub(crate) fn write_unsigned(out: &mut Vec<u8>, branch_id: &str, issued_at_ms: i64, nonce: &Nonce) {
    out.push(FORMAT_VERSION);
    out.push(branch_id.len() as u8);
    out.extend_from_slice(branch_id.as_bytes());
    out.extend_from_slice(&issued_at_ms.to_be_bytes());
    out.extend_from_slice(nonce.as_bytes());
}

fn decode_text(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if raw.len() > MAX_TEXT_LEN {
        return Err(DecodeError::TooLong {
            len: raw.len(),
            max: MAX_TEXT_LEN,
        });
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| DecodeError::InvalidEncoding)?
        .trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let engines = [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD_NO_PAD, &STANDARD];
    engines
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .ok_or(DecodeError::InvalidEncoding)
}

fn decode_binary(bytes: &[u8]) -> Result<QrPayload, DecodeError> {
    if bytes.len() > MAX_ENCODED_LEN {
        return Err(DecodeError::TooLong {
            len: bytes.len(),
            max: MAX_ENCODED_LEN,
        });
    }

    let mut reader = Reader::new(bytes);

    let version = reader.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let branch_len = reader.u8("branch_len")? as usize;
    if branch_len == 0 || branch_len > MAX_BRANCH_ID_LEN {
        return Err(DecodeError::FieldOutOfBounds {
            field: "branch_id",
            len: branch_len,
            min: 1,
            max: MAX_BRANCH_ID_LEN,
        });
    }
    let branch_id = std::str::from_utf8(reader.take(branch_len, "branch_id")?)
        .map_err(|e| DecodeError::InvalidBranchId(e.to_string()))?
        .to_string();
    check_branch_id(&branch_id)?;

    let issued_at_ms = i64::from_be_bytes(reader.array::<8>("issued_at")?);
    if issued_at_ms < 0 {
        return Err(DecodeError::InvalidTimestamp(issued_at_ms));
    }
    let issued_at = from_millis(issued_at_ms).ok_or(DecodeError::InvalidTimestamp(issued_at_ms))?;

    let nonce = Nonce::from_bytes(reader.array::<NONCE_LEN>("nonce")?);

    let sig_len = reader.u8("sig_len")? as usize;
    if !(MIN_SIGNATURE_LEN..=MAX_SIGNATURE_LEN).contains(&sig_len) {
        return Err(DecodeError::FieldOutOfBounds {
            field: "signature",
            len: sig_len,
            min: MIN_SIGNATURE_LEN,
            max: MAX_SIGNATURE_LEN,
        });
    }
    let signature = reader.take(sig_len, "signature")?.to_vec();

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    Ok(QrPayload::from_checked_parts(
        branch_id, issued_at, nonce, signature,
    ))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated { field });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }
}
