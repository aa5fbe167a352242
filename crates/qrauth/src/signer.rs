//! HMAC-SHA256 签名与密钥环
//!
//! 签名消息带有域分隔前缀，避免同一密钥在其它用途上的签名被当作二维码签名接受。
//! 校验使用 `verify_slice`，比较过程为常量时间。

use crate::codec::write_unsigned;
use crate::payload::{Nonce, QrPayload};
use attendix_common::config::BranchConfig;
use attendix_common::error::ConfigError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const DOMAIN_TAG: &[u8] = b"attendix-qr-v1";

/// HMAC-SHA256 输出长度
pub const SIGNATURE_LEN: usize = 32;

/// 构造签名消息
pub fn signing_message(branch_id: &str, issued_at_ms: i64, nonce: &Nonce) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_TAG.len() + 2 + branch_id.len() + 8 + 16);
    message.extend_from_slice(DOMAIN_TAG);
    write_unsigned(&mut message, branch_id, issued_at_ms, nonce);
    message
}

/// 载荷对应的签名消息（不含签名本身）
pub fn payload_message(payload: &QrPayload) -> Vec<u8> {
    signing_message(
        payload.branch_id(),
        payload.issued_at_millis(),
        payload.nonce(),
    )
}

/// 计算签名
pub fn sign(message: &[u8], secret: &[u8]) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// 常量时间校验签名
pub fn verify(message: &[u8], signature: &[u8], secret: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}

/// 载荷签名校验接口
///
/// 由校验器持有，测试中可以替换为固定结果的实现。
pub trait PayloadVerifier: Send + Sync {
    /// 签名是否由该门店的某个有效密钥生成
    fn verify(&self, payload: &QrPayload) -> bool;
}

/// 门店密钥环
///
/// 每个门店可以同时持有多把密钥，用于密钥轮换：第一把用于签发，所有密钥都可用于校验。
#[derive(Clone, Default)]
pub struct KeyRing {
    branches: HashMap<String, Vec<Vec<u8>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从门店配置加载全部密钥
    pub fn from_config(branches: &[BranchConfig]) -> Result<Self, ConfigError> {
        let mut ring = Self::new();
        for branch in branches {
            for secret in branch.load_secrets()? {
                ring.insert(&branch.branch_id, secret);
            }
        }
        Ok(ring)
    }

    /// 添加一把密钥，已存在的密钥会被保留
    pub fn insert(&mut self, branch_id: &str, secret: Vec<u8>) {
        let secrets = self.branches.entry(branch_id.to_string()).or_default();
        if !secrets.contains(&secret) {
            secrets.push(secret);
        }
    }

    pub fn with_secret(mut self, branch_id: &str, secret: impl Into<Vec<u8>>) -> Self {
        self.insert(branch_id, secret.into());
        self
    }

    pub fn contains(&self, branch_id: &str) -> bool {
        self.branches.contains_key(branch_id)
    }

    /// 签发用密钥
    pub fn primary_secret(&self, branch_id: &str) -> Option<&[u8]> {
        self.branches
            .get(branch_id)
            .and_then(|secrets| secrets.first())
            .map(Vec::as_slice)
    }

    pub fn branch_ids(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }
}

impl PayloadVerifier for KeyRing {
    fn verify(&self, payload: &QrPayload) -> bool {
        let Some(secrets) = self.branches.get(payload.branch_id()) else {
            return false;
        };
        let message = payload_message(payload);
        // 不提前返回，命中哪把密钥不影响耗时
        secrets.iter().fold(false, |matched, secret| {
            matched | verify(&message, payload.signature(), secret)
        })
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (branch, secrets) in &self.branches {
            map.entry(branch, &format_args!("<{} secrets>", secrets.len()));
        }
        map.finish()
    }
}
