//! 分支签名密钥配置
//!
//! 每个分支可以配置多个共享密钥以支持密钥轮转：签发端换用新密钥后，
//! 扫码端在旧码全部过期前同时接受新旧两把密钥

use crate::error::ConfigError;
use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// 最短密钥长度（字节）
pub const MIN_SECRET_LEN: usize = 16;

/// 分支 ID 最大长度，与二维码线格式的上限一致
pub const MAX_BRANCH_ID_LEN: usize = 64;

/// 密钥来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// 直接写在配置文件中
    Direct(Vec<String>),
    /// 从环境变量读取，多把密钥以逗号分隔
    Environment(String),
    /// 从文件读取，每行一把密钥
    File(String),
}

/// 分支配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BranchConfig {
    /// 分支 ID，必须与二维码中的 branch_id 完全一致
    pub branch_id: String,

    /// 直接配置的密钥（hex 或 base64）
    ///
    /// 直接在配置文件中存储密钥不够安全，生产环境建议使用 secret_env 或 secret_file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// 密钥环境变量名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    /// 密钥文件路径，文件权限应设置为 600
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_file: Option<String>,

    /// 覆盖全局有效时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window_secs: Option<u64>,

    /// 覆盖全局时钟偏差（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_skew_secs: Option<u64>,
}

impl BranchConfig {
    /// 获取密钥源
    ///
    /// 优先级: secret_file > secret_env > secrets
    pub fn secret_source(&self) -> Option<SecretSource> {
        if let Some(path) = &self.secret_file {
            return Some(SecretSource::File(path.clone()));
        }
        if let Some(var) = &self.secret_env {
            return Some(SecretSource::Environment(var.clone()));
        }
        if !self.secrets.is_empty() {
            return Some(SecretSource::Direct(self.secrets.clone()));
        }
        None
    }

    /// 加载并解码该分支的全部密钥
    pub fn load_secrets(&self) -> Result<Vec<Vec<u8>>, ConfigError> {
        let encoded: Vec<String> = match self.secret_source() {
            Some(SecretSource::Direct(list)) => list,
            Some(SecretSource::Environment(var)) => std::env::var(&var)
                .map_err(|_| ConfigError::EnvError { var: var.clone() })?
                .split(',')
                .map(str::to_string)
                .collect(),
            Some(SecretSource::File(path)) => std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?
                .lines()
                .map(str::to_string)
                .collect(),
            None => {
                return Err(ConfigError::MissingField {
                    field: format!("branches[{}].secrets", self.branch_id),
                });
            }
        };

        let secrets = encoded
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                decode_secret(s).map_err(|reason| ConfigError::InvalidSecret {
                    branch_id: self.branch_id.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if secrets.is_empty() {
            return Err(ConfigError::InvalidSecret {
                branch_id: self.branch_id.clone(),
                reason: "no secrets found in configured source".to_string(),
            });
        }

        Ok(secrets)
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let id = &self.branch_id;

        if id.is_empty() || id.len() > MAX_BRANCH_ID_LEN {
            errors.push(format!(
                "branch_id '{id}' must be 1..={MAX_BRANCH_ID_LEN} bytes long"
            ));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            errors.push(format!(
                "branch_id '{id}' must not contain whitespace or control characters"
            ));
        }

        match self.secret_source() {
            None => errors.push(format!(
                "Branch '{id}' has no secrets, secret_env or secret_file"
            )),
            Some(SecretSource::Direct(list)) => {
                for (i, s) in list.iter().enumerate() {
                    if let Err(reason) = decode_secret(s.trim()) {
                        errors.push(format!("Branch '{id}' secrets[{i}]: {reason}"));
                    }
                }
            }
            // 环境变量与文件只在加载时才能检查
            Some(_) => {}
        }

        if self.validity_window_secs == Some(0) {
            errors.push(format!(
                "Branch '{id}' validity_window_secs must be greater than 0"
            ));
        }

        errors
    }
}

/// 解码密钥字符串
///
/// 支持两种格式：
/// - 偶数长度的十六进制字符串
/// - Base64 字符串（标准字母表）
///
/// 解码后至少需要 [`MIN_SECRET_LEN`] 字节
pub fn decode_secret(encoded: &str) -> Result<Vec<u8>, String> {
    let bytes = if encoded.len() % 2 == 0 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        hex::decode(encoded).map_err(|e| format!("invalid hex secret: {e}"))?
    } else {
        BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| format!("secret is neither hex nor base64: {e}"))?
    };

    if bytes.len() < MIN_SECRET_LEN {
        return Err(format!(
            "secret too short: {} bytes, need at least {MIN_SECRET_LEN}",
            bytes.len()
        ));
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_decode_secret_formats() {
        let hex_secret = "000102030405060708090a0b0c0d0e0f";
        assert_eq!(decode_secret(hex_secret).unwrap().len(), 16);

        let b64 = BASE64_STANDARD.encode([7u8; 32]);
        assert_eq!(decode_secret(&b64).unwrap(), vec![7u8; 32]);

        assert!(decode_secret("abcd").is_err());
        assert!(decode_secret("not a secret!").is_err());
    }

    #[test]
    fn test_secret_source_priority() {
        let mut branch = BranchConfig {
            branch_id: "hq".to_string(),
            secrets: vec!["00".repeat(16)],
            ..Default::default()
        };
        assert!(matches!(
            branch.secret_source(),
            Some(SecretSource::Direct(_))
        ));

        branch.secret_env = Some("HQ_SECRET".to_string());
        assert_eq!(
            branch.secret_source(),
            Some(SecretSource::Environment("HQ_SECRET".to_string()))
        );

        branch.secret_file = Some("/etc/attendix/hq.key".to_string());
        assert_eq!(
            branch.secret_source(),
            Some(SecretSource::File("/etc/attendix/hq.key".to_string()))
        );
    }

    #[test]
    fn test_load_secrets_from_file_supports_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hq.key");
        std::fs::write(&path, format!("{}\n\n{}\n", "11".repeat(32), "22".repeat(32))).unwrap();

        let branch = BranchConfig {
            branch_id: "hq".to_string(),
            secret_file: Some(path.display().to_string()),
            ..Default::default()
        };
        let secrets = branch.load_secrets().unwrap();
        assert_eq!(secrets, vec![vec![0x11; 32], vec![0x22; 32]]);
    }

    #[test]
    #[serial]
    fn test_load_secrets_from_env() {
        // SAFETY: serialized test, no other thread reads this variable
        unsafe {
            std::env::set_var("ATTENDIX_TEST_BRANCH_SECRET", "33".repeat(16));
        }
        let branch = BranchConfig {
            branch_id: "east".to_string(),
            secret_env: Some("ATTENDIX_TEST_BRANCH_SECRET".to_string()),
            ..Default::default()
        };
        assert_eq!(branch.load_secrets().unwrap(), vec![vec![0x33; 16]]);

        unsafe {
            std::env::remove_var("ATTENDIX_TEST_BRANCH_SECRET");
        }
        assert!(matches!(
            branch.load_secrets(),
            Err(ConfigError::EnvError { .. })
        ));
    }

    #[test]
    fn test_validate_branch_id() {
        let branch = BranchConfig {
            branch_id: "north wing".to_string(),
            secrets: vec!["00".repeat(16)],
            ..Default::default()
        };
        assert!(
            branch
                .validate()
                .iter()
                .any(|e| e.contains("whitespace"))
        );
    }
}
