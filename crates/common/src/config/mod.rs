//! 统一配置管理系统
//!
//! 本模块是考勤代理配置的"单一真理之源"。
//! 校验窗口、分支签名密钥、排班、同步端点以及日志配置都在这里定义默认值与校验规则。

pub mod branch;
pub mod schedule;
pub mod sync;
pub mod validation;

pub use branch::{BranchConfig, SecretSource, decode_secret};
pub use schedule::{ScheduleConfig, ShiftOverride};
pub use sync::SyncConfig;
pub use validation::{LedgerBackend, ValidationConfig};

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 考勤代理的主配置结构体
///
/// 配置文件使用 TOML 格式，所有段都有合理的默认值，
/// 最小可用配置只需要 `name` 与至少一个 `[[branches]]`。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttendixConfig {
    /// 设备实例名称
    ///
    /// 用于在日志和远端 API 中标识扫码设备，例如 front-desk-01
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境，允许 `issue` 命令等调试功能
    /// - "prod": 生产环境
    /// - "test": 测试环境
    #[serde(default = "default_env")]
    pub env: String,

    /// SQLite 数据库文件存储目录
    ///
    /// 事件库存储为 `{sqlite_path}/attendance.db`，
    /// 持久化 nonce 账本存储为 `{sqlite_path}/nonce_ledger.db`
    #[serde(
        default = "default_sqlite_path",
        serialize_with = "serialize_pathbuf",
        deserialize_with = "deserialize_pathbuf"
    )]
    pub sqlite_path: PathBuf,

    /// 扫码校验策略
    #[serde(default)]
    pub validation: ValidationConfig,

    /// 分支（门店）签名密钥配置
    #[serde(default)]
    pub branches: Vec<BranchConfig>,

    /// 排班配置
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// 远端同步配置
    #[serde(default)]
    pub sync: SyncConfig,

    /// 可观测性配置
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,sqlx=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    /// Prometheus `/metrics` 监听地址（如 "127.0.0.1:9464"），仅 run 模式生效
    ///
    /// 未设置时不开放 HTTP 端口。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_bind: Option<String>,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标："console"（默认）或 "file"
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 当 output = "file" 时按天轮转
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            metrics_bind: None,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

fn serialize_pathbuf<S>(path: &Path, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    path.display().to_string().serialize(serializer)
}

fn deserialize_pathbuf<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(PathBuf::from(s))
}

impl Default for AttendixConfig {
    fn default() -> Self {
        Self {
            name: "attendix-default".to_string(),
            env: default_env(),
            sqlite_path: default_sqlite_path(),
            validation: ValidationConfig::default(),
            branches: Vec::new(),
            schedule: ScheduleConfig::default(),
            sync: SyncConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AttendixConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// 按分支 ID 查找分支配置
    pub fn branch(&self, branch_id: &str) -> Option<&BranchConfig> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }

    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    pub fn is_dev(&self) -> bool {
        self.env == "dev"
    }

    /// 事件库文件路径
    pub fn event_db_file(&self) -> PathBuf {
        self.sqlite_path.join("attendance.db")
    }

    /// 持久化 nonce 账本文件路径
    pub fn nonce_db_file(&self) -> PathBuf {
        self.sqlite_path.join("nonce_ledger.db")
    }

    /// 验证配置有效性
    ///
    /// 返回的列表中以 "Warning:" 开头的条目不会阻止启动
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name cannot be empty".to_string());
        }

        if !matches!(self.env.as_str(), "dev" | "prod" | "test") {
            errors.push(format!(
                "Warning: unknown env '{}', expected one of dev/prod/test",
                self.env
            ));
        }

        errors.extend(self.validation.validate());

        if self.branches.is_empty() {
            errors.push(
                "No [[branches]] configured: every scanned code would be rejected".to_string(),
            );
        }

        let mut seen = HashSet::new();
        for branch in &self.branches {
            if !seen.insert(branch.branch_id.as_str()) {
                errors.push(format!("Duplicate branch_id '{}'", branch.branch_id));
            }
            errors.extend(branch.validate());
        }

        errors.extend(self.schedule.validate());
        errors.extend(self.sync.validate());

        let log = &self.observability.log;
        if !matches!(log.output.as_str(), "console" | "file") {
            errors.push(format!(
                "Invalid observability.log.output '{}', expected console or file",
                log.output
            ));
        }
        if log.output == "file" && log.path.trim().is_empty() {
            errors.push("observability.log.path cannot be empty when output = file".to_string());
        }
        if let Some(bind) = &self.observability.metrics_bind
            && bind.parse::<std::net::SocketAddr>().is_err()
        {
            errors.push(format!(
                "Invalid observability.metrics_bind '{bind}', expected host:port"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
