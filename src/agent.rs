//! 组件装配
//!
//! 根据配置创建事件库、排班、nonce 账本、校验器与同步协调器。
//! 各命令只取自己需要的部分，例如 `history` 不会打开 nonce 账本。

use crate::error::{Error, Result};
use anyhow::Context;
use attendance::{
    AbsenceSweeper, AttendanceRecorder, EventStore, HttpAttendanceApi, ScanService, Schedule,
    SqliteEventStore, SyncReconciler, WeeklySchedule,
};
use attendix_common::config::LedgerBackend;
use attendix_common::{AttendixConfig, Clock, SystemClock};
use qrauth::{
    KeyRing, MemoryNonceLedger, NonceLedger, PolicyBook, QrIssuer, SqliteNonceLedger,
    TokenValidator,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Agent {
    pub config: AttendixConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn EventStore>,
    pub schedule: Arc<dyn Schedule>,
}

impl Agent {
    /// 打开本地事件库并加载排班
    pub async fn open(config: AttendixConfig) -> Result<Self> {
        if !config.sqlite_path.exists() {
            std::fs::create_dir_all(&config.sqlite_path).with_context(|| {
                format!(
                    "Failed to create SQLite data directory: {}",
                    config.sqlite_path.display()
                )
            })?;
        }

        let store = SqliteEventStore::open(config.event_db_file()).await?;
        debug!("Event store opened at {}", config.event_db_file().display());
        let schedule = WeeklySchedule::from_config(&config.schedule)?;

        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            store: Arc::new(store),
            schedule: Arc::new(schedule),
        })
    }

    pub async fn open_ledger(&self) -> Result<Arc<dyn NonceLedger>> {
        let validation = &self.config.validation;
        let ledger: Arc<dyn NonceLedger> = match validation.ledger {
            LedgerBackend::Memory => {
                warn!("Using in-memory nonce ledger, replay protection does not survive restarts");
                Arc::new(MemoryNonceLedger::new(
                    self.clock.clone(),
                    validation.ledger_capacity,
                ))
            }
            LedgerBackend::Sqlite => Arc::new(
                SqliteNonceLedger::open(self.config.nonce_db_file(), self.clock.clone()).await?,
            ),
        };
        info!("Nonce ledger ready (backend: {})", ledger.backend_name());
        Ok(ledger)
    }

    /// 单次命令使用的账本：进程退出即丢失的内存账本会让同一二维码在下一次调用时再次通过
    pub async fn open_durable_ledger(&self) -> Result<Arc<dyn NonceLedger>> {
        if self.config.validation.ledger == LedgerBackend::Memory {
            return Err(Error::custom(
                "In-memory nonce ledger cannot protect one-shot scans against replay; \
                 set [validation] ledger = \"sqlite\"",
            ));
        }
        self.open_ledger().await
    }

    pub fn validator(&self, ledger: Arc<dyn NonceLedger>) -> Result<Arc<TokenValidator>> {
        let keys = KeyRing::from_config(&self.config.branches)?;
        let policies = PolicyBook::from_config(&self.config);
        Ok(Arc::new(TokenValidator::new(Arc::new(keys), ledger, policies)))
    }

    pub fn scan_service(&self, validator: Arc<TokenValidator>) -> ScanService {
        let recorder = AttendanceRecorder::new(self.schedule.clone(), self.clock.clone());
        ScanService::new(validator, recorder, self.store.clone(), self.clock.clone())
    }

    /// 未配置同步端点时返回 None
    pub fn reconciler(&self) -> Result<Option<Arc<SyncReconciler>>> {
        let Some(api) = HttpAttendanceApi::from_config(&self.config.sync)? else {
            return Ok(None);
        };
        info!("Sync endpoint: {}", api.events_url());
        Ok(Some(Arc::new(SyncReconciler::new(
            self.store.clone(),
            Arc::new(api),
            self.config.sync.timeout(),
        ))))
    }

    pub fn absence_sweeper(&self, branch_id: &str) -> AbsenceSweeper {
        AbsenceSweeper::new(
            self.store.clone(),
            self.schedule.clone(),
            self.clock.clone(),
            branch_id,
        )
    }

    /// 使用分支的主密钥签发
    pub fn issuer(&self, branch_id: &str) -> Result<QrIssuer> {
        let branch = self
            .config
            .branch(branch_id)
            .ok_or_else(|| Error::custom(format!("Unknown branch '{branch_id}'")))?;
        let secret = branch
            .load_secrets()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::custom(format!("Branch '{branch_id}' has no secret")))?;
        Ok(QrIssuer::new(branch_id, secret))
    }

    /// 默认分支：配置中的第一个分支
    pub fn default_branch(&self) -> Result<&str> {
        self.config
            .branches
            .first()
            .map(|b| b.branch_id.as_str())
            .ok_or_else(|| Error::custom("No [[branches]] configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance::ScanType;
    use chrono::Utc;

    fn test_config(dir: &std::path::Path, ledger: &str) -> AttendixConfig {
        AttendixConfig::from_toml(&format!(
            r#"
name = "agent-test"
sqlite_path = "{}"

[validation]
ledger = "{ledger}"

[[branches]]
branch_id = "hq"
secrets = ["{}"]
"#,
            dir.join("data").display(),
            "ab".repeat(32)
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_issue_then_scan_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::open(test_config(dir.path(), "sqlite")).await.unwrap();
        assert!(agent.config.sqlite_path.exists());

        let ledger = agent.open_ledger().await.unwrap();
        let service = agent.scan_service(agent.validator(ledger).unwrap());

        let payload = agent.issuer("hq").unwrap().issue(Utc::now()).unwrap();
        let code = qrauth::encode_text(&payload);

        let receipt = service
            .scan(code.as_bytes(), "e-1", ScanType::CheckIn)
            .await
            .unwrap();
        assert_eq!(receipt.event.branch_id, "hq");

        let replay = service.scan(code.as_bytes(), "e-2", ScanType::CheckIn).await;
        assert!(matches!(
            replay,
            Err(attendance::ScanError::Rejected(
                qrauth::RejectReason::NonceAlreadyUsed
            ))
        ));
    }

    #[tokio::test]
    async fn test_offline_mode_without_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::open(test_config(dir.path(), "memory")).await.unwrap();
        assert!(agent.reconciler().unwrap().is_none());
        assert_eq!(agent.default_branch().unwrap(), "hq");
        assert!(agent.issuer("east").is_err());
        assert_eq!(agent.open_ledger().await.unwrap().backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_one_shot_scan_requires_durable_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::open(test_config(dir.path(), "memory")).await.unwrap();
        let err = agent.open_durable_ledger().await.err().unwrap();
        assert!(err.to_string().contains("ledger = \"sqlite\""));

        let agent = Agent::open(test_config(dir.path(), "sqlite")).await.unwrap();
        let ledger = agent.open_durable_ledger().await.unwrap();
        assert_eq!(ledger.backend_name(), "sqlite");
    }
}
