//! attendix 考勤代理主程序
//!
//! 运行离线优先的同步代理，并提供扫码、查询、同步与冲突处理等命令

mod agent;
mod cli;
mod error;
mod metrics_server;
mod observability;

use agent::Agent;
use attendance::{AttendanceEvent, ScanError, ScanType, SchedulerOptions, SyncScheduler};
use attendix_common::AttendixConfig;
use chrono::{Duration, NaiveDate};
use clap::Parser;
use observability::{init_console, init_observability};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// 默认查询最近 30 天的考勤
const DEFAULT_HISTORY_DAYS: i64 = 30;

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().or(cli.config.as_ref()))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        command => {
            let config_path = ApplicationLauncher::find_config_file(cli.config.as_ref())?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::dispatch(
                &config_path,
                command.unwrap_or(Commands::Run),
            ))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: Option<&PathBuf>) -> Result<PathBuf> {
        if let Some(path) = provided_path {
            if path.exists() {
                bootstrap_info!("Using provided config file: {:?}", path);
                return Ok(path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", path);
            return Err(Error::custom(format!("Config file not found: {path:?}")));
        }

        let fallback_paths = [
            // 1. Current working directory
            PathBuf::from("attendix.toml"),
            // 2. System config directory
            PathBuf::from("/etc/attendix/attendix.toml"),
        ];

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: attendix --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        init_console(None);

        match AttendixConfig::from_file(config_path) {
            Ok(config) => {
                info!("✅ 配置文件解析成功: {:?}", config_path);

                match config.validate() {
                    Ok(()) => info!("✅ 配置验证通过"),
                    Err(errors) => {
                        error!("❌ 配置验证发现问题:");
                        for (i, err) in errors.iter().enumerate() {
                            if err.starts_with("Warning:") {
                                info!("  {}. ⚠️  {}", i + 1, err);
                            } else {
                                error!("  {}. ❌ {}", i + 1, err);
                            }
                        }
                        if errors.iter().any(|e| !e.starts_with("Warning:")) {
                            return Err(Error::custom("配置验证失败"));
                        }
                    }
                }

                // 密钥可能来自环境变量或文件，只有加载时才能确认
                for branch in &config.branches {
                    let secrets = branch.load_secrets()?;
                    info!(
                        "✅ 分支 {} 加载了 {} 把密钥",
                        branch.branch_id,
                        secrets.len()
                    );
                }

                info!("✅ 完整配置验证通过");
                Ok(())
            }
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                Err(Error::custom(format!("配置解析失败: {e}")))
            }
        }
    }

    /// 加载并验证配置，警告不阻止启动
    fn load_config(config_path: &Path) -> Result<AttendixConfig> {
        let config = AttendixConfig::from_file(config_path).map_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
            Error::custom(format!("配置加载失败: {e}"))
        })?;

        if let Err(errors) = config.validate() {
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::custom("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    async fn dispatch(config_path: &Path, command: Commands) -> Result<()> {
        let config = Self::load_config(config_path)?;

        if matches!(command, Commands::Run) {
            let _observability_guard = init_observability(&config)?;
            let agent = Agent::open(config).await?;
            return Self::run_agent(agent).await;
        }

        init_console(Some(&config));
        let agent = Agent::open(config).await?;

        match command {
            Commands::Scan {
                employee,
                scan_type,
                code,
            } => Self::scan(&agent, &employee, &scan_type, &code).await,
            Commands::Issue { branch } => Self::issue(&agent, &branch),
            Commands::History { employee, from, to } => {
                Self::history(&agent, &employee, from.as_deref(), to.as_deref()).await
            }
            Commands::Pending => Self::pending(&agent).await,
            Commands::Sync => Self::sync_once(&agent).await,
            Commands::Requeue { event_id } => Self::requeue(&agent, &event_id).await,
            Commands::Absences {
                date,
                employees,
                branch,
            } => Self::absences(&agent, date.as_deref(), &employees, branch.as_deref()).await,
            Commands::Run | Commands::Test { .. } => Ok(()),
        }
    }

    /// 运行同步代理直到收到 Ctrl-C
    async fn run_agent(agent: Agent) -> Result<()> {
        info!("🚀 启动考勤代理: {}", agent.config.name);

        if let Err(e) = attendix_common::metrics::register_metrics() {
            warn!(
                "Prometheus metrics registration warning (may already be registered): {}",
                e
            );
        }

        let shutdown = CancellationToken::new();
        setup_ctrl_c_handler(shutdown.clone());

        let metrics = match &agent.config.observability.metrics_bind {
            Some(bind) => Some(metrics_server::start(bind, shutdown.child_token()).await?),
            None => None,
        };

        let ledger = agent.open_ledger().await?;
        let sweeper = qrauth::ledger::spawn_sweeper(
            ledger,
            agent.config.validation.sweep_interval(),
            shutdown.child_token(),
        );

        let sync_handle = match agent.reconciler()? {
            Some(reconciler) => Some(SyncScheduler::spawn(
                reconciler,
                SchedulerOptions::from_config(&agent.config.sync),
            )),
            None => {
                info!("📴 未配置同步端点，事件仅在本地累积");
                None
            }
        };

        Self::display_agent_info(&agent);

        shutdown.cancelled().await;

        if let Some(handle) = sync_handle {
            if let Some(report) = handle.last_report() {
                info!(
                    synced = report.synced,
                    still_pending = report.still_pending(),
                    awaiting_review = report.awaiting_review,
                    "Last sync cycle before shutdown"
                );
            }
            handle.shutdown().await;
        }
        sweeper.await?;
        if let Some((_, handle)) = metrics {
            handle.await?;
        }

        debug!("Metrics at shutdown:\n{}", attendix_common::metrics::export_metrics());
        info!("🛑 考勤代理已安全关闭");
        Ok(())
    }

    fn display_agent_info(agent: &Agent) {
        let config = &agent.config;
        info!("✅ 考勤代理已启动");
        info!("  - 数据目录: {}", config.sqlite_path.display());
        info!(
            "  - 有效期: {}s, 时钟偏差: {}s",
            config.validation.validity_window_secs, config.validation.clock_skew_secs
        );
        for branch in &config.branches {
            info!("  - 分支: {}", branch.branch_id);
        }
        match &config.sync.endpoint {
            Some(endpoint) if config.sync.is_enabled() => info!(
                "  - 同步: {} (间隔 {}s)",
                endpoint, config.sync.interval_secs
            ),
            _ => info!("  - 同步: 离线"),
        }
    }

    async fn scan(agent: &Agent, employee: &str, scan_type: &str, code: &str) -> Result<()> {
        let scan_type: ScanType = scan_type.parse().map_err(Error::custom)?;
        let ledger = agent.open_durable_ledger().await?;
        let service = agent.scan_service(agent.validator(ledger)?);

        match service.scan(code.as_bytes(), employee, scan_type).await {
            Ok(receipt) => {
                println!("{}", serde_json::to_string_pretty(&receipt.event)?);
                bootstrap_info!("✅ {}", receipt.user_message());
                Ok(())
            }
            Err(e) => {
                bootstrap_error!("❌ {}", e.user_message());
                if let ScanError::Rejected(reason) = &e {
                    info!(%reason, "Scan rejected");
                }
                Err(e.into())
            }
        }
    }

    fn issue(agent: &Agent, branch_id: &str) -> Result<()> {
        if !agent.config.is_dev() {
            return Err(Error::custom(
                "The issue command is only available when env = \"dev\"",
            ));
        }
        let payload = agent.issuer(branch_id)?.issue(agent.clock.now())?;
        info!(
            branch_id,
            nonce = %payload.nonce(),
            issued_at = %payload.issued_at(),
            "Issued QR code"
        );
        println!("{}", qrauth::encode_text(&payload));
        Ok(())
    }

    async fn history(
        agent: &Agent,
        employee: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<()> {
        let today = agent.schedule.local_date(agent.clock.now());
        let to = to.map(parse_date).transpose()?.unwrap_or(today);
        let from = from
            .map(parse_date)
            .transpose()?
            .unwrap_or(to - Duration::days(DEFAULT_HISTORY_DAYS));
        if from > to {
            return Err(Error::custom(format!("--from {from} is after --to {to}")));
        }

        let (start, _) = agent.schedule.day_bounds(from);
        let (_, end) = agent.schedule.day_bounds(to);
        let events = agent.store.history(employee, start, end).await?;

        bootstrap_info!("{} event(s) for {} between {} and {}", events.len(), employee, from, to);
        print_events(&events);
        Ok(())
    }

    async fn pending(agent: &Agent) -> Result<()> {
        let events = agent.store.list_pending().await?;
        let conflicted = events.iter().filter(|e| !e.is_pending()).count();
        bootstrap_info!(
            "{} pending, {} awaiting review",
            events.len() - conflicted,
            conflicted
        );
        print_events(&events);
        Ok(())
    }

    async fn sync_once(agent: &Agent) -> Result<()> {
        let reconciler = agent
            .reconciler()?
            .ok_or_else(|| Error::custom("Sync endpoint is not configured ([sync].endpoint)"))?;
        let report = reconciler.run_cycle(&CancellationToken::new()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.has_transient_failures() {
            warn!(
                "{} event(s) could not be delivered and remain pending",
                report.transient_failures
            );
        }
        Ok(())
    }

    async fn requeue(agent: &Agent, event_id: &str) -> Result<()> {
        let event_id = Uuid::parse_str(event_id.trim())
            .map_err(|e| Error::custom(format!("Invalid event id '{event_id}': {e}")))?;
        agent.store.requeue(event_id).await?;
        info!(%event_id, "Event returned to the sync queue");
        Ok(())
    }

    async fn absences(
        agent: &Agent,
        date: Option<&str>,
        employees: &[String],
        branch: Option<&str>,
    ) -> Result<()> {
        let date = match date {
            Some(d) => parse_date(d)?,
            None => agent.schedule.local_date(agent.clock.now()),
        };
        let branch_id = match branch {
            Some(b) => b,
            None => agent.default_branch()?,
        };

        let created = agent.absence_sweeper(branch_id).sweep(date, employees).await?;
        bootstrap_info!("{} absence(s) recorded for {}", created.len(), date);
        print_events(&created);
        Ok(())
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| Error::custom(format!("Invalid date '{value}', expected YYYY-MM-DD: {e}")))
}

fn print_events(events: &[AttendanceEvent]) {
    for event in events {
        let mut line = format!(
            "{}  {}  {:<10} {:<16} {:<10} {}",
            event.occurred_at.to_rfc3339(),
            event.employee_id,
            event.scan_type.as_str(),
            event.status.as_str(),
            event.sync_state.as_str(),
            event.event_id
        );
        if let Some(reason) = &event.conflict_reason {
            line.push_str(&format!("  ({reason})"));
        }
        println!("{line}");
    }
}

/// 设置Ctrl-C信号处理程序
fn setup_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        shutdown.cancel();
    });
}
