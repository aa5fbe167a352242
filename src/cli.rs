use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attendix")]
#[command(about = "QR 考勤扫码校验与离线优先同步代理")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径，未指定时依次查找 ./attendix.toml 与 /etc/attendix/attendix.toml
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 运行同步代理直到 Ctrl-C（默认命令）
    Run,

    /// 校验并记录一次扫码
    Scan {
        /// 员工 ID
        #[arg(short, long)]
        employee: String,

        /// 打卡类型：check-in 或 check-out
        #[arg(short = 't', long = "type", default_value = "check-in")]
        scan_type: String,

        /// 扫描到的二维码文本
        code: String,
    },

    /// 为指定分支签发一张二维码（仅 dev 环境）
    Issue {
        #[arg(short, long)]
        branch: String,
    },

    /// 查询员工考勤记录
    History {
        #[arg(short, long)]
        employee: String,

        /// 起始日期（含），YYYY-MM-DD，默认 30 天前
        #[arg(long)]
        from: Option<String>,

        /// 结束日期（含），YYYY-MM-DD，默认今天
        #[arg(long)]
        to: Option<String>,
    },

    /// 列出待同步与冲突事件
    Pending,

    /// 立即执行一次同步
    Sync,

    /// 将冲突事件重新放回同步队列
    Requeue {
        /// 事件 ID
        event_id: String,
    },

    /// 为已结束的班次补记缺勤
    Absences {
        /// 日期，YYYY-MM-DD，默认今天
        #[arg(long)]
        date: Option<String>,

        /// 员工 ID，可重复
        #[arg(short, long = "employee", required = true)]
        employees: Vec<String>,

        /// 缺勤事件所属分支，默认取第一个配置的分支
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// 测试配置文件
    Test {
        /// 要测试的配置文件路径
        config_file: Option<PathBuf>,
    },
}
