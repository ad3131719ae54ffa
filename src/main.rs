use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use telegraf_supervisor::commands;
use telegraf_supervisor::models::StreamType;
use telegraf_supervisor::services::{ProcessGateway, SettingsStore};
use telegraf_supervisor::{AppState, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "telegraf-supervisor", version, about = "Telegraf 进程托管与日志采集")]
struct Cli {
    /// 配置文件路径，默认 ~/.telegraf-console/supervisor.json
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// 启动一个受管进程
    Start {
        config_path: PathBuf,
        /// 配置名称，默认取文件名
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        process_name: Option<String>,
        /// 保持前台运行并持续采集日志，直到进程退出或 Ctrl-C
        #[arg(long)]
        follow: bool,
    },
    /// 停止受管进程
    Stop { pid: u32 },
    /// 停止不受管理的 Telegraf 进程
    StopForeign { pid: u32 },
    /// 按记录 id 重启
    Restart { id: String },
    /// 列出系统中所有 Telegraf 进程
    List,
    /// 列出注册表中的受管记录
    Managed,
    /// 查看单条受管记录
    Show { id: String },
    /// 删除一条已停止的记录
    Forget { id: String },
    /// 查询某个 pid 的日志
    Logs {
        pid: u32,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// stdout / stderr / archived
        #[arg(long)]
        stream: Option<StreamType>,
    },
    /// 历史进程汇总
    History,
    /// 按 pid 删除历史日志
    Purge {
        #[arg(required = true)]
        pids: Vec<u32>,
    },
    /// 归档单个日志文件
    Archive { path: PathBuf },
    /// 归档所有过期的日志文件
    ArchiveStale,
    /// 执行 telegraf --test 检查配置
    TestConfig { config_path: PathBuf },
    /// 按配置名称批量启动
    StartAll {
        #[arg(required = true)]
        config_ids: Vec<String>,
    },
    /// 停止所有受管进程
    StopAll,
    /// 执行一次状态巡检
    Sweep,
    /// 前台运行定时巡检，直到 Ctrl-C
    Watch,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("[CLI] 序列化输出失败: {}", e),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings_path = cli.settings.unwrap_or_else(SettingsStore::default_path);
    let settings = SettingsStore::load(&settings_path)?;
    let state = AppState::open(settings)?;

    match cli.cmd {
        Cmd::Start {
            config_path,
            name,
            process_name,
            follow,
        } => {
            let config_name = name.unwrap_or_else(|| {
                config_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            });
            let started =
                commands::start_process(&state, config_path, config_name, process_name).await?;
            print_json(&started);

            if follow {
                follow_process(&state, started.pid).await;
            }
        }
        Cmd::Stop { pid } => print_json(&commands::stop_process(&state, pid).await?),
        Cmd::StopForeign { pid } => print_json(&commands::stop_non_managed(&state, pid).await?),
        Cmd::Restart { id } => print_json(&commands::restart_process(&state, &id).await?),
        Cmd::List => {
            let known = commands::registered_pids(&state).await?;
            print_json(&commands::list_processes(&state, &known).await?);
        }
        Cmd::Managed => print_json(&commands::managed_processes(&state).await?),
        Cmd::Show { id } => print_json(&commands::get_process(&state, &id).await?),
        Cmd::Forget { id } => print_json(&commands::delete_process_record(&state, &id).await?),
        Cmd::Logs { pid, limit, stream } => {
            print_json(&commands::get_logs(&state, pid, limit, stream).await?)
        }
        Cmd::History => print_json(&commands::get_historical_processes(&state).await?),
        Cmd::Purge { pids } => print_json(&commands::delete_historical(&state, pids).await?),
        Cmd::Archive { path } => print_json(&commands::archive_log_file(&state, &path).await?),
        Cmd::ArchiveStale => print_json(&commands::archive_stale_logs(&state).await),
        Cmd::TestConfig { config_path } => {
            print_json(&commands::test_config(&state, &config_path).await?)
        }
        Cmd::StartAll { config_ids } => print_json(&commands::start_all(&state, &config_ids).await),
        Cmd::StopAll => print_json(&commands::stop_all(&state).await?),
        Cmd::Sweep => {
            let corrected = state.supervisor.sweep_once().await?;
            print_json(&serde_json::json!({ "corrected": corrected }));
        }
        Cmd::Watch => match state.start_background_sweep() {
            Some(handle) => {
                tracing::info!("[CLI] 巡检已启动，按 Ctrl-C 退出");
                let _ = tokio::signal::ctrl_c().await;
                handle.abort();
            }
            None => tracing::warn!("[CLI] sweep_interval_secs 为 0，未启动巡检"),
        },
    }
    Ok(())
}

/// 日志采集任务运行在当前进程中，前台等待直到被托管进程退出
async fn follow_process(state: &AppState, pid: u32) {
    let poll = state.supervisor.settings().tail_poll();
    tracing::info!("[CLI] 正在采集 PID {} 的日志，按 Ctrl-C 退出", pid);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(poll) => {
                if !state.supervisor.gateway().is_alive(pid) {
                    // 留出时间让采集任务读完最后几行
                    tokio::time::sleep(poll + Duration::from_millis(100)).await;
                    tracing::info!("[CLI] 进程 {} 已退出", pid);
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("[CLI] {}", e);
        std::process::exit(1);
    }
}
