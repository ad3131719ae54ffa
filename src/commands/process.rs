use crate::error::{Result, SupervisorError};
use crate::models::{
    BatchReport, ConfigRef, ConfigTestReport, ManagedProcess, ProcessListing, RestartOutcome,
    StartedProcess, StopOutcome,
};
use crate::services::{ConfigStore, ProcessRegistry};
use crate::state::AppState;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 启动一个受管进程。已有 Telegraf 进程在使用同名配置时拒绝启动。
pub async fn start_process(
    state: &AppState,
    config_path: PathBuf,
    config_name: String,
    process_name: Option<String>,
) -> Result<StartedProcess> {
    let supervisor = &state.supervisor;
    if let Some(existing) = supervisor.find_config_in_use(&config_name).await {
        return Err(SupervisorError::ConfigInUse {
            config_name,
            pid: existing.pid,
        });
    }

    let config = ConfigRef::new(config_name.clone(), config_name, config_path);
    let (_, started) = supervisor.start_managed(config, process_name).await?;
    Ok(started)
}

pub async fn stop_process(state: &AppState, pid: u32) -> Result<StopOutcome> {
    state.supervisor.stop_managed(pid).await
}

pub async fn restart_process(state: &AppState, process_id: &str) -> Result<RestartOutcome> {
    let mut record = state
        .supervisor
        .registry()
        .find_by_id(process_id)
        .await?
        .ok_or_else(|| SupervisorError::ProcessNotFound(process_id.to_string()))?;
    state.supervisor.restart(&mut record).await
}

/// 注册表中所有记录的 pid，作为 `list_processes` 的受管集合
pub async fn registered_pids(state: &AppState) -> Result<HashSet<u32>> {
    Ok(state
        .supervisor
        .registry()
        .list_all()
        .await?
        .into_iter()
        .filter(|r| r.is_running())
        .filter_map(|r| r.os_pid)
        .collect())
}

pub async fn list_processes(state: &AppState, known_pids: &HashSet<u32>) -> Result<ProcessListing> {
    state.supervisor.list(known_pids).await
}

pub async fn managed_processes(state: &AppState) -> Result<Vec<ManagedProcess>> {
    state.supervisor.managed_processes().await
}

pub async fn get_process(state: &AppState, process_id: &str) -> Result<ManagedProcess> {
    state.supervisor.get_process(process_id).await
}

/// 删除一条已停止的记录，历史日志保留在日志库中
pub async fn delete_process_record(state: &AppState, process_id: &str) -> Result<ManagedProcess> {
    let record = state.supervisor.get_process(process_id).await?;
    if record.is_running() {
        return Err(SupervisorError::InvalidRequest(format!(
            "进程 {} 仍在运行，请先停止",
            record.name
        )));
    }

    state
        .supervisor
        .registry()
        .remove(process_id)
        .await?
        .ok_or_else(|| SupervisorError::ProcessNotFound(process_id.to_string()))
}

/// 停止一个不受管理的 Telegraf 进程，不修改注册表
pub async fn stop_non_managed(state: &AppState, pid: u32) -> Result<StopOutcome> {
    if let Some(record) = state.supervisor.registry().find_by_pid(pid).await? {
        if record.is_running() {
            return Err(SupervisorError::InvalidRequest(format!(
                "进程 {} 是受管进程 {}",
                pid, record.name
            )));
        }
    }
    state.supervisor.stop(pid, None).await
}

async fn start_by_config_id(state: &AppState, config_id: &str) -> Result<StartedProcess> {
    let config = state.supervisor.configs().resolve(config_id).await?;
    start_process(state, config.path, config.name, None).await
}

/// 逐个启动配置，单个失败不影响其他配置
pub async fn start_all(state: &AppState, config_ids: &[String]) -> BatchReport {
    let mut report = BatchReport::default();
    for config_id in config_ids {
        match start_by_config_id(state, config_id).await {
            Ok(started) => {
                info!("[Commands] 已启动 {} (PID: {})", config_id, started.pid);
                report.record_success();
            }
            Err(e) => {
                warn!("[Commands] 启动 {} 失败: {}", config_id, e);
                report.record_failure(config_id.clone(), e);
            }
        }
    }
    report
}

/// 停止所有 running 记录
pub async fn stop_all(state: &AppState) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    for mut record in state.supervisor.registry().list_running().await? {
        let Some(pid) = record.os_pid else {
            state.supervisor.reconcile(&mut record).await?;
            report.record_success();
            continue;
        };

        match state.supervisor.stop_managed(pid).await {
            Ok(_) => report.record_success(),
            Err(e) => {
                warn!("[Commands] 停止 {} 失败: {}", record.name, e);
                report.record_failure(format!("{} (PID: {})", record.name, pid), e);
            }
        }
    }
    Ok(report)
}

pub async fn test_config(state: &AppState, config_path: &Path) -> Result<ConfigTestReport> {
    state.supervisor.test_config(config_path).await
}
