use crate::error::{Result, SupervisorError};
use crate::models::{
    ArchiveOutcome, BatchReport, HistoricalProcessSummary, LogEntry, PurgeReport, StreamType,
};
use crate::services::{self, LogSink};
use crate::state::AppState;
use std::path::Path;

/// 最新的在前，`limit` 缺省时使用配置中的默认条数
pub async fn get_logs(
    state: &AppState,
    pid: u32,
    limit: Option<usize>,
    stream: Option<StreamType>,
) -> Result<Vec<LogEntry>> {
    let limit = limit.unwrap_or(state.supervisor.settings().default_log_limit);
    state.supervisor.sink().query(pid, limit, stream).await
}

pub async fn get_historical_processes(state: &AppState) -> Result<Vec<HistoricalProcessSummary>> {
    state.supervisor.sink().historical_summary().await
}

pub async fn delete_historical(state: &AppState, pids: Vec<u32>) -> Result<PurgeReport> {
    if pids.is_empty() {
        return Err(SupervisorError::InvalidRequest(
            "没有提供要删除的进程 PID".to_string(),
        ));
    }

    let deleted_entries = state.supervisor.sink().purge(&pids).await?;
    Ok(PurgeReport {
        requested: pids,
        deleted_entries,
    })
}

pub async fn archive_log_file(state: &AppState, path: &Path) -> Result<ArchiveOutcome> {
    services::archive_log_file(state.supervisor.sink().as_ref(), path).await
}

pub async fn archive_stale_logs(state: &AppState) -> BatchReport {
    let supervisor = &state.supervisor;
    services::archive_stale_logs(
        supervisor.sink().as_ref(),
        supervisor.gateway().as_ref(),
        supervisor.settings(),
    )
    .await
}
