use crate::error::{Result, SupervisorError};
use crate::models::{ArchiveOutcome, BatchReport, LogEntry, StreamType, SupervisorSettings};
use crate::services::{LogSink, ProcessGateway};
use crate::utils::{is_log_file_name, parse_log_file_name};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};
use walkdir::WalkDir;

/// 文件名无法解析时使用的进程名
const ARCHIVED_FALLBACK_NAME: &str = "archived_log";
/// 归档时不知道配置文件的真实路径
const UNKNOWN_CONFIG: &str = "unknown";

/// 把一个已关闭的日志文件整体写入日志库，成功后删除源文件
pub async fn archive_log_file(sink: &dyn LogSink, path: &Path) -> Result<ArchiveOutcome> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let (pid, process_name) = match parse_log_file_name(&file_name) {
        Some(parsed) => (
            Some(parsed.pid),
            format!("archived_{}_{}", parsed.config, parsed.pid),
        ),
        None => {
            warn!("[Archiver] 无法从文件名解析元数据: {}", file_name);
            (None, ARCHIVED_FALLBACK_NAME.to_string())
        }
    };

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SupervisorError::InvalidRequest(format!(
                "日志文件不存在: {}",
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let entries: Vec<LogEntry> = String::from_utf8_lossy(&content)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| LogEntry {
            timestamp: now,
            process_pid: pid,
            process_name: process_name.clone(),
            config_reference: UNKNOWN_CONFIG.to_string(),
            stream_type: StreamType::Archived,
            message: line.to_string(),
        })
        .collect();

    sink.append_batch(&entries).await?;
    tokio::fs::remove_file(path).await?;

    info!(
        "[Archiver] 已归档并删除 {} ({} 行)",
        path.display(),
        entries.len()
    );
    Ok(ArchiveOutcome {
        file: path.to_path_buf(),
        pid,
        process_name,
        lines_archived: entries.len(),
    })
}

/// 找出 `log_dir` 中进程已退出且超过保留时间的日志文件
pub fn stale_log_files(
    gateway: &dyn ProcessGateway,
    settings: &SupervisorSettings,
    now: SystemTime,
) -> Vec<PathBuf> {
    let mut stale = Vec::new();
    for entry in WalkDir::new(&settings.log_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !is_log_file_name(&file_name) {
            continue;
        }

        if let Some(parsed) = parse_log_file_name(&file_name) {
            if gateway.is_alive(parsed.pid) {
                continue;
            }
        }

        let old_enough = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .map_or(false, |age| age >= settings.archive_after());
        if old_enough {
            stale.push(entry.into_path());
        }
    }
    stale.sort();
    stale
}

/// 日志保留任务: 逐个归档过期的日志文件，单个失败不影响其他文件
pub async fn archive_stale_logs(
    sink: &dyn LogSink,
    gateway: &dyn ProcessGateway,
    settings: &SupervisorSettings,
) -> BatchReport {
    let mut report = BatchReport::default();
    for path in stale_log_files(gateway, settings, SystemTime::now()) {
        match archive_log_file(sink, &path).await {
            Ok(_) => report.record_success(),
            Err(e) => {
                warn!("[Archiver] 归档 {} 失败: {}", path.display(), e);
                report.record_failure(path.display().to_string(), e);
            }
        }
    }
    info!(
        "[Archiver] 日志归档完成: 成功 {}, 失败 {}",
        report.succeeded, report.failed
    );
    report
}
