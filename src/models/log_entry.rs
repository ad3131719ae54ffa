use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
    Archived,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Stdout => write!(f, "stdout"),
            StreamType::Stderr => write!(f, "stderr"),
            StreamType::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" => Ok(StreamType::Stdout),
            "stderr" => Ok(StreamType::Stderr),
            "archived" => Ok(StreamType::Archived),
            other => Err(format!("未知的日志类型: {}", other)),
        }
    }
}

/// 一行日志，写入后不可修改。
///
/// `process_pid` 只是线索而不是外键：操作系统会复用 pid。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub process_pid: Option<u32>,
    pub process_name: String,
    pub config_reference: String,
    pub stream_type: StreamType,
    pub message: String,
}

/// 按 pid 聚合日志得到的历史进程视图，不落库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalProcessSummary {
    pub pid: Option<u32>,
    pub name: String,
    pub config_reference: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub entry_count: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeReport {
    pub requested: Vec<u32>,
    pub deleted_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub file: std::path::PathBuf,
    pub pid: Option<u32>,
    pub process_name: String,
    pub lines_archived: usize,
}
