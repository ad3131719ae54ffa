use crate::models::ConfigRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 受管进程的持久状态，只有 running / stopped 会落库
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// 注册表中的一条受管进程记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub id: String,
    pub name: String,
    pub os_pid: Option<u32>,
    pub status: ProcessStatus,
    pub config: Option<ConfigRef>,
    pub log_file_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

impl ManagedProcess {
    pub fn new(name: String, config: Option<ConfigRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            os_pid: None,
            status: ProcessStatus::Stopped,
            config,
            log_file_path: None,
            created_at: Utc::now(),
            updated_at: None,
            start_time: None,
            stop_time: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    pub fn config_id(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.id.as_str())
    }

    /// 绑定到一次新的启动
    pub fn mark_started(&mut self, started: &StartedProcess) {
        self.name = started.process_name.clone();
        self.os_pid = Some(started.pid);
        self.status = ProcessStatus::Running;
        self.log_file_path = Some(started.log_file_path.clone());
        self.start_time = Some(started.start_time);
        self.stop_time = None;
        self.updated_at = Some(Utc::now());
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.status = ProcessStatus::Stopped;
        self.stop_time = Some(at);
        self.updated_at = Some(at);
    }
}

/// Supervisor::start 的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedProcess {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process_id: Option<String>,
    pub pid: u32,
    pub process_name: String,
    pub config_file: PathBuf,
    pub log_file_path: PathBuf,
    pub start_time: DateTime<Utc>,
}

/// 停止操作的结果分类，三种都算成功
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    AlreadyStopped,
    Graceful,
    Forced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopOutcome {
    pub pid: u32,
    pub kind: StopKind,
    pub message: String,
}

impl StopOutcome {
    pub fn new(pid: u32, kind: StopKind) -> Self {
        let message = match kind {
            StopKind::AlreadyStopped => format!("进程 {} 已不存在。", pid),
            StopKind::Graceful => format!("进程 {} 已优雅停止。", pid),
            StopKind::Forced => format!("进程 {} 已被强制停止。", pid),
        };
        Self { pid, kind, message }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartOutcome {
    pub process_id: String,
    pub previous_pid: Option<u32>,
    pub new_pid: u32,
}

/// 从操作系统进程表中观察到的一个 Telegraf 进程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub config_file: Option<String>,
    pub cmdline: String,
    pub ppid: Option<u32>,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub config_id: Option<String>,
}

impl ProcessDescriptor {
    /// 从命令行参数中提取 `--config` 指向的路径
    pub fn config_from_args(args: &[String]) -> Option<String> {
        args.iter()
            .position(|arg| arg == "--config")
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    /// `--config` 路径的文件名部分
    pub fn config_file_name(&self) -> Option<String> {
        self.config_file.as_ref().and_then(|path| {
            std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessListing {
    pub managed: Vec<ProcessDescriptor>,
    pub non_managed: Vec<ProcessDescriptor>,
}

/// `telegraf --test` 的检测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigTestReport {
    pub passed: bool,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(pid: u32) -> StartedProcess {
        StartedProcess {
            process_id: None,
            pid,
            process_name: format!("telegraf_cpu.conf_{}", pid),
            config_file: PathBuf::from("/etc/telegraf/cpu.conf"),
            log_file_path: PathBuf::from("/tmp/telegraf_cpu_1.log"),
            start_time: Utc::now(),
        }
    }

    #[test]
    fn mark_started_clears_previous_stop_time() {
        let mut record = ManagedProcess::new("cpu".to_string(), None);
        record.mark_stopped(Utc::now());
        assert!(record.stop_time.is_some());

        record.mark_started(&started(1234));
        assert!(record.is_running());
        assert_eq!(record.os_pid, Some(1234));
        assert!(record.stop_time.is_none());
        assert_eq!(record.name, "telegraf_cpu.conf_1234");
    }

    #[test]
    fn config_argument_is_extracted() {
        let args: Vec<String> = ["telegraf", "--config", "/etc/telegraf/mem.conf", "--quiet"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            ProcessDescriptor::config_from_args(&args).as_deref(),
            Some("/etc/telegraf/mem.conf")
        );

        let dangling = vec!["telegraf".to_string(), "--config".to_string()];
        assert!(ProcessDescriptor::config_from_args(&dangling).is_none());
    }

    #[test]
    fn stop_outcome_messages_differ_by_kind() {
        let graceful = StopOutcome::new(7, StopKind::Graceful);
        let forced = StopOutcome::new(7, StopKind::Forced);
        assert_ne!(graceful.message, forced.message);
    }
}
