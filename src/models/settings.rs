use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 用户级状态目录 ~/.telegraf-console
pub fn console_home() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".telegraf-console")
}

/// Supervisor 的运行参数，所有字段都有默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// 被托管的可执行文件
    pub executable: String,
    /// 枚举进程时按名称匹配的子串
    pub process_match: String,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    /// 注册表和日志库所在目录
    pub data_dir: PathBuf,
    pub start_grace_ms: u64,
    pub stop_grace_secs: u64,
    /// 重启时停止与启动之间的等待，需大于系统回收进程的时间
    pub restart_settle_ms: u64,
    pub tail_poll_ms: u64,
    pub file_wait_ms: u64,
    pub version_check_timeout_secs: u64,
    pub config_test_timeout_secs: u64,
    /// 为 0 时不启动定时巡检
    pub sweep_interval_secs: u64,
    pub archive_after_secs: u64,
    pub default_log_limit: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        let home = console_home();
        Self {
            executable: "telegraf".to_string(),
            process_match: "telegraf".to_string(),
            config_dir: home.join("configs"),
            log_dir: home.join("log"),
            data_dir: home.join("database"),
            start_grace_ms: 500,
            stop_grace_secs: 5,
            restart_settle_ms: 2000,
            tail_poll_ms: 500,
            file_wait_ms: 100,
            version_check_timeout_secs: 5,
            config_test_timeout_secs: 30,
            sweep_interval_secs: 30,
            archive_after_secs: 24 * 60 * 60,
            default_log_limit: 500,
        }
    }
}

impl SupervisorSettings {
    /// 把所有目录放到同一个根目录下，测试和便携部署使用
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("configs"),
            log_dir: root.join("log"),
            data_dir: root.join("database"),
            ..Self::default()
        }
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn tail_poll(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    pub fn file_wait(&self) -> Duration {
        Duration::from_millis(self.file_wait_ms)
    }

    pub fn version_check_timeout(&self) -> Duration {
        Duration::from_secs(self.version_check_timeout_secs)
    }

    pub fn config_test_timeout(&self) -> Duration {
        Duration::from_secs(self.config_test_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn archive_after(&self) -> Duration {
        Duration::from_secs(self.archive_after_secs)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("processes.json")
    }

    pub fn log_store_path(&self) -> PathBuf {
        self.data_dir.join("telegraf_logs.redb")
    }
}
