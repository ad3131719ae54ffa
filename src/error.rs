use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// 重启流程中失败的子步骤
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartStage {
    Stop,
    Resolve,
    Start,
    Persist,
}

impl std::fmt::Display for RestartStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartStage::Stop => write!(f, "stop"),
            RestartStage::Resolve => write!(f, "resolve"),
            RestartStage::Start => write!(f, "start"),
            RestartStage::Persist => write!(f, "persist"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("配置文件不存在: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("{0} 未安装或不在 PATH 中")]
    ExecutableMissing(String),

    #[error("进程 {pid} 启动后立即退出。日志输出:\n{output}")]
    ImmediateExit { pid: u32, output: String },

    #[error("启动进程失败: {0}")]
    Spawn(String),

    #[error("无法停止进程 {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("写入日志失败: {0}")]
    LogWrite(String),

    #[error("进程 {0} 没有关联的配置文件")]
    NoAssociatedConfig(String),

    #[error("进程不存在: {0}")]
    ProcessNotFound(String),

    #[error("一个使用 {config_name} 的进程已在运行中 (PID: {pid})")]
    ConfigInUse { config_name: String, pid: u32 },

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error("{what} 超时 ({}秒)", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("进程注册表错误: {0}")]
    Registry(String),

    #[error("日志存储错误: {0}")]
    LogStore(String),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("重启失败 ({stage}): {source}")]
    Restart {
        stage: RestartStage,
        source: Box<SupervisorError>,
    },
}

impl SupervisorError {
    pub fn restart(stage: RestartStage, source: SupervisorError) -> Self {
        Self::Restart {
            stage,
            source: Box::new(source),
        }
    }

    pub fn log_store(err: impl std::fmt::Display) -> Self {
        Self::LogStore(err.to_string())
    }

    pub fn registry(err: impl std::fmt::Display) -> Self {
        Self::Registry(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_error_keeps_failed_stage() {
        let err = SupervisorError::restart(
            RestartStage::Start,
            SupervisorError::ExecutableMissing("telegraf".to_string()),
        );

        match &err {
            SupervisorError::Restart { stage, source } => {
                assert_eq!(*stage, RestartStage::Start);
                assert!(matches!(**source, SupervisorError::ExecutableMissing(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("start"));
    }

    #[test]
    fn immediate_exit_carries_captured_output() {
        let err = SupervisorError::ImmediateExit {
            pid: 42,
            output: "E! invalid config".to_string(),
        };
        assert!(err.to_string().contains("E! invalid config"));
    }
}
