use crate::error::{Result, SupervisorError};
use crate::models::{ProcessDescriptor, StopKind};
use crate::utils::{pid_exists, resolve_executable, send_signal, Delivery, StopSignal};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::fs::File;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 等待进程退出时的轮询间隔
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 一次同步执行的输出
#[derive(Debug, Clone)]
pub struct CapturedRun {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// 操作系统进程原语。Supervisor 只通过这个 trait 接触进程表。
#[async_trait]
pub trait ProcessGateway: Send + Sync {
    /// 以独立会话启动进程，stdout/stderr 合并写入 `output`
    async fn spawn(&self, executable: &str, args: &[String], output: File) -> Result<u32>;

    fn is_alive(&self, pid: u32) -> bool;

    /// 先发送 SIGTERM，超过 `grace` 仍未退出则 SIGKILL。进程已不存在时直接成功。
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<StopKind>;

    /// 枚举名称包含 `substring` 的进程，枚举过程中消失的进程直接跳过
    async fn list_by_name_substring(&self, substring: &str) -> Vec<ProcessDescriptor>;

    /// 运行一个短命令并收集输出
    async fn run_captured(
        &self,
        executable: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CapturedRun>;

    /// 可执行文件能否找到并正常响应 `--version`
    async fn check_executable(&self, executable: &str, timeout: Duration) -> bool {
        match self
            .run_captured(executable, &["--version".to_string()], timeout)
            .await
        {
            Ok(run) => run.success,
            Err(e) => {
                debug!("[Gateway] {} --version 检查失败: {}", executable, e);
                false
            }
        }
    }
}

/// 基于真实操作系统的实现
#[derive(Debug, Default, Clone)]
pub struct SystemGateway;

impl SystemGateway {
    pub fn new() -> Self {
        Self
    }

    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_alive(pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn descriptor_from(pid: sysinfo::Pid, process: &sysinfo::Process) -> ProcessDescriptor {
        let args: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        ProcessDescriptor {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().to_string(),
            status: process.status().to_string(),
            config_file: ProcessDescriptor::config_from_args(&args),
            cmdline: args.join(" "),
            ppid: process.parent().map(|p| p.as_u32()),
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
            start_time: i64::try_from(process.start_time())
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            config_id: None,
        }
    }
}

#[async_trait]
impl ProcessGateway for SystemGateway {
    async fn spawn(&self, executable: &str, args: &[String], output: File) -> Result<u32> {
        let stderr = output.try_clone()?;

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        // 子进程进入新会话，Supervisor 自身重启时不会连带杀掉它
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        #[cfg(target_os = "windows")]
        {
            const DETACHED_PROCESS: u32 = 0x00000008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SupervisorError::ExecutableMissing(executable.to_string()),
            _ => SupervisorError::Spawn(e.to_string()),
        })?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn("进程在获取 PID 之前已退出".to_string()))?;

        // 回收子进程，避免退出后残留僵尸进程被误判为存活
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("[Gateway] 进程 {} 已退出: {}", pid, status),
                Err(e) => warn!("[Gateway] 等待进程 {} 失败: {}", pid, e),
            }
        });

        info!("[Gateway] 已启动 {} (PID: {})", executable, pid);
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid_exists(pid)
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<StopKind> {
        if !self.is_alive(pid) {
            return Ok(StopKind::AlreadyStopped);
        }

        match send_signal(pid, StopSignal::Terminate) {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::ProcessGone) => return Ok(StopKind::AlreadyStopped),
            Err(reason) => return Err(SupervisorError::Signal { pid, reason }),
        }

        if self.wait_for_exit(pid, grace).await {
            return Ok(StopKind::Graceful);
        }

        warn!("[Gateway] 进程 {} 在 {:?} 内未退出，强制结束", pid, grace);
        match send_signal(pid, StopSignal::Kill) {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::ProcessGone) => return Ok(StopKind::Graceful),
            Err(reason) => return Err(SupervisorError::Signal { pid, reason }),
        }

        if self.wait_for_exit(pid, grace).await {
            Ok(StopKind::Forced)
        } else {
            Err(SupervisorError::Signal {
                pid,
                reason: "强制结束后进程仍然存在".to_string(),
            })
        }
    }

    async fn list_by_name_substring(&self, substring: &str) -> Vec<ProcessDescriptor> {
        let needle = substring.to_lowercase();
        let task = tokio::task::spawn_blocking(move || {
            let mut system = System::new();
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::new()
                    .with_cpu()
                    .with_memory()
                    .with_cmd(UpdateKind::OnlyIfNotSet),
            );

            let mut found: Vec<ProcessDescriptor> = system
                .processes()
                .iter()
                .filter(|(_, process)| {
                    process.status() != ProcessStatus::Zombie
                        && process
                            .name()
                            .to_string_lossy()
                            .to_lowercase()
                            .contains(&needle)
                })
                .map(|(pid, process)| Self::descriptor_from(*pid, process))
                .collect();
            found.sort_by_key(|d| d.pid);
            found
        });

        match task.await {
            Ok(found) => found,
            Err(e) => {
                warn!("[Gateway] 枚举进程失败: {}", e);
                Vec::new()
            }
        }
    }

    async fn run_captured(
        &self,
        executable: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CapturedRun> {
        if resolve_executable(executable).is_none() {
            return Err(SupervisorError::ExecutableMissing(executable.to_string()));
        }

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SupervisorError::ExecutableMissing(executable.to_string()))
            }
            Ok(Err(e)) => return Err(SupervisorError::Spawn(e.to_string())),
            Err(_) => {
                return Err(SupervisorError::Timeout {
                    what: format!("{} {}", executable, args.join(" ")),
                    after: timeout,
                })
            }
        };

        Ok(CapturedRun {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
