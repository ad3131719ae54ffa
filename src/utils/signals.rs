#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// 信号投递结果，进程已经消失不算错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    ProcessGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

/// 非破坏性地检查 pid 是否存在
pub fn pid_exists(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // 进程存在但属于其他用户
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(target_os = "windows")]
    {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::new(),
        );
        system.process(target).is_some()
    }
}

/// 向单个进程发送停止信号
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<Delivery, String> {
    if pid == 0 {
        return Ok(Delivery::ProcessGone);
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| format!("无效的 PID: {}", pid))?;
        let sig = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };

        match kill(Pid::from_raw(raw), sig) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::ProcessGone),
            Err(e) => Err(format!("发送 {} 失败: {}", sig, e)),
        }
    }

    #[cfg(target_os = "windows")]
    {
        let pid_arg = pid.to_string();
        let mut kill_command = std::process::Command::new("taskkill");
        match signal {
            StopSignal::Terminate => kill_command.args(["/PID", &pid_arg, "/T"]),
            StopSignal::Kill => kill_command.args(["/PID", &pid_arg, "/T", "/F"]),
        };

        const CREATE_NO_WINDOW: u32 = 0x08000000;
        kill_command.creation_flags(CREATE_NO_WINDOW);

        let output = kill_command
            .output()
            .map_err(|e| format!("执行 taskkill 失败: {}", e))?;

        if output.status.success() {
            Ok(Delivery::Delivered)
        } else if !pid_exists(pid) {
            Ok(Delivery::ProcessGone)
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}
