//! 单元测试用的替身：不启动真实进程的网关和内存日志存储

use crate::error::{Result, SupervisorError};
use crate::models::{HistoricalProcessSummary, LogEntry, ProcessDescriptor, StopKind, StreamType};
use crate::services::{CapturedRun, LogSink, ProcessGateway};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SpawnCall {
    pub executable: String,
    pub args: Vec<String>,
    pub pid: u32,
}

/// 进程表完全在内存中的网关
pub struct FakeGateway {
    next_pid: AtomicU32,
    alive: Mutex<HashSet<u32>>,
    cmdlines: Mutex<HashMap<u32, Vec<String>>>,
    spawned: Mutex<Vec<SpawnCall>>,
    terminated: Mutex<Vec<u32>>,
    denied: Mutex<HashSet<u32>>,
    pub installed: AtomicBool,
    pub exit_immediately: AtomicBool,
    pub spawn_output: Mutex<String>,
    pub captured: Mutex<Option<CapturedRun>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            alive: Mutex::new(HashSet::new()),
            cmdlines: Mutex::new(HashMap::new()),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            denied: Mutex::new(HashSet::new()),
            installed: AtomicBool::new(true),
            exit_immediately: AtomicBool::new(false),
            spawn_output: Mutex::new(String::new()),
            captured: Mutex::new(None),
        }
    }

    /// 模拟一个不受管理的外部进程
    pub fn add_foreign(&self, pid: u32, args: &[&str]) {
        self.alive.lock().unwrap().insert(pid);
        self.cmdlines
            .lock()
            .unwrap()
            .insert(pid, args.iter().map(|a| a.to_string()).collect());
    }

    /// 模拟进程在外部被杀掉
    pub fn kill_externally(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    pub fn deny_signals_for(&self, pid: u32) {
        self.denied.lock().unwrap().insert(pid);
    }

    pub fn spawned(&self) -> Vec<SpawnCall> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessGateway for FakeGateway {
    async fn spawn(&self, executable: &str, args: &[String], mut output: File) -> Result<u32> {
        if !self.installed.load(Ordering::SeqCst) {
            return Err(SupervisorError::ExecutableMissing(executable.to_string()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let text = self.spawn_output.lock().unwrap().clone();
        output.write_all(text.as_bytes())?;

        if !self.exit_immediately.load(Ordering::SeqCst) {
            self.alive.lock().unwrap().insert(pid);
        }
        let mut cmdline = vec![executable.to_string()];
        cmdline.extend(args.iter().cloned());
        self.cmdlines.lock().unwrap().insert(pid, cmdline);
        self.spawned.lock().unwrap().push(SpawnCall {
            executable: executable.to_string(),
            args: args.to_vec(),
            pid,
        });
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    async fn terminate(&self, pid: u32, _grace: Duration) -> Result<StopKind> {
        if self.denied.lock().unwrap().contains(&pid) {
            return Err(SupervisorError::Signal {
                pid,
                reason: "Operation not permitted".to_string(),
            });
        }
        self.terminated.lock().unwrap().push(pid);
        if self.alive.lock().unwrap().remove(&pid) {
            Ok(StopKind::Graceful)
        } else {
            Ok(StopKind::AlreadyStopped)
        }
    }

    async fn list_by_name_substring(&self, substring: &str) -> Vec<ProcessDescriptor> {
        let alive = self.alive.lock().unwrap().clone();
        let cmdlines = self.cmdlines.lock().unwrap();
        let mut found: Vec<ProcessDescriptor> = alive
            .into_iter()
            .filter_map(|pid| {
                let args = cmdlines.get(&pid)?;
                let name = args.first()?.clone();
                if !name.contains(substring) {
                    return None;
                }
                Some(ProcessDescriptor {
                    pid,
                    name,
                    status: "Run".to_string(),
                    config_file: ProcessDescriptor::config_from_args(args),
                    cmdline: args.join(" "),
                    ppid: Some(1),
                    cpu_percent: 0.0,
                    memory_mb: 12.5,
                    start_time: None,
                    config_id: None,
                })
            })
            .collect();
        found.sort_by_key(|d| d.pid);
        found
    }

    async fn run_captured(
        &self,
        executable: &str,
        _args: &[String],
        _timeout: Duration,
    ) -> Result<CapturedRun> {
        if !self.installed.load(Ordering::SeqCst) {
            return Err(SupervisorError::ExecutableMissing(executable.to_string()));
        }
        Ok(self.captured.lock().unwrap().clone().unwrap_or(CapturedRun {
            success: true,
            exit_code: Some(0),
            stdout: "Telegraf 1.30.0".to_string(),
            stderr: String::new(),
        }))
    }
}

/// 内存日志存储，可以让写入失败
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
    batches: AtomicUsize,
    pub fail_appends: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// append_batch 成功的次数
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn messages_for(&self, pid: u32) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.process_pid == Some(pid))
            .map(|e| e.message.clone())
            .collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(SupervisorError::LogWrite("disk full".to_string()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn append_batch(&self, entries: &[LogEntry]) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(SupervisorError::LogWrite("disk full".to_string()));
        }
        self.entries.lock().unwrap().extend_from_slice(entries);
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        pid: u32,
        limit: usize,
        stream: Option<StreamType>,
    ) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.process_pid == Some(pid))
            .filter(|e| stream.map_or(true, |s| e.stream_type == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn historical_summary(&self) -> Result<Vec<HistoricalProcessSummary>> {
        Ok(Vec::new())
    }

    async fn purge(&self, pids: &[u32]) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.process_pid.map_or(true, |pid| !pids.contains(&pid)));
        Ok(before - entries.len())
    }
}
