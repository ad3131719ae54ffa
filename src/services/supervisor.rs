use crate::error::{RestartStage, Result, SupervisorError};
use crate::models::{
    ConfigRef, ConfigTestReport, ManagedProcess, ProcessDescriptor, ProcessListing,
    ProcessStatus, RestartOutcome, StartedProcess, StopOutcome, SupervisorSettings,
};
use crate::services::{ConfigStore, LogCapturePipe, LogSink, ProcessGateway, ProcessRegistry};
use crate::utils::{config_stem, log_file_name, pending_log_file_name};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 编排 Telegraf 进程的启动、停止、重启，并修正注册表与操作系统之间的偏差。
///
/// 所有依赖都在构造时注入，每个服务进程只创建一个实例，通过引用传给请求处理方。
pub struct Supervisor {
    gateway: Arc<dyn ProcessGateway>,
    registry: Arc<dyn ProcessRegistry>,
    sink: Arc<dyn LogSink>,
    configs: Arc<dyn ConfigStore>,
    settings: SupervisorSettings,
    spawn_seq: AtomicU64,
}

impl Supervisor {
    pub fn new(
        gateway: Arc<dyn ProcessGateway>,
        registry: Arc<dyn ProcessRegistry>,
        sink: Arc<dyn LogSink>,
        configs: Arc<dyn ConfigStore>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            gateway,
            registry,
            sink,
            configs,
            settings,
            spawn_seq: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<dyn ProcessGateway> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<dyn ProcessRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    pub fn configs(&self) -> &Arc<dyn ConfigStore> {
        &self.configs
    }

    /// 启动一个 Telegraf 进程并开始采集它的输出。
    ///
    /// 不检查同一个配置是否已有进程在运行，调用方需要先调用 [`Supervisor::find_config_in_use`]。
    pub async fn start(
        &self,
        config_path: &Path,
        config_name: &str,
        process_name: Option<String>,
    ) -> Result<StartedProcess> {
        if !tokio::fs::metadata(config_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(SupervisorError::ConfigNotFound(config_path.to_path_buf()));
        }

        let executable = &self.settings.executable;
        if !self
            .gateway
            .check_executable(executable, self.settings.version_check_timeout())
            .await
        {
            return Err(SupervisorError::ExecutableMissing(executable.clone()));
        }

        tokio::fs::create_dir_all(&self.settings.log_dir).await?;
        let start_time = Utc::now();
        let stem = config_stem(config_name);
        let seq = self.spawn_seq.fetch_add(1, Ordering::SeqCst);
        let pending_path = self.settings.log_dir.join(pending_log_file_name(
            &stem,
            start_time.timestamp_millis(),
            seq,
        ));
        let output = tokio::fs::File::create(&pending_path).await?.into_std().await;

        let args = vec![
            "--config".to_string(),
            config_path.to_string_lossy().to_string(),
        ];
        let pid = match self.gateway.spawn(executable, &args, output).await {
            Ok(pid) => pid,
            Err(e) => {
                let _ = tokio::fs::remove_file(&pending_path).await;
                return Err(e);
            }
        };

        let log_path = self
            .finalize_log_path(&pending_path, &stem, pid, start_time.timestamp_millis())
            .await;

        tokio::time::sleep(self.settings.start_grace()).await;
        if !self.gateway.is_alive(pid) {
            let output = tokio::fs::read(&log_path)
                .await
                .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
                .unwrap_or_default();
            error!("[Supervisor] 进程 {} 启动后立即退出: {}", pid, output);
            return Err(SupervisorError::ImmediateExit { pid, output });
        }

        let process_name =
            process_name.unwrap_or_else(|| format!("telegraf_{}_{}", config_name, pid));

        LogCapturePipe::new(
            pid,
            process_name.clone(),
            config_path.to_string_lossy().to_string(),
            log_path.clone(),
            self.gateway.clone(),
            self.sink.clone(),
            self.settings.tail_poll(),
            self.settings.file_wait(),
        )
        .spawn();

        info!(
            "[Supervisor] 已启动 {} (PID: {}), 日志: {}",
            process_name,
            pid,
            log_path.display()
        );
        Ok(StartedProcess {
            process_id: None,
            pid,
            process_name,
            config_file: config_path.to_path_buf(),
            log_file_path: log_path,
            start_time,
        })
    }

    /// 拿到 pid 后把临时日志文件改成正式名称，子进程持有的文件描述符不受影响
    async fn finalize_log_path(
        &self,
        pending: &Path,
        stem: &str,
        pid: u32,
        started_millis: i64,
    ) -> PathBuf {
        let final_path = self
            .settings
            .log_dir
            .join(log_file_name(stem, pid, started_millis));
        match tokio::fs::rename(pending, &final_path).await {
            Ok(()) => final_path,
            Err(e) => {
                warn!(
                    "[Supervisor] 重命名日志文件失败，保留 {}: {}",
                    pending.display(),
                    e
                );
                pending.to_path_buf()
            }
        }
    }

    /// 停止进程。进程已不存在也算成功。
    pub async fn stop(&self, pid: u32, grace: Option<Duration>) -> Result<StopOutcome> {
        let grace = grace.unwrap_or_else(|| self.settings.stop_grace());
        let kind = self.gateway.terminate(pid, grace).await?;
        let outcome = StopOutcome::new(pid, kind);
        info!("[Supervisor] {}", outcome.message);
        Ok(outcome)
    }

    /// 用同一个配置重启，成功后记录被更新并写回注册表
    pub async fn restart(&self, record: &mut ManagedProcess) -> Result<RestartOutcome> {
        // 没有配置就不能重新拉起，先检查再停止
        let stored = record
            .config
            .clone()
            .ok_or_else(|| SupervisorError::NoAssociatedConfig(record.id.clone()))?;
        let config = self
            .relaunch_config(stored)
            .await
            .map_err(|e| SupervisorError::restart(RestartStage::Resolve, e))?;

        let previous_pid = record.os_pid;
        if let Some(pid) = previous_pid {
            self.stop(pid, None)
                .await
                .map_err(|e| SupervisorError::restart(RestartStage::Stop, e))?;
            let stopped_at = Utc::now();
            record.mark_stopped(stopped_at);
            // 之后的启动可能失败，注册表里不能留下指向死进程的 running
            self.registry
                .save(record)
                .await
                .map_err(|e| SupervisorError::restart(RestartStage::Persist, e))?;
            tokio::time::sleep(self.settings.restart_settle()).await;
        }

        let started = self
            .start(&config.path, &config.name, None)
            .await
            .map_err(|e| SupervisorError::restart(RestartStage::Start, e))?;

        record.mark_started(&started);
        record.config = Some(config);
        self.registry
            .save(record)
            .await
            .map_err(|e| SupervisorError::restart(RestartStage::Persist, e))?;

        info!(
            "[Supervisor] 已重启 {}: {:?} -> {}",
            record.id, previous_pid, started.pid
        );
        Ok(RestartOutcome {
            process_id: record.id.clone(),
            previous_pid,
            new_pid: started.pid,
        })
    }

    /// 重启使用的配置: 记录里的路径仍然存在就直接使用，否则按 id 从配置目录重新解析
    async fn relaunch_config(&self, stored: ConfigRef) -> Result<ConfigRef> {
        let exists = tokio::fs::metadata(&stored.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if exists {
            return Ok(stored);
        }
        debug!(
            "[Supervisor] 配置文件 {} 已不存在，按 id {} 重新解析",
            stored.path.display(),
            stored.id
        );
        self.configs.resolve(&stored.id).await
    }

    /// 枚举所有 Telegraf 进程，按是否在 `known_pids` 中分成受管和非受管两组
    pub async fn list(&self, known_pids: &HashSet<u32>) -> Result<ProcessListing> {
        let mut listing = ProcessListing::default();
        for mut descriptor in self
            .gateway
            .list_by_name_substring(&self.settings.process_match)
            .await
        {
            if known_pids.contains(&descriptor.pid) {
                descriptor.config_id = self
                    .registry
                    .find_by_pid(descriptor.pid)
                    .await?
                    .and_then(|r| r.config_id().map(str::to_string));
                listing.managed.push(descriptor);
            } else {
                listing.non_managed.push(descriptor);
            }
        }
        Ok(listing)
    }

    /// 读取时自愈: 记录为 running 但进程已不存在，则改为 stopped。返回是否做了修正。
    pub async fn reconcile(&self, record: &mut ManagedProcess) -> Result<bool> {
        if record.status != ProcessStatus::Running {
            return Ok(false);
        }
        if let Some(pid) = record.os_pid {
            if self.gateway.is_alive(pid) {
                return Ok(false);
            }
        }

        let now = Utc::now();
        record.mark_stopped(now);
        self.registry
            .update_status(&record.id, ProcessStatus::Stopped, now)
            .await?;
        warn!(
            "[Supervisor] 进程 {} (PID: {:?}) 已不存在，状态修正为 stopped",
            record.name, record.os_pid
        );
        Ok(true)
    }

    /// 所有受管记录，返回前逐条自愈
    pub async fn managed_processes(&self) -> Result<Vec<ManagedProcess>> {
        let mut records = self.registry.list_all().await?;
        for record in records.iter_mut() {
            self.reconcile(record).await?;
        }
        Ok(records)
    }

    pub async fn get_process(&self, id: &str) -> Result<ManagedProcess> {
        let mut record = self
            .registry
            .find_by_id(id)
            .await?
            .ok_or_else(|| SupervisorError::ProcessNotFound(id.to_string()))?;
        self.reconcile(&mut record).await?;
        Ok(record)
    }

    /// 查找正在使用该配置文件名的 Telegraf 进程
    pub async fn find_config_in_use(&self, config_name: &str) -> Option<ProcessDescriptor> {
        self.gateway
            .list_by_name_substring(&self.settings.process_match)
            .await
            .into_iter()
            .find(|d| d.config_file_name().as_deref() == Some(config_name))
    }

    /// 启动并把结果绑定到注册表: 同一配置已有记录则复用，否则新建
    pub async fn start_managed(
        &self,
        config: ConfigRef,
        process_name: Option<String>,
    ) -> Result<(ManagedProcess, StartedProcess)> {
        let mut started = self
            .start(&config.path, &config.name, process_name)
            .await?;

        let record = match self.registry.find_by_config(&config.id).await? {
            Some(mut record) => {
                record.mark_started(&started);
                record.config = Some(config);
                self.registry.save(&record).await?;
                record
            }
            None => {
                let mut record = ManagedProcess::new(started.process_name.clone(), Some(config));
                record.mark_started(&started);
                self.registry.create(record).await?
            }
        };

        started.process_id = Some(record.id.clone());
        Ok((record, started))
    }

    /// 停止受管进程并更新注册表。
    ///
    /// 信号发送失败时只有在确认进程已退出的情况下才标记为 stopped。
    pub async fn stop_managed(&self, pid: u32) -> Result<StopOutcome> {
        let record = self.registry.find_by_pid(pid).await?;
        match self.stop(pid, None).await {
            Ok(outcome) => {
                if let Some(record) = record {
                    self.registry
                        .update_status(&record.id, ProcessStatus::Stopped, Utc::now())
                        .await?;
                }
                Ok(outcome)
            }
            Err(e) => {
                if let Some(record) = record {
                    if !self.gateway.is_alive(pid) {
                        self.registry
                            .update_status(&record.id, ProcessStatus::Stopped, Utc::now())
                            .await?;
                    }
                }
                Err(e)
            }
        }
    }

    /// `telegraf --config <path> --test`
    pub async fn test_config(&self, config_path: &Path) -> Result<ConfigTestReport> {
        if !config_path.is_file() {
            return Err(SupervisorError::ConfigNotFound(config_path.to_path_buf()));
        }

        let args = vec![
            "--config".to_string(),
            config_path.to_string_lossy().to_string(),
            "--test".to_string(),
        ];
        let run = self
            .gateway
            .run_captured(
                &self.settings.executable,
                &args,
                self.settings.config_test_timeout(),
            )
            .await?;

        let output = if run.success {
            run.stdout
        } else {
            let code = run
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!("{}\n退出码: {}", run.stderr.trim_end(), code)
        };
        Ok(ConfigTestReport {
            passed: run.success,
            output,
        })
    }

    /// 对所有 running 记录执行一次自愈检查，返回被修正的数量
    pub async fn sweep_once(&self) -> Result<usize> {
        let mut corrected = 0;
        for mut record in self.registry.list_running().await? {
            if self.reconcile(&mut record).await? {
                corrected += 1;
            }
        }
        Ok(corrected)
    }

    /// 定时巡检那些长时间没有被读取的记录
    pub fn spawn_reconcile_sweep(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_once().await {
                    Ok(0) => {}
                    Ok(n) => info!("[Supervisor] 巡检修正了 {} 条记录", n),
                    Err(e) => warn!("[Supervisor] 巡检失败: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopKind;
    use crate::services::testing::{FakeGateway, MemorySink};
    use crate::services::{CapturedRun, DirectoryConfigStore, FileRegistry};
    use std::sync::atomic::Ordering;

    struct Fixture {
        _dir: tempfile::TempDir,
        gateway: Arc<FakeGateway>,
        registry: Arc<FileRegistry>,
        supervisor: Arc<Supervisor>,
        config_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = SupervisorSettings::rooted_at(dir.path());
        settings.start_grace_ms = 5;
        settings.restart_settle_ms = 5;
        settings.tail_poll_ms = 5;
        settings.file_wait_ms = 5;
        std::fs::create_dir_all(&settings.config_dir).unwrap();
        std::fs::write(settings.config_dir.join("cpu.conf"), "[agent]\n").unwrap();

        let gateway = Arc::new(FakeGateway::new());
        let registry = Arc::new(FileRegistry::in_memory());
        let config_dir = settings.config_dir.clone();
        let supervisor = Arc::new(Supervisor::new(
            gateway.clone(),
            registry.clone(),
            Arc::new(MemorySink::new()),
            Arc::new(DirectoryConfigStore::new(&config_dir)),
            settings,
        ));
        Fixture {
            _dir: dir,
            gateway,
            registry,
            supervisor,
            config_dir,
        }
    }

    fn cpu_config(f: &Fixture) -> ConfigRef {
        ConfigRef::new("cpu.conf", "cpu.conf", f.config_dir.join("cpu.conf"))
    }

    #[tokio::test]
    async fn missing_config_is_rejected_before_spawn() {
        let f = fixture();
        let err = f
            .supervisor
            .start(&f.config_dir.join("nope.conf"), "nope.conf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ConfigNotFound(_)));
        assert!(f.gateway.spawned().is_empty());
    }

    #[tokio::test]
    async fn missing_executable_is_rejected_before_spawn() {
        let f = fixture();
        f.gateway.installed.store(false, Ordering::SeqCst);
        let err = f
            .supervisor
            .start(&f.config_dir.join("cpu.conf"), "cpu.conf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ExecutableMissing(_)));
        assert!(f.gateway.spawned().is_empty());
    }

    #[tokio::test]
    async fn start_names_log_file_after_pid() {
        let f = fixture();
        let started = f
            .supervisor
            .start(&f.config_dir.join("cpu.conf"), "cpu.conf", None)
            .await
            .unwrap();

        assert!(f.gateway.is_alive(started.pid));
        assert_eq!(started.process_name, format!("telegraf_cpu.conf_{}", started.pid));
        let file_name = started
            .log_file_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        let parsed = crate::utils::parse_log_file_name(&file_name).unwrap();
        assert_eq!(parsed.pid, started.pid);
        assert_eq!(parsed.config, "cpu");
        assert!(started.log_file_path.exists());

        let call = &f.gateway.spawned()[0];
        assert_eq!(call.executable, "telegraf");
        assert_eq!(call.args[0], "--config");
    }

    #[tokio::test]
    async fn immediate_exit_reports_captured_output() {
        let f = fixture();
        f.gateway.exit_immediately.store(true, Ordering::SeqCst);
        *f.gateway.spawn_output.lock().unwrap() = "E! error loading config\n".to_string();

        let err = f
            .supervisor
            .start(&f.config_dir.join("cpu.conf"), "cpu.conf", None)
            .await
            .unwrap_err();
        match err {
            SupervisorError::ImmediateExit { output, .. } => {
                assert_eq!(output, "E! error loading config")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let f = fixture();
        let started = f
            .supervisor
            .start(&f.config_dir.join("cpu.conf"), "cpu.conf", None)
            .await
            .unwrap();

        let first = f.supervisor.stop(started.pid, None).await.unwrap();
        assert_eq!(first.kind, StopKind::Graceful);
        assert!(!f.gateway.is_alive(started.pid));

        let second = f.supervisor.stop(started.pid, None).await.unwrap();
        assert_eq!(second.kind, StopKind::AlreadyStopped);
    }

    #[tokio::test]
    async fn start_managed_reuses_record_for_same_config() {
        let f = fixture();
        let (first, started) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();
        assert_eq!(started.process_id.as_deref(), Some(first.id.as_str()));

        f.supervisor.stop_managed(started.pid).await.unwrap();
        let stopped = f.registry.find_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(stopped.status, ProcessStatus::Stopped);
        assert!(stopped.stop_time.is_some());

        let (second, restarted) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.os_pid, Some(restarted.pid));
        assert!(second.stop_time.is_none());
        assert_eq!(f.registry.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn signal_failure_leaves_live_record_running() {
        let f = fixture();
        let (record, started) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();
        f.gateway.deny_signals_for(started.pid);

        let err = f.supervisor.stop_managed(started.pid).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Signal { .. }));
        let stored = f.registry.find_by_id(&record.id).await.unwrap().unwrap();
        assert!(stored.is_running());
    }

    #[tokio::test]
    async fn crashed_process_is_reconciled_on_read() {
        let f = fixture();
        let (record, started) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();

        f.gateway.kill_externally(started.pid);

        let read = f.supervisor.get_process(&record.id).await.unwrap();
        assert_eq!(read.status, ProcessStatus::Stopped);
        assert!(read.stop_time.is_some());
        assert!(f.registry.list_running().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_corrects_unread_records() {
        let f = fixture();
        let (_, a) = f.supervisor.start_managed(cpu_config(&f), None).await.unwrap();
        f.gateway.kill_externally(a.pid);

        assert_eq!(f.supervisor.sweep_once().await.unwrap(), 1);
        assert_eq!(f.supervisor.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn restart_replaces_pid_and_keeps_config() {
        let f = fixture();
        let (mut record, started) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();

        let outcome = f.supervisor.restart(&mut record).await.unwrap();

        assert_eq!(outcome.previous_pid, Some(started.pid));
        assert_ne!(outcome.new_pid, started.pid);
        assert!(!f.gateway.is_alive(started.pid));
        assert_eq!(record.os_pid, Some(outcome.new_pid));
        assert!(record.is_running());
        assert_eq!(record.config_id(), Some("cpu.conf"));

        let stored = f.registry.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.os_pid, Some(outcome.new_pid));
    }

    #[tokio::test]
    async fn restart_without_config_does_not_stop() {
        let f = fixture();
        f.gateway.add_foreign(555, &["telegraf"]);
        let mut record = ManagedProcess::new("orphan".to_string(), None);
        record.os_pid = Some(555);
        record.status = ProcessStatus::Running;

        let err = f.supervisor.restart(&mut record).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NoAssociatedConfig(_)));
        assert!(f.gateway.is_alive(555));
        assert!(f.gateway.terminated().is_empty());
    }

    #[tokio::test]
    async fn restart_uses_stored_path_outside_config_dir() {
        let f = fixture();
        let outside = f._dir.path().join("elsewhere");
        std::fs::create_dir_all(&outside).unwrap();
        let path = outside.join("edge.conf");
        std::fs::write(&path, "[agent]\n").unwrap();

        let config = ConfigRef::new("edge-agent", "edge-agent", &path);
        let (mut record, started) = f.supervisor.start_managed(config, None).await.unwrap();

        let outcome = f.supervisor.restart(&mut record).await.unwrap();
        assert_ne!(outcome.new_pid, started.pid);
        assert_eq!(record.config.as_ref().unwrap().path, path);
        let call = f.gateway.spawned().last().cloned().unwrap();
        assert_eq!(call.args[1], path.to_string_lossy());

        std::fs::remove_file(&path).unwrap();
        let err = f.supervisor.restart(&mut record).await.unwrap_err();
        match err {
            SupervisorError::Restart { stage, source } => {
                assert_eq!(stage, RestartStage::Resolve);
                assert!(matches!(*source, SupervisorError::ConfigNotFound(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(f.gateway.is_alive(outcome.new_pid));
    }

    #[tokio::test]
    async fn restart_reresolves_moved_config_by_id() {
        let f = fixture();
        let moved = f._dir.path().join("old").join("cpu.conf");
        let (mut record, _) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();
        record.config = Some(ConfigRef::new("cpu.conf", "cpu.conf", &moved));

        f.supervisor.restart(&mut record).await.unwrap();
        assert_eq!(
            record.config.as_ref().unwrap().path,
            f.config_dir.join("cpu.conf")
        );
    }

    #[tokio::test]
    async fn restart_reports_failed_stage() {
        let f = fixture();
        let (mut record, _) = f
            .supervisor
            .start_managed(cpu_config(&f), None)
            .await
            .unwrap();
        f.gateway.installed.store(false, Ordering::SeqCst);

        let err = f.supervisor.restart(&mut record).await.unwrap_err();
        match err {
            SupervisorError::Restart { stage, source } => {
                assert_eq!(stage, RestartStage::Start);
                assert!(matches!(*source, SupervisorError::ExecutableMissing(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let stored = f.registry.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessStatus::Stopped);
        assert!(stored.stop_time.is_some());
    }

    #[tokio::test]
    async fn list_partitions_by_known_pids() {
        let f = fixture();
        let (_, started) = f.supervisor.start_managed(cpu_config(&f), None).await.unwrap();
        f.gateway
            .add_foreign(9001, &["telegraf", "--config", "/opt/other/mem.conf"]);
        f.gateway.add_foreign(9002, &["nginx"]);

        let known: HashSet<u32> = [started.pid].into_iter().collect();
        let listing = f.supervisor.list(&known).await.unwrap();

        assert_eq!(listing.managed.len(), 1);
        assert_eq!(listing.managed[0].config_id.as_deref(), Some("cpu.conf"));
        assert_eq!(listing.non_managed.len(), 1);
        assert_eq!(listing.non_managed[0].pid, 9001);

        let in_use = f.supervisor.find_config_in_use("mem.conf").await.unwrap();
        assert_eq!(in_use.pid, 9001);
        assert!(f.supervisor.find_config_in_use("disk.conf").await.is_none());
    }

    #[tokio::test]
    async fn config_test_reports_stderr_on_failure() {
        let f = fixture();
        *f.gateway.captured.lock().unwrap() = Some(CapturedRun {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "E! plugin inputs.foo not found\n".to_string(),
        });

        let report = f
            .supervisor
            .test_config(&f.config_dir.join("cpu.conf"))
            .await
            .unwrap();
        assert!(!report.passed);
        assert!(report.output.contains("inputs.foo"));
        assert!(report.output.contains("1"));
    }
}
