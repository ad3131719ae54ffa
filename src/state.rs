use crate::error::Result;
use crate::models::SupervisorSettings;
use crate::services::{
    ConfigStore, DirectoryConfigStore, FileRegistry, LogSink, ProcessGateway, ProcessRegistry,
    RedbLogSink, Supervisor, SystemGateway,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// 进程级共享状态，只创建一次并以引用传给各个命令。
///
/// 同一个数据目录可以被多个服务进程同时打开，注册表和日志库都按操作访问磁盘。
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    /// 使用真实的操作系统网关和磁盘存储
    pub fn open(settings: SupervisorSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)?;
        std::fs::create_dir_all(&settings.log_dir)?;

        let registry = Arc::new(FileRegistry::open(settings.registry_path())?);
        let sink = Arc::new(RedbLogSink::open(settings.log_store_path())?);
        let configs = Arc::new(DirectoryConfigStore::new(&settings.config_dir));
        info!(
            "[AppState] 数据目录: {}, 日志目录: {}",
            settings.data_dir.display(),
            settings.log_dir.display()
        );

        Ok(Self::with_components(
            Arc::new(SystemGateway::new()),
            registry,
            sink,
            configs,
            settings,
        ))
    }

    pub fn with_components(
        gateway: Arc<dyn ProcessGateway>,
        registry: Arc<dyn ProcessRegistry>,
        sink: Arc<dyn LogSink>,
        configs: Arc<dyn ConfigStore>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            supervisor: Arc::new(Supervisor::new(gateway, registry, sink, configs, settings)),
        }
    }

    /// 按配置启动定时巡检，间隔为 0 时不启动
    pub fn start_background_sweep(&self) -> Option<JoinHandle<()>> {
        let interval = self.supervisor.settings().sweep_interval()?;
        Some(self.supervisor.clone().spawn_reconcile_sweep(interval))
    }
}
