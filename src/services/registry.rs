use crate::error::{Result, SupervisorError};
use crate::models::{ManagedProcess, ProcessStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// 受管进程记录的持久化接口。每次修改都是一个独立提交的单元，后写者胜出。
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ManagedProcess>>;

    /// pid 会被复用，多条命中时优先返回运行中且最近更新的记录
    async fn find_by_pid(&self, pid: u32) -> Result<Option<ManagedProcess>>;

    async fn find_by_config(&self, config_id: &str) -> Result<Option<ManagedProcess>>;

    async fn create(&self, record: ManagedProcess) -> Result<ManagedProcess>;

    /// 整条覆盖写入
    async fn save(&self, record: &ManagedProcess) -> Result<()>;

    async fn update_status(&self, id: &str, status: ProcessStatus, at: DateTime<Utc>) -> Result<()>;

    async fn list_running(&self) -> Result<Vec<ManagedProcess>>;

    async fn list_all(&self) -> Result<Vec<ManagedProcess>>;

    async fn remove(&self, id: &str) -> Result<Option<ManagedProcess>>;
}

fn last_touched(record: &ManagedProcess) -> DateTime<Utc> {
    record.updated_at.unwrap_or(record.created_at)
}

/// 选出最相关的一条: 运行中优先，其次按最近更新时间
fn best_match<'a>(records: impl Iterator<Item = &'a ManagedProcess>) -> Option<ManagedProcess> {
    records
        .max_by_key(|r| (r.is_running(), last_touched(r)))
        .cloned()
}

/// JSON 文件注册表。
///
/// 同一个文件可能被多个服务进程同时打开，每次操作前都从磁盘重新加载，
/// 修改只在内存副本上进行并立即写回。
pub struct FileRegistry {
    path: Option<PathBuf>,
    records: Mutex<HashMap<String, ManagedProcess>>,
}

impl FileRegistry {
    /// 打开注册表文件，不存在时从空表开始
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let list: Vec<ManagedProcess> =
                serde_json::from_str(&content).map_err(SupervisorError::registry)?;
            list.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            HashMap::new()
        };

        info!(
            "[Registry] 已加载 {} 条进程记录: {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    /// 不落盘，测试使用
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// 加锁并用磁盘上的最新内容替换内存副本
    async fn load(&self) -> Result<MutexGuard<'_, HashMap<String, ManagedProcess>>> {
        let mut records = self.records.lock().await;
        let Some(path) = &self.path else {
            return Ok(records);
        };

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let list: Vec<ManagedProcess> =
                    serde_json::from_str(&content).map_err(SupervisorError::registry)?;
                *records = list.into_iter().map(|r| (r.id.clone(), r)).collect();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => records.clear(),
            Err(e) => return Err(e.into()),
        }
        Ok(records)
    }

    /// 先写临时文件再重命名，读者不会看到写了一半的内容
    async fn persist(&self, records: &HashMap<String, ManagedProcess>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut list: Vec<&ManagedProcess> = records.values().collect();
        list.sort_by_key(|r| r.created_at);
        let json = serde_json::to_string_pretty(&list).map_err(SupervisorError::registry)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // 每次写入用独立的临时文件，多个句柄同时保存时不会互相覆盖
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("[Registry] 已保存 {} 条记录", list.len());
        Ok(())
    }
}

#[async_trait]
impl ProcessRegistry for FileRegistry {
    async fn find_by_id(&self, id: &str) -> Result<Option<ManagedProcess>> {
        Ok(self.load().await?.get(id).cloned())
    }

    async fn find_by_pid(&self, pid: u32) -> Result<Option<ManagedProcess>> {
        let records = self.load().await?;
        Ok(best_match(
            records.values().filter(|r| r.os_pid == Some(pid)),
        ))
    }

    async fn find_by_config(&self, config_id: &str) -> Result<Option<ManagedProcess>> {
        let records = self.load().await?;
        Ok(best_match(
            records.values().filter(|r| r.config_id() == Some(config_id)),
        ))
    }

    async fn create(&self, record: ManagedProcess) -> Result<ManagedProcess> {
        let mut records = self.load().await?;
        if records.contains_key(&record.id) {
            return Err(SupervisorError::Registry(format!(
                "记录已存在: {}",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        self.persist(&records).await?;
        info!("[Registry] 新建进程记录: {} ({})", record.name, record.id);
        Ok(record)
    }

    async fn save(&self, record: &ManagedProcess) -> Result<()> {
        let mut records = self.load().await?;
        records.insert(record.id.clone(), record.clone());
        self.persist(&records).await
    }

    async fn update_status(&self, id: &str, status: ProcessStatus, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.load().await?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| SupervisorError::ProcessNotFound(id.to_string()))?;

        match status {
            ProcessStatus::Stopped => record.mark_stopped(at),
            ProcessStatus::Running => {
                record.status = ProcessStatus::Running;
                record.updated_at = Some(at);
            }
        }
        self.persist(&records).await
    }

    async fn list_running(&self) -> Result<Vec<ManagedProcess>> {
        let records = self.load().await?;
        let mut running: Vec<ManagedProcess> =
            records.values().filter(|r| r.is_running()).cloned().collect();
        running.sort_by_key(|r| r.created_at);
        Ok(running)
    }

    async fn list_all(&self) -> Result<Vec<ManagedProcess>> {
        let records = self.load().await?;
        let mut all: Vec<ManagedProcess> = records.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }

    async fn remove(&self, id: &str) -> Result<Option<ManagedProcess>> {
        let mut records = self.load().await?;
        let removed = records.remove(id);
        if removed.is_some() {
            self.persist(&records).await?;
            info!("[Registry] 已删除进程记录: {}", id);
        }
        Ok(removed)
    }
}
