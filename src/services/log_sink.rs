use crate::error::{Result, SupervisorError};
use crate::models::{HistoricalProcessSummary, LogEntry, StreamType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// 键为 (pid, 序号)，同一 pid 的日志按写入顺序排列
const LOG_ENTRIES: TableDefinition<(u64, u64), &str> = TableDefinition::new("telegraf_logs");
// 键为 (pid, 进程名)，写入日志时同步维护
const SUMMARIES: TableDefinition<(u64, &str), &str> = TableDefinition::new("process_summaries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const NEXT_SEQ: &str = "next_seq";

/// 归档时无法解析出 pid 的日志使用的键
const NO_PID_KEY: u64 = u64::MAX;

/// 其他句柄占用数据库文件时的重试间隔和次数
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(20);
const OPEN_RETRIES: u32 = 250;

/// 只追加的日志存储
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> Result<()>;

    /// 在一个事务中写入多行
    async fn append_batch(&self, entries: &[LogEntry]) -> Result<()> {
        for entry in entries {
            self.append(entry).await?;
        }
        Ok(())
    }

    /// 最新的在前，最多返回 `limit` 条
    async fn query(
        &self,
        pid: u32,
        limit: usize,
        stream: Option<StreamType>,
    ) -> Result<Vec<LogEntry>>;

    async fn historical_summary(&self) -> Result<Vec<HistoricalProcessSummary>>;

    /// 按 pid 批量删除，返回删除的行数
    async fn purge(&self, pids: &[u32]) -> Result<usize>;
}

/// 一个采集任务持有的写入会话。
///
/// 行先在内存中攒批，满 `batch_size` 行或调用 [`LogSession::flush`] 时一次事务写入。
/// 会话被丢弃时剩余的行会交给后台任务写完。
pub struct LogSession {
    sink: Arc<dyn LogSink>,
    pid: u32,
    batch_size: usize,
    buffer: Vec<LogEntry>,
    written: usize,
    failed: usize,
}

impl LogSession {
    pub fn open(sink: Arc<dyn LogSink>, pid: u32, batch_size: usize) -> Self {
        debug!("[LogSink] PID {} 的写入会话已打开", pid);
        Self {
            sink,
            pid,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            written: 0,
            failed: 0,
        }
    }

    pub async fn write(&mut self, entry: LogEntry) {
        self.buffer.push(entry);
        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// 写入失败的行计入 `failed` 后丢弃，不会重试
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        match self.sink.append_batch(&batch).await {
            Ok(()) => self.written += batch.len(),
            Err(e) => {
                self.failed += batch.len();
                warn!("[LogSink] PID {} 写入 {} 行失败: {}", self.pid, batch.len(), e);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// 写完剩余的行并返回 (成功行数, 失败行数)
    pub async fn close(mut self) -> (usize, usize) {
        self.flush().await;
        (self.written, self.failed)
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            debug!(
                "[LogSink] PID {} 的写入会话已关闭: 成功 {}, 失败 {}",
                self.pid, self.written, self.failed
            );
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        let (sink, pid) = (self.sink.clone(), self.pid);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.append_batch(&batch).await {
                        warn!("[LogSink] PID {} 剩余 {} 行写入失败: {}", pid, batch.len(), e);
                    }
                });
            }
            Err(_) => warn!(
                "[LogSink] PID {} 的会话在运行时之外被丢弃，{} 行未写入",
                pid,
                batch.len()
            ),
        }
    }
}

fn pid_key(pid: Option<u32>) -> u64 {
    pid.map(u64::from).unwrap_or(NO_PID_KEY)
}

/// 汇总表中的一行，键里已有 pid 和进程名
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSummary {
    pid: Option<u32>,
    config_reference: String,
    start_time: DateTime<Utc>,
    stop_time: DateTime<Utc>,
    entry_count: usize,
}

impl StoredSummary {
    fn from_entry(entry: &LogEntry) -> Self {
        Self {
            pid: entry.process_pid,
            config_reference: entry.config_reference.clone(),
            start_time: entry.timestamp,
            stop_time: entry.timestamp,
            entry_count: 1,
        }
    }

    fn absorb(&mut self, other: &StoredSummary) {
        self.start_time = self.start_time.min(other.start_time);
        self.stop_time = self.stop_time.max(other.stop_time);
        self.entry_count += other.entry_count;
    }
}

/// 按 (pid, 进程名) 聚合一组日志
fn summarize<'a>(
    entries: impl Iterator<Item = &'a LogEntry>,
) -> HashMap<(u64, String), StoredSummary> {
    let mut groups: HashMap<(u64, String), StoredSummary> = HashMap::new();
    for entry in entries {
        let single = StoredSummary::from_entry(entry);
        groups
            .entry((pid_key(entry.process_pid), entry.process_name.clone()))
            .and_modify(|acc| acc.absorb(&single))
            .or_insert(single);
    }
    groups
}

/// 基于 redb 的日志存储。
///
/// redb 对数据库文件加排他锁，多个服务进程会共用同一个日志库，
/// 所以每次操作单独打开数据库，用完立即关闭。
#[derive(Clone)]
pub struct RedbLogSink {
    path: PathBuf,
    gate: Arc<Mutex<()>>,
}

impl RedbLogSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self::open_db(&path)?;
        // 先建表，之后的只读事务才能打开它们
        let txn = db.begin_write().map_err(SupervisorError::log_store)?;
        {
            let entries = txn
                .open_table(LOG_ENTRIES)
                .map_err(SupervisorError::log_store)?;
            let mut summaries = txn
                .open_table(SUMMARIES)
                .map_err(SupervisorError::log_store)?;
            txn.open_table(META).map_err(SupervisorError::log_store)?;

            // 旧库只有日志表，补建汇总
            if summaries.is_empty().map_err(SupervisorError::log_store)?
                && !entries.is_empty().map_err(SupervisorError::log_store)?
            {
                let mut existing = Vec::new();
                for item in entries.iter().map_err(SupervisorError::log_store)? {
                    let (_, value) = item.map_err(SupervisorError::log_store)?;
                    let entry: LogEntry =
                        serde_json::from_str(value.value()).map_err(SupervisorError::log_store)?;
                    existing.push(entry);
                }
                let groups = summarize(existing.iter());
                info!("[LogSink] 已为 {} 行旧日志补建 {} 条汇总", existing.len(), groups.len());
                for ((key, name), summary) in groups {
                    let value =
                        serde_json::to_string(&summary).map_err(SupervisorError::log_store)?;
                    summaries
                        .insert((key, name.as_str()), value.as_str())
                        .map_err(SupervisorError::log_store)?;
                }
            }
        }
        txn.commit().map_err(SupervisorError::log_store)?;
        drop(db);

        info!("[LogSink] 日志库已就绪: {}", path.display());
        Ok(Self {
            path,
            gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件被其他句柄占用时等待释放
    fn open_db(path: &Path) -> Result<Database> {
        let mut attempts = 0;
        loop {
            match Database::create(path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) if attempts < OPEN_RETRIES => {
                    attempts += 1;
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(DatabaseError::DatabaseAlreadyOpen) => {
                    return Err(SupervisorError::LogStore(format!(
                        "日志库被占用: {}",
                        path.display()
                    )))
                }
                Err(e) => return Err(SupervisorError::log_store(e)),
            }
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let gate = self.gate.clone();
        tokio::task::spawn_blocking(move || {
            let _held = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let db = Self::open_db(&path)?;
            f(&db)
        })
        .await
        .map_err(SupervisorError::log_store)?
    }

    fn insert_all(db: &Database, entries: &[LogEntry]) -> Result<()> {
        let txn = db.begin_write().map_err(SupervisorError::log_store)?;
        {
            let mut meta = txn.open_table(META).map_err(SupervisorError::log_store)?;
            let mut seq = meta
                .get(NEXT_SEQ)
                .map_err(SupervisorError::log_store)?
                .map(|guard| guard.value())
                .unwrap_or(0);

            let mut table = txn
                .open_table(LOG_ENTRIES)
                .map_err(SupervisorError::log_store)?;
            for entry in entries {
                let value = serde_json::to_string(entry).map_err(SupervisorError::log_store)?;
                table
                    .insert((pid_key(entry.process_pid), seq), value.as_str())
                    .map_err(SupervisorError::log_store)?;
                seq += 1;
            }

            meta.insert(NEXT_SEQ, seq)
                .map_err(SupervisorError::log_store)?;

            let mut summaries = txn
                .open_table(SUMMARIES)
                .map_err(SupervisorError::log_store)?;
            for ((key, name), mut summary) in summarize(entries.iter()) {
                let stored: Option<StoredSummary> = match summaries
                    .get((key, name.as_str()))
                    .map_err(SupervisorError::log_store)?
                {
                    Some(guard) => Some(
                        serde_json::from_str(guard.value()).map_err(SupervisorError::log_store)?,
                    ),
                    None => None,
                };
                if let Some(stored) = stored {
                    // 沿用最早一行的配置路径
                    summary.config_reference = stored.config_reference.clone();
                    summary.absorb(&stored);
                }
                let value = serde_json::to_string(&summary).map_err(SupervisorError::log_store)?;
                summaries
                    .insert((key, name.as_str()), value.as_str())
                    .map_err(SupervisorError::log_store)?;
            }
        }
        txn.commit().map_err(SupervisorError::log_store)
    }
}

#[async_trait]
impl LogSink for RedbLogSink {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |db| Self::insert_all(db, std::slice::from_ref(&entry)))
            .await
            .map_err(|e| SupervisorError::LogWrite(e.to_string()))
    }

    async fn append_batch(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries.to_vec();
        self.blocking(move |db| Self::insert_all(db, &entries))
            .await
            .map_err(|e| SupervisorError::LogWrite(e.to_string()))
    }

    async fn query(
        &self,
        pid: u32,
        limit: usize,
        stream: Option<StreamType>,
    ) -> Result<Vec<LogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.blocking(move |db| {
            let txn = db.begin_read().map_err(SupervisorError::log_store)?;
            let table = txn
                .open_table(LOG_ENTRIES)
                .map_err(SupervisorError::log_store)?;

            let key = u64::from(pid);
            let mut entries = Vec::new();
            for item in table
                .range((key, 0)..=(key, u64::MAX))
                .map_err(SupervisorError::log_store)?
                .rev()
            {
                let (_, value) = item.map_err(SupervisorError::log_store)?;
                let entry: LogEntry =
                    serde_json::from_str(value.value()).map_err(SupervisorError::log_store)?;
                if stream.map_or(true, |s| entry.stream_type == s) {
                    entries.push(entry);
                    if entries.len() >= limit {
                        break;
                    }
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn historical_summary(&self) -> Result<Vec<HistoricalProcessSummary>> {
        self.blocking(|db| {
            let txn = db.begin_read().map_err(SupervisorError::log_store)?;
            let table = txn
                .open_table(SUMMARIES)
                .map_err(SupervisorError::log_store)?;

            let mut summaries = Vec::new();
            for item in table.iter().map_err(SupervisorError::log_store)? {
                let (key, value) = item.map_err(SupervisorError::log_store)?;
                let (_, name) = key.value();
                let stored: StoredSummary =
                    serde_json::from_str(value.value()).map_err(SupervisorError::log_store)?;
                summaries.push(HistoricalProcessSummary {
                    pid: stored.pid,
                    name: name.to_string(),
                    config_reference: stored.config_reference,
                    start_time: stored.start_time,
                    stop_time: stored.stop_time,
                    entry_count: stored.entry_count,
                    status: "stopped".to_string(),
                });
            }
            summaries.sort_by(|a, b| b.stop_time.cmp(&a.stop_time));
            Ok(summaries)
        })
        .await
    }

    async fn purge(&self, pids: &[u32]) -> Result<usize> {
        let requested = pids.len();
        let pids = pids.to_vec();
        let deleted = self
            .blocking(move |db| {
                let txn = db.begin_write().map_err(SupervisorError::log_store)?;
                let mut deleted = 0;
                {
                    let mut table = txn
                        .open_table(LOG_ENTRIES)
                        .map_err(SupervisorError::log_store)?;
                    let mut summaries = txn
                        .open_table(SUMMARIES)
                        .map_err(SupervisorError::log_store)?;
                    for pid in &pids {
                        let key = u64::from(*pid);
                        let mut keys = Vec::new();
                        for item in table
                            .range((key, 0)..=(key, u64::MAX))
                            .map_err(SupervisorError::log_store)?
                        {
                            let (k, _) = item.map_err(SupervisorError::log_store)?;
                            keys.push(k.value());
                        }
                        for k in keys {
                            table.remove(k).map_err(SupervisorError::log_store)?;
                            deleted += 1;
                        }

                        let mut names = Vec::new();
                        for item in summaries
                            .range((key, "")..)
                            .map_err(SupervisorError::log_store)?
                        {
                            let (k, _) = item.map_err(SupervisorError::log_store)?;
                            let (summary_pid, name) = k.value();
                            if summary_pid != key {
                                break;
                            }
                            names.push(name.to_string());
                        }
                        for name in names {
                            summaries
                                .remove((key, name.as_str()))
                                .map_err(SupervisorError::log_store)?;
                        }
                    }
                }
                txn.commit().map_err(SupervisorError::log_store)?;
                Ok(deleted)
            })
            .await?;

        info!("[LogSink] 已删除 {} 条日志 ({} 个 PID)", deleted, requested);
        Ok(deleted)
    }
}
