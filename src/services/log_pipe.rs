use crate::models::{LogEntry, StreamType};
use crate::services::{LogSession, LogSink, ProcessGateway};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 管道结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeEnd {
    /// 进程退出，剩余内容已读完
    ProcessExited,
    /// 进程在日志文件出现之前就退出了
    FileNeverAppeared,
    /// 读取文件出错
    ReadError(String),
}

#[derive(Debug, Clone)]
pub struct PipeReport {
    pub pid: u32,
    pub lines_written: usize,
    pub lines_failed: usize,
    pub end: PipeEnd,
}

/// 单次事务最多提交的行数；读到文件末尾时不足一批也会提交
const PIPE_BATCH: usize = 64;

/// 跟踪一个进程的输出文件 (tail -f)，把每一行写入日志存储。
///
/// 没有取消信号：进程消失后读完剩余内容就自行结束。
pub struct LogCapturePipe {
    pid: u32,
    process_name: String,
    config_reference: String,
    stream_type: StreamType,
    log_path: PathBuf,
    gateway: Arc<dyn ProcessGateway>,
    sink: Arc<dyn LogSink>,
    poll: Duration,
    file_wait: Duration,
}

impl LogCapturePipe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: u32,
        process_name: String,
        config_reference: String,
        log_path: PathBuf,
        gateway: Arc<dyn ProcessGateway>,
        sink: Arc<dyn LogSink>,
        poll: Duration,
        file_wait: Duration,
    ) -> Self {
        Self {
            pid,
            process_name,
            config_reference,
            stream_type: StreamType::Stdout,
            log_path,
            gateway,
            sink,
            poll,
            file_wait,
        }
    }

    pub fn spawn(self) -> JoinHandle<PipeReport> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> PipeReport {
        let mut session = LogSession::open(self.sink.clone(), self.pid, PIPE_BATCH);
        info!(
            "[LogPipe] 开始采集 {} (PID: {}): {}",
            self.process_name,
            self.pid,
            self.log_path.display()
        );

        let end = match self.pump(&mut session).await {
            Ok(end) => end,
            Err(e) => {
                warn!("[LogPipe] 读取 {} 失败: {}", self.log_path.display(), e);
                PipeEnd::ReadError(e.to_string())
            }
        };

        let (lines_written, lines_failed) = session.close().await;
        info!(
            "[LogPipe] 进程 {} 的日志采集结束: {:?}, 写入 {} 行, 失败 {} 行",
            self.pid, end, lines_written, lines_failed
        );
        PipeReport {
            pid: self.pid,
            lines_written,
            lines_failed,
            end,
        }
    }

    async fn pump(&self, session: &mut LogSession) -> std::io::Result<PipeEnd> {
        let file = loop {
            match tokio::fs::File::open(&self.log_path).await {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !self.gateway.is_alive(self.pid) {
                        return Ok(PipeEnd::FileNeverAppeared);
                    }
                    tokio::time::sleep(self.file_wait).await;
                }
                Err(e) => return Err(e),
            }
        };

        let mut reader = BufReader::new(file);
        // 跨多次读取拼接的当前行，遇到换行才提交
        let mut line = Vec::new();

        loop {
            let read = reader.read_until(b'\n', &mut line).await?;
            if read > 0 {
                if line.ends_with(b"\n") {
                    self.emit(session, &line).await;
                    line.clear();
                }
                continue;
            }

            if self.gateway.is_alive(self.pid) {
                session.flush().await;
                tokio::time::sleep(self.poll).await;
                continue;
            }

            // 进程已退出，读完退出前写入的内容
            loop {
                let read = reader.read_until(b'\n', &mut line).await?;
                if read == 0 {
                    break;
                }
                if line.ends_with(b"\n") {
                    self.emit(session, &line).await;
                    line.clear();
                }
            }
            if !line.is_empty() {
                self.emit(session, &line).await;
            }
            return Ok(PipeEnd::ProcessExited);
        }
    }

    async fn emit(&self, session: &mut LogSession, raw: &[u8]) {
        let Some(message) = decode_line(raw) else {
            return;
        };
        session
            .write(LogEntry {
                timestamp: Utc::now(),
                process_pid: Some(self.pid),
                process_name: self.process_name.clone(),
                config_reference: self.config_reference.clone(),
                stream_type: self.stream_type,
                message,
            })
            .await;
    }
}

/// 去掉行尾换行符；空行返回 None
pub(crate) fn decode_line(raw: &[u8]) -> Option<String> {
    let trimmed = raw
        .strip_suffix(b"\n")
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .unwrap_or(raw);
    let text = String::from_utf8_lossy(trimmed);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}
