use once_cell::sync::Lazy;
use regex::Regex;

/// 日志文件名格式: telegraf_{config}_{pid}_{unix_millis}.log
/// config 里可能带下划线，所以从右往左解析
static LOG_FILE_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^telegraf_(?P<config>.+)_(?P<pid>\d+)_(?P<ts>\d+)\.log$").ok());

const PREFIX: &str = "telegraf_";
const SUFFIX: &str = ".log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogName {
    pub config: String,
    pub pid: u32,
    pub started_millis: i64,
}

/// 配置文件名去掉 .conf 后缀，并把不适合做文件名的字符替换掉
pub fn config_stem(config_name: &str) -> String {
    let base = config_name.strip_suffix(".conf").unwrap_or(config_name);
    let stem: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if stem.is_empty() {
        "config".to_string()
    } else {
        stem
    }
}

/// 启动前使用的临时文件名，拿到 pid 后再重命名
pub fn pending_log_file_name(stem: &str, started_millis: i64, seq: u64) -> String {
    format!("{}{}_spawn{}_{}{}", PREFIX, stem, seq, started_millis, SUFFIX)
}

pub fn log_file_name(stem: &str, pid: u32, started_millis: i64) -> String {
    format!("{}{}_{}_{}{}", PREFIX, stem, pid, started_millis, SUFFIX)
}

pub fn is_log_file_name(file_name: &str) -> bool {
    file_name.starts_with(PREFIX) && file_name.ends_with(SUFFIX)
}

pub fn parse_log_file_name(file_name: &str) -> Option<ParsedLogName> {
    let caps = LOG_FILE_NAME.as_ref()?.captures(file_name)?;
    Some(ParsedLogName {
        config: caps.name("config")?.as_str().to_string(),
        pid: caps.name("pid")?.as_str().parse().ok()?,
        started_millis: caps.name("ts")?.as_str().parse().ok()?,
    })
}
