use crate::error::{Result, SupervisorError};
use crate::models::{console_home, SupervisorSettings};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// 读写 Supervisor 的 JSON 配置文件
pub struct SettingsStore;

impl SettingsStore {
    /// ~/.telegraf-console/supervisor.json
    pub fn default_path() -> PathBuf {
        console_home().join("supervisor.json")
    }

    /// 文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<SupervisorSettings> {
        if !path.exists() {
            info!("[Settings] 未找到 {}，使用默认配置", path.display());
            return Ok(SupervisorSettings::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            SupervisorError::InvalidRequest(format!("解析配置文件 {} 失败: {}", path.display(), e))
        })
    }

    pub fn save(path: &Path, settings: &SupervisorSettings) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(settings).map_err(|e| {
            SupervisorError::InvalidRequest(format!("序列化配置失败: {}", e))
        })?;
        fs::write(path, json)?;
        Ok(())
    }
}
