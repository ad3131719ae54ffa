use crate::error::{Result, SupervisorError};
use crate::models::ConfigRef;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// 把配置 id 解析成磁盘上的文件
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn resolve(&self, config_id: &str) -> Result<ConfigRef>;
}

/// 配置 id 就是 `config_dir` 下的文件名
#[derive(Debug, Clone)]
pub struct DirectoryConfigStore {
    dir: PathBuf,
}

impl DirectoryConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_plain_file_name(config_id: &str) -> bool {
    let mut components = Path::new(config_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl ConfigStore for DirectoryConfigStore {
    async fn resolve(&self, config_id: &str) -> Result<ConfigRef> {
        if !is_plain_file_name(config_id) {
            return Err(SupervisorError::InvalidRequest(format!(
                "非法的配置名称: {}",
                config_id
            )));
        }

        let path = self.dir.join(config_id);
        if !tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(SupervisorError::ConfigNotFound(path));
        }

        Ok(ConfigRef::new(config_id, config_id, path))
    }
}
