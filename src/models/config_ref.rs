use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 指向一个 Telegraf 配置文件的不透明引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigRef {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

impl ConfigRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
        }
    }
}
