// manifest.rs
// 启动记录：每次训练启动时在保存目录写入 launch.json，记录运行参数和完整命令。
use crate::config::RunParams;
use crate::error::Result;
use crate::paths::RunPaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "launch.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchManifest {
    pub run_id: Uuid,
    /// Unix时间戳（秒）
    pub created_at: u64,
    pub run: RunParams,
    pub nproc: usize,
    pub port: u16,
    pub paths: RunPaths,
    /// 可直接粘贴到shell中的启动命令
    pub command: String,
}

impl LaunchManifest {
    pub fn new(run: RunParams, nproc: usize, port: u16, paths: RunPaths, command: String) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            run_id: Uuid::new_v4(),
            created_at,
            run,
            nproc,
            port,
            paths,
            command,
        }
    }

    /// 写入 `dir/launch.json`，覆盖上一次的记录
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
