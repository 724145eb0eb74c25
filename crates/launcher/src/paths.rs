// paths.rs
// 根据运行参数按固定命名约定推导配置文件、ID列表、保存目录和日志路径。
use crate::config::{LaunchParams, RunParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 一次训练运行的派生路径，均相对于仓库目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPaths {
    /// 训练配置文件
    pub config: PathBuf,
    /// 有标注样本ID列表
    pub labeled_id_path: PathBuf,
    /// 无标注样本ID列表
    pub unlabeled_id_path: PathBuf,
    /// 日志和模型输出目录
    pub save_path: PathBuf,
    /// 训练输出的日志文件
    pub log_path: PathBuf,
}

impl RunPaths {
    pub fn derive(run: &RunParams, launch: &LaunchParams) -> Self {
        let split_dir = launch.splits_dir.join(&run.dataset).join(&run.split);
        let save_path = launch
            .exp_dir
            .join(&run.dataset)
            .join(&run.method)
            .join(&run.exp)
            .join(&run.split);

        Self {
            config: launch.config_dir.join(format!("{}.yaml", run.dataset)),
            labeled_id_path: split_dir.join("labeled.txt"),
            unlabeled_id_path: split_dir.join("unlabeled.txt"),
            log_path: save_path.join(&launch.log_file),
            save_path,
        }
    }
}
