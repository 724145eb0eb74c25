// config.rs
// 启动器全局配置结构体及其默认实现，包含仓库、预训练权重、数据集、训练参数、分布式启动参数和调度器作业参数。
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 训练框架仓库信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// 仓库地址
    pub url: String,
    /// 克隆目录（相对于工作目录）
    pub dir: PathBuf,
    /// 是否递归初始化子模块
    pub submodules: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            url: "https://github.com/LiheYoung/UniMatch-V2.git".to_string(),
            dir: PathBuf::from("UniMatch-V2"),
            submodules: true,
        }
    }
}

/// 预训练骨干网络权重
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// 下载地址
    pub url: String,
    /// 下载目录（相对于仓库目录）
    pub dir: PathBuf,
    /// 下载后的文件名
    pub file: String,
    /// 训练入口期望的链接目录（相对于仓库目录）
    pub link_dir: PathBuf,
    /// 训练入口期望的文件名
    pub link_name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            url: "https://dl.fbaipublicfiles.com/dinov2/dinov2_vits14/dinov2_vits14_pretrain.pth"
                .to_string(),
            dir: PathBuf::from("pretrained_models"),
            file: "dinov2_vits14_pretrain.pth".to_string(),
            link_dir: PathBuf::from("pretrained"),
            link_name: "dinov2_small.pth".to_string(),
        }
    }
}

/// 数据集目录映射
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// 真实数据所在目录（相对于工作目录）
    pub source: PathBuf,
    /// 训练框架读取的数据根目录（相对于仓库目录）
    pub root: PathBuf,
    /// 需要链接的子目录
    pub subdirs: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/gf-7-building-3bands"),
            root: PathBuf::from("data/gf7-building"),
            subdirs: vec!["Train".to_string(), "Val".to_string(), "Test".to_string()],
        }
    }
}

/// 一次训练运行的命名参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub dataset: String,
    pub method: String,
    pub exp: String,
    pub split: String,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            dataset: "gf7-building".to_string(),
            method: "unimatch_v2".to_string(),
            exp: "dinov2_small".to_string(),
            split: "1_32".to_string(),
        }
    }
}

/// 分布式启动参数和命名约定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchParams {
    /// 每个节点的进程数（即GPU数）
    pub nproc: usize,
    /// 主节点端口
    pub port: u16,
    /// 主节点地址
    pub master_addr: String,
    /// Python解释器
    pub python: String,
    pub config_dir: PathBuf,
    pub splits_dir: PathBuf,
    pub exp_dir: PathBuf,
    /// 日志文件名，位于保存目录下
    pub log_file: String,
}

impl Default for LaunchParams {
    /// 默认配置：单进程，端口29500
    fn default() -> Self {
        Self {
            nproc: 1,
            port: 29500,
            master_addr: "localhost".to_string(),
            python: "python".to_string(),
            config_dir: PathBuf::from("configs"),
            splits_dir: PathBuf::from("splits"),
            exp_dir: PathBuf::from("exp"),
            log_file: "out.log".to_string(),
        }
    }
}

impl LaunchParams {
    /// 用命令行位置参数覆盖进程数和端口
    pub fn with_overrides(mut self, nproc: Option<usize>, port: Option<u16>) -> Self {
        if let Some(nproc) = nproc {
            self.nproc = nproc;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

/// 宿主机到容器的挂载映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl FromStr for MountPoint {
    type Err = Error;

    /// 解析 `host:container` 形式的挂载描述
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((host, container)) if !host.is_empty() && !container.is_empty() => Ok(Self {
                host: PathBuf::from(host),
                container: PathBuf::from(container),
            }),
            _ => Err(Error::ConfigError(format!(
                "挂载描述应为 host:container 形式: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// 调度器作业参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    pub partition: String,
    /// 申请的GPU数量
    pub gpus: usize,
    /// 最长运行时间，如 24:00:00
    pub time: String,
    /// 容器镜像
    pub image: Option<String>,
    pub mounts: Vec<MountPoint>,
    /// 作业在容器内的工作目录
    pub workdir: PathBuf,
    pub stdout_pattern: String,
    pub stderr_pattern: String,
    /// 生成的作业脚本存放目录（相对于工作目录）
    pub script_dir: PathBuf,
    /// 分配到节点后执行的命令，进程数和端口会追加在末尾
    pub command: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: "unimatch-v2".to_string(),
            partition: "gpu".to_string(),
            gpus: 1,
            time: "24:00:00".to_string(),
            image: None,
            mounts: Vec::new(),
            workdir: PathBuf::from("/workspace"),
            stdout_pattern: "logs/%x-%j.out".to_string(),
            stderr_pattern: "logs/%x-%j.err".to_string(),
            script_dir: PathBuf::from("jobs"),
            command: vec![
                "unimatch-launch".to_string(),
                "--config".to_string(),
                "launch.toml".to_string(),
                "run".to_string(),
            ],
        }
    }
}

impl JobConfig {
    /// #SBATCH 指令值不做引号转义，不能为空或含空白字符
    pub fn validate(&self) -> Result<()> {
        let mut fields = vec![
            ("name", self.name.clone()),
            ("partition", self.partition.clone()),
            ("time", self.time.clone()),
            ("stdout_pattern", self.stdout_pattern.clone()),
            ("stderr_pattern", self.stderr_pattern.clone()),
        ];
        if let Some(ref image) = self.image {
            fields.push(("image", image.clone()));
        }
        fields.extend(self.mounts.iter().map(|m| ("mounts", m.to_string())));

        for (field, value) in fields {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(Error::ConfigError(format!(
                    "作业参数 {} 不能为空或包含空白字符: {:?}",
                    field, value
                )));
            }
        }
        if self.gpus == 0 {
            return Err(Error::ConfigError("作业参数 gpus 必须大于0".to_string()));
        }
        Ok(())
    }
}

/// 启动器全局配置，所有相对路径都基于 `work_dir` 解析
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub work_dir: PathBuf,
    pub repo: RepoConfig,
    pub checkpoint: CheckpointConfig,
    pub dataset: DatasetConfig,
    pub run: RunParams,
    pub launch: LaunchParams,
    pub job: JobConfig,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            repo: RepoConfig::default(),
            checkpoint: CheckpointConfig::default(),
            dataset: DatasetConfig::default(),
            run: RunParams::default(),
            launch: LaunchParams::default(),
            job: JobConfig::default(),
        }
    }
}

impl LaunchConfig {
    /// 从TOML文件加载配置，相对的 `work_dir` 以配置文件所在目录为基准
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("无法读取配置文件 {}: {}", path.display(), e)))?;
        let mut config: LaunchConfig = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("解析配置文件 {} 失败: {}", path.display(), e)))?;

        if config.work_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.work_dir = base.join(&config.work_dir);
        }
        Ok(config)
    }

    /// 仓库克隆目录
    pub fn repo_dir(&self) -> PathBuf {
        self.work_dir.join(&self.repo.dir)
    }

    /// 下载后的权重文件路径
    pub fn checkpoint_path(&self) -> PathBuf {
        self.repo_dir()
            .join(&self.checkpoint.dir)
            .join(&self.checkpoint.file)
    }

    /// 训练入口期望的权重路径（符号链接）
    pub fn checkpoint_link(&self) -> PathBuf {
        self.repo_dir()
            .join(&self.checkpoint.link_dir)
            .join(&self.checkpoint.link_name)
    }

    pub fn dataset_source(&self) -> PathBuf {
        self.work_dir.join(&self.dataset.source)
    }

    pub fn dataset_root(&self) -> PathBuf {
        self.repo_dir().join(&self.dataset.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_launch_defaults() {
        let params = LaunchParams::default();
        assert_eq!(params.nproc, 1);
        assert_eq!(params.port, 29500);
        assert_eq!(params.master_addr, "localhost");
    }

    #[test]
    fn test_overrides() {
        let params = LaunchParams::default().with_overrides(Some(4), Some(30000));
        assert_eq!(params.nproc, 4);
        assert_eq!(params.port, 30000);

        let params = LaunchParams::default().with_overrides(None, None);
        assert_eq!(params.nproc, 1);
        assert_eq!(params.port, 29500);
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("launch.toml");
        fs::write(
            &path,
            r#"
work_dir = "runs"

[run]
dataset = "pascal"
split = "732"

[launch]
port = 30000

[job]
partition = "lrz-hgx-h100"
gpus = 4
mounts = [{ host = "/dss/data", container = "/workspace" }]
"#,
        )
        .unwrap();

        let config = LaunchConfig::load(&path).unwrap();
        assert_eq!(config.work_dir, dir.path().join("runs"));
        assert_eq!(config.run.dataset, "pascal");
        assert_eq!(config.run.split, "732");
        // 未给出的字段保留默认值
        assert_eq!(config.run.method, "unimatch_v2");
        assert_eq!(config.launch.nproc, 1);
        assert_eq!(config.launch.port, 30000);
        assert_eq!(config.job.gpus, 4);
        assert_eq!(config.job.mounts[0].to_string(), "/dss/data:/workspace");
        assert_eq!(config.checkpoint.link_name, "dinov2_small.pth");
    }

    #[test]
    fn test_load_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[launch]\nport = \"not a port\"\n").unwrap();

        let err = LaunchConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_sample_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../launch.toml");
        let config = LaunchConfig::load(&path).unwrap();
        assert_eq!(config.job.mounts.len(), 1);
        assert_eq!(config.job.command.last().map(String::as_str), Some("run"));
        assert_eq!(config.launch.port, 29500);
    }

    #[test]
    fn test_missing_config_file() {
        let err = LaunchConfig::load("/nonexistent/launch.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_resolved_paths() {
        let config = LaunchConfig {
            work_dir: PathBuf::from("/scratch"),
            ..Default::default()
        };
        assert_eq!(config.repo_dir(), PathBuf::from("/scratch/UniMatch-V2"));
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/scratch/UniMatch-V2/pretrained_models/dinov2_vits14_pretrain.pth")
        );
        assert_eq!(
            config.checkpoint_link(),
            PathBuf::from("/scratch/UniMatch-V2/pretrained/dinov2_small.pth")
        );
        assert_eq!(
            config.dataset_source(),
            PathBuf::from("/scratch/data/gf-7-building-3bands")
        );
    }

    #[test]
    fn test_mount_parse() {
        let mount: MountPoint = "/dss/home:/workspace".parse().unwrap();
        assert_eq!(mount.host, PathBuf::from("/dss/home"));
        assert_eq!(mount.container, PathBuf::from("/workspace"));
        assert!("no-separator".parse::<MountPoint>().is_err());
        assert!(":/workspace".parse::<MountPoint>().is_err());
    }

    #[test]
    fn test_job_validate() {
        assert!(JobConfig::default().validate().is_ok());

        let job = JobConfig {
            name: "gf7 1_32".to_string(),
            ..Default::default()
        };
        assert!(matches!(job.validate(), Err(Error::ConfigError(_))));

        let job = JobConfig {
            mounts: vec!["/dss/my home:/workspace".parse().unwrap()],
            ..Default::default()
        };
        assert!(job.validate().is_err());

        let job = JobConfig {
            partition: String::new(),
            ..Default::default()
        };
        assert!(job.validate().is_err());
    }
}
