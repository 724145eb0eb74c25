// bootstrap.rs
// 环境准备：克隆训练框架仓库、初始化子模块、下载预训练权重，并建立权重和数据集的符号链接。
// 每一步都是幂等的，重复执行不会重复克隆或下载。
use crate::config::LaunchConfig;
use crate::error::{Error, Result};
use crate::launch::{CommandRunner, CommandSpec};
use crate::step::StepOutcome;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 环境准备器
pub struct Bootstrapper<'a, R: CommandRunner + ?Sized> {
    config: &'a LaunchConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> Bootstrapper<'a, R> {
    pub fn new(config: &'a LaunchConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    pub fn clone_command(&self) -> CommandSpec {
        CommandSpec::new("git")
            .arg("clone")
            .arg(self.config.repo.url.as_str())
            .arg(self.config.repo_dir().display().to_string())
    }

    pub fn submodule_command(&self) -> CommandSpec {
        CommandSpec::new("git")
            .args(["submodule", "update", "--init", "--recursive"])
            .current_dir(self.config.repo_dir())
    }

    pub fn download_command(&self) -> CommandSpec {
        CommandSpec::new("curl")
            .args(["-L", "--fail", "-o"])
            .arg(self.partial_checkpoint_path().display().to_string())
            .arg(self.config.checkpoint.url.as_str())
    }

    /// 下载过程中使用的临时文件，下载成功后才重命名为正式文件名
    fn partial_checkpoint_path(&self) -> PathBuf {
        let path = self.config.checkpoint_path();
        path.with_file_name(format!("{}.part", self.config.checkpoint.file))
    }

    /// 仓库不存在时克隆
    pub fn clone_repo(&self) -> Result<StepOutcome> {
        let repo_dir = self.config.repo_dir();
        if repo_dir.join(".git").exists() {
            tracing::info!("仓库 {} 已存在，跳过克隆。", repo_dir.display());
            return Ok(StepOutcome::Skipped("仓库已存在".to_string()));
        }

        tracing::info!("克隆仓库: {} -> {}", self.config.repo.url, repo_dir.display());
        fs::create_dir_all(&self.config.work_dir)?;
        self.runner.run(&self.clone_command())?;
        Ok(StepOutcome::Completed)
    }

    /// 递归初始化子模块
    pub fn init_submodules(&self) -> Result<StepOutcome> {
        if !self.config.repo.submodules {
            return Ok(StepOutcome::Skipped("已禁用子模块初始化".to_string()));
        }
        tracing::info!("初始化子模块...");
        self.runner.run(&self.submodule_command())?;
        Ok(StepOutcome::Completed)
    }

    /// 权重文件不存在时下载
    pub fn download_checkpoint(&self) -> Result<StepOutcome> {
        let checkpoint = self.config.checkpoint_path();
        if checkpoint.exists() {
            tracing::info!("权重 {} 已存在，跳过下载。", checkpoint.display());
            return Ok(StepOutcome::Skipped("权重已存在".to_string()));
        }

        if let Some(parent) = checkpoint.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = self.partial_checkpoint_path();
        remove_if_exists(&partial)?;

        tracing::info!("开始下载预训练权重: {}", self.config.checkpoint.url);
        if let Err(e) = self.runner.run(&self.download_command()) {
            if let Err(cleanup) = remove_if_exists(&partial) {
                tracing::warn!("清理未完成的下载文件失败: {}", cleanup);
            }
            return Err(Error::DownloadError(
                format!("{} 下载失败: {}", self.config.checkpoint.url, e),
                e.exit_code(),
            ));
        }

        if !partial.exists() {
            return Err(Error::DownloadError(
                format!("下载命令成功但未生成文件: {}", partial.display()),
                None,
            ));
        }
        fs::rename(&partial, &checkpoint)?;
        tracing::info!("预训练权重下载完成: {}", checkpoint.display());
        Ok(StepOutcome::Completed)
    }

    /// 将训练入口期望的权重路径链接到下载的权重
    pub fn link_checkpoint(&self) -> Result<StepOutcome> {
        force_symlink(&self.config.checkpoint_path(), &self.config.checkpoint_link())?;
        Ok(StepOutcome::Completed)
    }

    /// 将数据集根目录下的各子目录链接到真实数据
    pub fn link_dataset(&self) -> Result<StepOutcome> {
        let source = self.config.dataset_source();
        let root = self.config.dataset_root();
        fs::create_dir_all(&root)?;
        for subdir in &self.config.dataset.subdirs {
            force_symlink(&source.join(subdir), &root.join(subdir))?;
        }
        Ok(StepOutcome::Completed)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 创建指向 `target` 的符号链接 `link`。
///
/// 已存在的符号链接会被替换；若 `link` 是普通文件或目录则报错，不会覆盖真实数据。
pub fn force_symlink(target: &Path, link: &Path) -> Result<()> {
    if !target.exists() {
        return Err(Error::LinkError(format!(
            "链接目标不存在: {}",
            target.display()
        )));
    }
    let target = std::path::absolute(target)?;

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            tracing::debug!("替换已有符号链接: {}", link.display());
            remove_symlink(link)?;
        }
        Ok(_) => {
            return Err(Error::LinkError(format!(
                "{} 已存在且不是符号链接",
                link.display()
            )));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    create_symlink(&target, link).map_err(|e| {
        Error::LinkError(format!(
            "无法创建 {} -> {}: {}",
            link.display(),
            target.display(),
            e
        ))
    })?;
    tracing::info!("链接: {} -> {}", link.display(), target.display());
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(unix)]
fn remove_symlink(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn remove_symlink(link: &Path) -> io::Result<()> {
    fs::remove_file(link).or_else(|_| fs::remove_dir(link))
}
