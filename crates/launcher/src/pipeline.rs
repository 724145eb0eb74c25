// pipeline.rs
// 流水线编排：按固定顺序执行环境准备各步骤，遇到第一个失败立即停止，然后启动训练。
use crate::bootstrap::Bootstrapper;
use crate::config::LaunchConfig;
use crate::error::Result;
use crate::launch::{CommandRunner, CommandSpec, TrainCommand};
use crate::manifest::LaunchManifest;
use crate::paths::RunPaths;
use crate::step::{Step, StepOutcome, StepReport, StepStatus};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// 计划中的一个步骤及其等价的shell命令，用于 dry run 展示
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub step: Step,
    pub command: String,
}

/// 训练流水线，持有显式配置和命令执行器
pub struct Pipeline<R: CommandRunner> {
    config: LaunchConfig,
    runner: R,
    reports: Vec<StepReport>,
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn new(config: LaunchConfig, runner: R) -> Self {
        let reports = Step::BOOTSTRAP
            .iter()
            .chain(std::iter::once(&Step::Train))
            .map(|step| StepReport::pending(*step))
            .collect();
        Self {
            config,
            runner,
            reports,
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn status(&self, step: Step) -> Option<&StepStatus> {
        self.reports
            .iter()
            .find(|r| r.step == step)
            .map(|r| &r.status)
    }

    /// 派生路径（相对于仓库目录）
    pub fn paths(&self) -> RunPaths {
        RunPaths::derive(&self.config.run, &self.config.launch)
    }

    pub fn train_command(&self) -> CommandSpec {
        TrainCommand::build(
            &self.config.run,
            &self.config.launch,
            &self.paths(),
            &self.config.repo_dir(),
        )
    }

    /// 列出全部步骤及对应命令，不执行任何操作
    pub fn plan(&self) -> Vec<PlannedStep> {
        let bootstrap = Bootstrapper::new(&self.config, &self.runner);
        let config = &self.config;
        let link = |target: PathBuf, at: PathBuf| {
            CommandSpec::new("ln")
                .arg("-sfn")
                .arg(target.display().to_string())
                .arg(at.display().to_string())
                .to_string()
        };

        Step::BOOTSTRAP
            .iter()
            .chain(std::iter::once(&Step::Train))
            .map(|&step| {
                let command = match step {
                    Step::CloneRepo => bootstrap.clone_command().to_string(),
                    Step::InitSubmodules => bootstrap.submodule_command().to_string(),
                    Step::DownloadCheckpoint => bootstrap.download_command().to_string(),
                    Step::LinkCheckpoint => link(config.checkpoint_path(), config.checkpoint_link()),
                    Step::LinkDataset => config
                        .dataset
                        .subdirs
                        .iter()
                        .map(|s| link(config.dataset_source().join(s), config.dataset_root().join(s)))
                        .collect::<Vec<_>>()
                        .join(" && "),
                    Step::Train => format!(
                        "{} 2>&1 | tee -a {}",
                        self.train_command(),
                        self.paths().log_path.display()
                    ),
                };
                PlannedStep { step, command }
            })
            .collect()
    }

    /// 依次执行环境准备步骤
    pub fn bootstrap(&mut self) -> Result<()> {
        for step in Step::BOOTSTRAP {
            self.execute(step)?;
        }
        Ok(())
    }

    /// 创建保存目录、写入启动记录并启动训练进程，返回训练进程的执行结果
    pub fn train(&mut self) -> Result<()> {
        self.execute(Step::Train)
    }

    /// 环境准备和训练依次执行
    pub fn run(&mut self) -> Result<()> {
        self.bootstrap()?;
        self.train()
    }

    fn execute(&mut self, step: Step) -> Result<()> {
        self.mark(step, StepStatus::Running);
        let bootstrap = Bootstrapper::new(&self.config, &self.runner);
        let outcome = match step {
            Step::CloneRepo => bootstrap.clone_repo(),
            Step::InitSubmodules => bootstrap.init_submodules(),
            Step::DownloadCheckpoint => bootstrap.download_checkpoint(),
            Step::LinkCheckpoint => bootstrap.link_checkpoint(),
            Step::LinkDataset => bootstrap.link_dataset(),
            Step::Train => self.launch_training(),
        };
        self.finish(step, outcome)
    }

    fn launch_training(&self) -> Result<StepOutcome> {
        let repo_dir = self.config.repo_dir();
        let paths = self.paths();
        let command = self.train_command();

        let save_dir = repo_dir.join(&paths.save_path);
        fs::create_dir_all(&save_dir)?;

        let manifest = LaunchManifest::new(
            self.config.run.clone(),
            self.config.launch.nproc,
            self.config.launch.port,
            paths.clone(),
            command.to_string(),
        );
        let manifest_path = manifest.write(&save_dir)?;
        tracing::info!("运行ID {}，启动记录: {}", manifest.run_id, manifest_path.display());

        self.runner.run_logged(&command, &repo_dir.join(&paths.log_path))?;
        tracing::info!("训练进程正常退出");
        Ok(StepOutcome::Completed)
    }

    fn mark(&mut self, step: Step, status: StepStatus) {
        if let Some(report) = self.reports.iter_mut().find(|r| r.step == step) {
            report.status = status;
        }
    }

    fn finish(&mut self, step: Step, outcome: Result<StepOutcome>) -> Result<()> {
        match outcome {
            Ok(outcome) => {
                self.mark(step, outcome.into());
                Ok(())
            }
            Err(e) => {
                tracing::error!("步骤 {} 失败: {}", step, e);
                self.mark(step, StepStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}
