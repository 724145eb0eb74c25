// step.rs
// 流水线步骤及其状态，描述每个步骤的生命周期。
use serde::{Deserialize, Serialize};
use std::fmt;

/// 流水线中的固定步骤，按执行顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CloneRepo,
    InitSubmodules,
    DownloadCheckpoint,
    LinkCheckpoint,
    LinkDataset,
    Train,
}

impl Step {
    /// 环境准备阶段的步骤
    pub const BOOTSTRAP: [Step; 5] = [
        Step::CloneRepo,
        Step::InitSubmodules,
        Step::DownloadCheckpoint,
        Step::LinkCheckpoint,
        Step::LinkDataset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::CloneRepo => "clone_repo",
            Step::InitSubmodules => "init_submodules",
            Step::DownloadCheckpoint => "download_checkpoint",
            Step::LinkCheckpoint => "link_checkpoint",
            Step::LinkDataset => "link_dataset",
            Step::Train => "train",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 步骤状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// 等待执行
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 无需执行，包含跳过原因
    Skipped(String),
    /// 执行失败，包含失败原因
    Failed(String),
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => f.write_str("pending"),
            StepStatus::Running => f.write_str("running"),
            StepStatus::Completed => f.write_str("completed"),
            StepStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            StepStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// 单个步骤的执行结果（非失败情况）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped(String),
}

impl From<StepOutcome> for StepStatus {
    fn from(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::Completed => StepStatus::Completed,
            StepOutcome::Skipped(reason) => StepStatus::Skipped(reason),
        }
    }
}

/// 步骤执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
}

impl StepReport {
    pub fn pending(step: Step) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
        }
    }
}
