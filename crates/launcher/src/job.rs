// job.rs
// 调度器作业：生成带 #SBATCH 指令的作业脚本，并通过 sbatch 提交。
use crate::config::{JobConfig, LaunchConfig, LaunchParams};
use crate::error::{Error, Result};
use crate::launch::{shell_quote, CommandRunner, CommandSpec};
use std::fmt::{self, Write as _};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// 调度器分配的作业ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JobId {
    /// 解析 sbatch 的输出，例如 `Submitted batch job 123456`
    pub fn parse_sbatch(output: &str) -> Result<Self> {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix("Submitted batch job "))
            .and_then(|id| id.trim().parse().ok())
            .map(JobId)
            .ok_or_else(|| Error::SubmitError(format!("无法解析 sbatch 输出: {}", output.trim())))
    }
}

/// 作业脚本生成
pub struct JobScript;

impl JobScript {
    /// 申请的GPU数不少于启动的进程数
    pub fn render(job: &JobConfig, launch: &LaunchParams) -> String {
        let mut script = String::from("#!/bin/bash\n");
        let mut directive = |line: String| {
            let _ = writeln!(script, "#SBATCH {}", line);
        };

        directive(format!("--job-name={}", job.name));
        directive(format!("--partition={}", job.partition));
        directive(format!("--gres=gpu:{}", job.gpus.max(launch.nproc)));
        directive(format!("--output={}", job.stdout_pattern));
        directive(format!("--error={}", job.stderr_pattern));
        directive(format!("--time={}", job.time));
        if let Some(ref image) = job.image {
            directive(format!("--container-image={}", image));
        }
        if !job.mounts.is_empty() {
            let mounts: Vec<String> = job.mounts.iter().map(ToString::to_string).collect();
            directive(format!("--container-mounts={}", mounts.join(",")));
        }

        script.push_str("\nset -euo pipefail\n\n");
        let _ = writeln!(script, "cd {}", shell_quote(&job.workdir.display().to_string()));

        let command: Vec<String> = job
            .command
            .iter()
            .cloned()
            .chain([launch.nproc.to_string(), launch.port.to_string()])
            .map(|word| shell_quote(&word))
            .collect();
        let _ = writeln!(script, "{}", command.join(" "));
        script
    }
}

/// 作业提交器
pub struct JobSubmitter<'a, R: CommandRunner + ?Sized> {
    config: &'a LaunchConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> JobSubmitter<'a, R> {
    pub fn new(config: &'a LaunchConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// 校验作业参数后生成脚本
    pub fn render(&self) -> Result<String> {
        self.config.job.validate()?;
        Ok(JobScript::render(&self.config.job, &self.config.launch))
    }

    /// 将脚本写入 `<script_dir>/<作业名>-<短ID>.sbatch`
    pub fn write_script(&self) -> Result<PathBuf> {
        let script = self.render()?;
        let dir = self.config.work_dir.join(&self.config.job.script_dir);
        fs::create_dir_all(&dir)?;

        let id = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("{}-{}.sbatch", self.config.job.name, &id[..8]));
        fs::write(&path, script)?;
        tracing::info!("作业脚本已写入: {}", path.display());
        Ok(path)
    }

    /// 写入脚本并执行 sbatch 提交
    pub fn submit(&self) -> Result<JobId> {
        let script = self.write_script()?;
        let sbatch = CommandSpec::new("sbatch")
            .arg(script.display().to_string())
            .current_dir(&self.config.work_dir);
        let output = self
            .runner
            .output(&sbatch)
            .map_err(|e| Error::SubmitError(e.to_string()))?;
        let job_id = JobId::parse_sbatch(&output)?;
        tracing::info!("作业已提交，ID: {}", job_id);
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountPoint;
    use crate::testing::RecordingRunner;

    fn job_config() -> JobConfig {
        JobConfig {
            name: "gf7-1_32".to_string(),
            partition: "lrz-hgx-h100-94x4".to_string(),
            gpus: 4,
            time: "2-00:00:00".to_string(),
            image: Some("nvcr.io#nvidia/pytorch:24.01-py3".to_string()),
            mounts: vec![MountPoint {
                host: PathBuf::from("/dss/home/seminar-rs"),
                container: PathBuf::from("/workspace"),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_directives() {
        let launch = LaunchParams::default().with_overrides(Some(4), Some(30000));
        let script = JobScript::render(&job_config(), &launch);

        assert!(script.starts_with("#!/bin/bash\n"));
        for directive in [
            "#SBATCH --job-name=gf7-1_32",
            "#SBATCH --partition=lrz-hgx-h100-94x4",
            "#SBATCH --gres=gpu:4",
            "#SBATCH --output=logs/%x-%j.out",
            "#SBATCH --error=logs/%x-%j.err",
            "#SBATCH --time=2-00:00:00",
            "#SBATCH --container-image=nvcr.io#nvidia/pytorch:24.01-py3",
            "#SBATCH --container-mounts=/dss/home/seminar-rs:/workspace",
        ] {
            assert!(
                script.lines().any(|l| l == directive),
                "缺少指令: {}",
                directive
            );
        }
        assert!(script.contains("cd /workspace\n"));
        assert!(script.ends_with("unimatch-launch --config launch.toml run 4 30000\n"));
    }

    #[test]
    fn test_render_without_container() {
        let script = JobScript::render(&JobConfig::default(), &LaunchParams::default());
        assert!(!script.contains("--container-image"));
        assert!(!script.contains("--container-mounts"));
        assert!(script.ends_with("run 1 29500\n"));
    }

    #[test]
    fn test_directives_precede_commands() {
        let script = JobScript::render(&job_config(), &LaunchParams::default());
        let last_directive = script.rfind("#SBATCH").unwrap();
        let first_command = script.find("set -euo pipefail").unwrap();
        assert!(last_directive < first_command);
    }

    #[test]
    fn test_parse_sbatch_output() {
        assert_eq!(
            JobId::parse_sbatch("Submitted batch job 4711\n").unwrap(),
            JobId(4711)
        );
        // sbatch 可能先输出警告
        assert_eq!(
            JobId::parse_sbatch("sbatch: warning: memory not set\nSubmitted batch job 88\n").unwrap(),
            JobId(88)
        );
        assert!(JobId::parse_sbatch("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_submit() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig {
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let runner = RecordingRunner::with_stdout("Submitted batch job 12345\n");

        let job_id = JobSubmitter::new(&config, &runner).submit().unwrap();
        assert_eq!(job_id, JobId(12345));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "sbatch");
        let script = PathBuf::from(&calls[0].args[0]);
        assert!(script.starts_with(dir.path().join("jobs")));
        assert!(fs::read_to_string(script).unwrap().contains("#SBATCH --gres=gpu:1"));
    }

    #[test]
    fn test_submit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig {
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let runner = RecordingRunner::failing_on("sbatch");

        let err = JobSubmitter::new(&config, &runner).submit().unwrap_err();
        assert!(matches!(err, Error::SubmitError(_)));
    }

    #[test]
    fn test_gpus_follow_process_count() {
        let job = JobConfig::default();
        assert_eq!(job.gpus, 1);
        let launch = LaunchParams::default().with_overrides(Some(4), Some(30000));
        let script = JobScript::render(&job, &launch);
        assert!(script.lines().any(|l| l == "#SBATCH --gres=gpu:4"));
        assert!(script.ends_with("run 4 30000\n"));
    }

    #[test]
    fn test_invalid_job_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LaunchConfig {
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.job.stdout_pattern = "logs/my job.out".to_string();
        let runner = RecordingRunner::new();

        let err = JobSubmitter::new(&config, &runner).submit().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(!dir.path().join("jobs").exists());
        assert!(runner.calls().is_empty());
    }
}
