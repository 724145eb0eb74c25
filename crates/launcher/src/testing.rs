// testing.rs
// 测试用的命令执行器：记录所有命令，并模拟 git clone 和 curl 下载在磁盘上的效果。
use crate::error::{Error, Result};
use crate::launch::{CommandRunner, CommandSpec};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<CommandSpec>>,
    logs: RefCell<Vec<PathBuf>>,
    fail_program: Option<String>,
    stdout: String,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 程序名为 `program` 的命令以退出码1失败
    pub fn failing_on(program: &str) -> Self {
        Self {
            fail_program: Some(program.to_string()),
            ..Self::default()
        }
    }

    /// `output` 返回固定的标准输出
    pub fn with_stdout(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    pub fn log_paths(&self) -> Vec<PathBuf> {
        self.logs.borrow().clone()
    }

    fn record(&self, spec: &CommandSpec) -> Result<()> {
        self.calls.borrow_mut().push(spec.clone());
        if self.fail_program.as_deref() == Some(spec.program.as_str()) {
            return Err(Error::CommandFailed(spec.to_string(), Some(1)));
        }
        Self::simulate(spec)
    }

    fn simulate(spec: &CommandSpec) -> Result<()> {
        match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
            ("git", Some("clone")) => {
                if let Some(dest) = spec.args.last() {
                    fs::create_dir_all(Path::new(dest).join(".git"))?;
                }
            }
            ("curl", _) => {
                if let Some(out) = spec.value_after("-o") {
                    fs::write(out, b"weights")?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<()> {
        self.record(spec)
    }

    fn output(&self, spec: &CommandSpec) -> Result<String> {
        self.record(spec)?;
        Ok(self.stdout.clone())
    }

    fn run_logged(&self, spec: &CommandSpec, log_path: &Path) -> Result<()> {
        self.logs.borrow_mut().push(log_path.to_path_buf());
        self.record(spec)
    }
}
