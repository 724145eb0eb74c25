// launch.rs
// 外部命令描述与执行：构造分布式训练启动命令，并将训练进程的合并输出同时写入终端和日志文件。
use crate::config::{LaunchParams, RunParams};
use crate::error::{Error, Result};
use crate::paths::RunPaths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

/// 一条完整描述的外部命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// 工作目录，None表示继承当前进程
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// 取 `flag` 之后紧跟的参数值
    pub fn value_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// 按POSIX shell规则为单个词加引号
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// 外部命令执行接口
pub trait CommandRunner {
    /// 执行命令，继承标准输出和标准错误
    fn run(&self, spec: &CommandSpec) -> Result<()>;

    /// 执行命令并返回其标准输出
    fn output(&self, spec: &CommandSpec) -> Result<String>;

    /// 执行命令，合并输出同时写到终端和 `log_path`（追加写入）
    fn run_logged(&self, spec: &CommandSpec, log_path: &Path) -> Result<()>;
}

/// 基于 `std::process` 的命令执行器
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn check_status(spec: &CommandSpec, status: ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed(spec.to_string(), status.code()))
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<()> {
        tracing::debug!("执行: {}", spec);
        let status = spec
            .to_command()
            .status()
            .map_err(|e| Error::SpawnError(spec.program.clone(), e))?;
        Self::check_status(spec, status)
    }

    fn output(&self, spec: &CommandSpec) -> Result<String> {
        tracing::debug!("执行: {}", spec);
        let output = spec
            .to_command()
            .output()
            .map_err(|e| Error::SpawnError(spec.program.clone(), e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("{} 输出错误: {}", spec.program, stderr.trim());
        }
        Self::check_status(spec, output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_logged(&self, spec: &CommandSpec, log_path: &Path) -> Result<()> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let log = Arc::new(Mutex::new(log));

        tracing::info!("启动训练进程: {}", spec);
        tracing::info!("日志写入: {}", log_path.display());

        let mut child = spec
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SpawnError(spec.program.clone(), e))?;

        let streams: Vec<Box<dyn Read + Send>> = [
            child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
            child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        ]
        .into_iter()
        .flatten()
        .collect();

        let copiers: Vec<_> = streams
            .into_iter()
            .map(|stream| {
                let log = Arc::clone(&log);
                thread::spawn(move || tee_lines(stream, &log))
            })
            .collect();

        let status = child.wait()?;
        for copier in copiers {
            if copier.join().is_err() {
                tracing::warn!("日志复制线程异常退出");
            }
        }
        Self::check_status(spec, status)
    }
}

/// 逐行复制到终端和日志文件；按字节切分，非UTF-8输出原样保留
fn tee_lines(stream: impl Read, log: &Mutex<File>) {
    let reader = BufReader::new(stream);
    for line in reader.split(b'\n').map_while(std::result::Result::ok) {
        {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(&line);
            let _ = stdout.write_all(b"\n");
        }
        if let Ok(mut file) = log.lock() {
            let _ = file.write_all(&line);
            let _ = file.write_all(b"\n");
        }
    }
}

/// 分布式训练启动命令
pub struct TrainCommand;

impl TrainCommand {
    /// 构造 `torch.distributed.launch` 命令，工作目录为仓库目录
    pub fn build(
        run: &RunParams,
        launch: &LaunchParams,
        paths: &RunPaths,
        repo_dir: &Path,
    ) -> CommandSpec {
        let port = launch.port.to_string();
        CommandSpec::new(&launch.python)
            .args(["-m", "torch.distributed.launch"])
            .arg(format!("--nproc_per_node={}", launch.nproc))
            .arg(format!("--master_addr={}", launch.master_addr))
            .arg(format!("--master_port={}", port))
            .arg(format!("{}.py", run.method))
            .arg(format!("--config={}", paths.config.display()))
            .arg("--labeled-id-path")
            .arg(paths.labeled_id_path.display().to_string())
            .arg("--unlabeled-id-path")
            .arg(paths.unlabeled_id_path.display().to_string())
            .arg("--save-path")
            .arg(paths.save_path.display().to_string())
            .arg("--port")
            .arg(port)
            .current_dir(repo_dir)
    }
}
