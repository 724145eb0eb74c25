// error.rs
// 定义启动器通用的错误类型（IO、配置、外部命令、下载、符号链接、作业提交等）和Result类型。
use std::fmt;
use std::io;

/// 启动器通用错误类型
#[derive(Debug)]
pub enum Error {
    /// IO错误
    Io(io::Error),
    /// 配置文件读取或解析错误
    ConfigError(String),
    /// 外部程序无法启动（程序名，底层错误）
    SpawnError(String, io::Error),
    /// 外部程序以非零状态退出（命令行，退出码；被信号终止时为None）
    CommandFailed(String, Option<i32>),
    /// 预训练权重下载错误（描述，下载命令的退出码）
    DownloadError(String, Option<i32>),
    /// 符号链接创建错误
    LinkError(String),
    /// 调度器作业提交错误
    SubmitError(String),
    /// 其他类型错误
    Other(String),
}

/// 通用结果类型
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON序列化失败: {}", e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO错误: {}", e),
            Error::ConfigError(msg) => write!(f, "配置错误: {}", msg),
            Error::SpawnError(program, e) => write!(f, "无法启动 {}: {}", program, e),
            Error::CommandFailed(cmd, Some(code)) => {
                write!(f, "命令执行失败 (退出码 {}): {}", code, cmd)
            }
            Error::CommandFailed(cmd, None) => write!(f, "命令被信号终止: {}", cmd),
            Error::DownloadError(msg, _) => write!(f, "下载错误: {}", msg),
            Error::LinkError(msg) => write!(f, "符号链接错误: {}", msg),
            Error::SubmitError(msg) => write!(f, "作业提交错误: {}", msg),
            Error::Other(msg) => write!(f, "其他错误: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::SpawnError(_, e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// 外部命令的退出码（若该错误来自外部命令）
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed(_, code) | Error::DownloadError(_, code) => *code,
            _ => None,
        }
    }
}
