// lib.rs
// 启动器模块入口，声明并导出各子模块。
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod job;
pub mod launch;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod splits;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use config::LaunchConfig;
pub use error::{Error, Result};
pub use launch::{CommandRunner, CommandSpec, SystemRunner};
pub use pipeline::Pipeline;
