//! 基础设施模块
//!
//! 封装外部依赖（进程执行）

pub mod command;

#[cfg(test)]
pub mod fake;

pub use command::{CommandError, CommandInvoker, SystemInvoker};
