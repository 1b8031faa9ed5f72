//! Website Stack - 网站容器栈引导工具
//!
//! 幂等地生成环境文件与 compose manifest，并通过外部容器运行时部署或清理。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use config::BootstrapConfig;
pub use error::{BootstrapError, Result};
