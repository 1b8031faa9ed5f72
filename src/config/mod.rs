//! 配置模块
//!
//! 路径、项目名与运行时选项

pub mod env;

pub use env::BootstrapConfig;
