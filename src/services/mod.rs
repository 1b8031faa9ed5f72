//! 服务层模块
//!
//! 引导流程：写配置、组装拓扑、生成 manifest、驱动容器运行时

pub mod composer;
pub mod config_writer;
pub mod deploy;
pub mod install;
pub mod manifest;
pub mod runtime;

pub use runtime::RuntimeInvoker;
