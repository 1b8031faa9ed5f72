//! 领域模型模块
//!
//! 纯数据结构与校验逻辑，不执行任何 IO

pub mod env_file;
pub mod runtime;
pub mod topology;

// Re-exports for convenience
pub use env_file::EnvironmentFile;
pub use runtime::{ActionKind, ActionRecord, ActionScope, CleanupMode, InvocationState, RuntimeAction, RuntimeResult};
pub use topology::{
    HealthCheck, PortMapping, RestartPolicy, ServiceDefinition, ServiceSource, TopologyDescription, VolumeMount,
};
