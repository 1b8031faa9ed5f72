//! 统一错误处理
//!
//! 提供 `BootstrapError` 枚举，覆盖引导流程中的所有失败：
//! 文件读写、变量缺失、容器运行时不可达、运行时动作失败以及安装失败。
//! 所有错误都是致命的，引导流程在第一个错误处停止。

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 引导流程错误
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// 文件系统读写失败
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 拓扑引用了环境文件中未定义的变量
    #[error("variable {key} is not defined in the environment file (required by service `{service}`)")]
    MissingVariable { key: String, service: String },

    /// 容器运行时不可达
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// 运行时动作返回非零退出码
    #[error("runtime action `{action}` failed with exit code {exit_code}")]
    RuntimeActionFailed {
        action: String,
        exit_code: i32,
        stderr: String,
    },

    /// 拓扑不满足闭包或无环约束
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// 动作指定的服务不在拓扑中
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// 安装脚本不支持当前平台
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// 非 root 且没有 sudo
    #[error("installation requires root privileges and sudo is not available")]
    PrivilegeEscalationUnavailable,

    /// 安装步骤失败
    #[error("install step `{step}` failed with exit code {exit_code}")]
    InstallStepFailed {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    /// 序列化失败（manifest / JSON 输出）
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BootstrapError {
    /// 创建 IO 错误
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// 创建变量缺失错误
    pub fn missing_variable(key: impl Into<String>, service: impl Into<String>) -> Self {
        Self::MissingVariable {
            key: key.into(),
            service: service.into(),
        }
    }

    /// 创建运行时不可达错误
    pub fn runtime_unavailable(reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable(reason.into())
    }

    /// 创建运行时动作失败错误
    pub fn action_failed(action: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::RuntimeActionFailed {
            action: action.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// 创建拓扑无效错误
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology(reason.into())
    }

    /// 进程退出码
    ///
    /// 运行时动作失败时透传上游退出码（1..=255），其余一律为 1
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RuntimeActionFailed { exit_code, .. } | Self::InstallStepFailed { exit_code, .. }
                if (1..=255).contains(exit_code) =>
            {
                *exit_code
            }
            _ => 1,
        }
    }

    /// 上游工具的原始诊断输出
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::RuntimeActionFailed { stderr, .. } | Self::InstallStepFailed { stderr, .. } => {
                let trimmed = stderr.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for BootstrapError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BootstrapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 便捷类型别名
pub type Result<T> = std::result::Result<T, BootstrapError>;
