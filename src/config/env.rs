//! 引导配置加载
//!
//! 所有路径与选项都集中在 `BootstrapConfig` 中，显式传递给每个组件，
//! 不依赖当前工作目录或散落的环境变量读取。

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use self::constants::*;

/// 引导配置
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// 部署目录（Dockerfile 与生成文件所在目录）
    pub work_dir: PathBuf,
    /// 环境文件路径
    pub env_file: PathBuf,
    /// 生成的 compose manifest 路径
    pub manifest_file: PathBuf,
    /// compose 项目名
    pub project_name: String,
    /// 容器运行时可执行文件（docker / podman）
    pub runtime_program: String,
    /// 运行时存活探测超时
    pub probe_timeout: Duration,
    /// 是否把运行时输出实时回显给操作者
    pub echo_output: bool,
}

impl BootstrapConfig {
    /// 以指定目录和默认文件名创建配置
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            env_file: work_dir.join(DEFAULT_ENV_FILE),
            manifest_file: work_dir.join(DEFAULT_MANIFEST_FILE),
            work_dir,
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            runtime_program: DEFAULT_RUNTIME_PROGRAM.to_string(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            echo_output: true,
        }
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let work_dir = env::var("WEBSITE_STACK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut config = Self::new(work_dir);

        if let Ok(path) = env::var("WEBSITE_STACK_ENV_FILE") {
            config = config.with_env_file(path);
        }
        if let Ok(path) = env::var("WEBSITE_STACK_COMPOSE_FILE") {
            config = config.with_manifest_file(path);
        }
        if let Some(project) = load_with_fallback("WEBSITE_STACK_PROJECT", "COMPOSE_PROJECT_NAME") {
            config.project_name = project;
        }
        if let Ok(program) = env::var("WEBSITE_STACK_RUNTIME") {
            if !program.trim().is_empty() {
                config.runtime_program = program.trim().to_string();
            }
        }

        config.probe_timeout = match env::var("WEBSITE_STACK_PROBE_TIMEOUT_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(value = %raw, "Invalid WEBSITE_STACK_PROBE_TIMEOUT_SECS, using default");
                    config.probe_timeout
                }
            },
            Err(_) => config.probe_timeout,
        };

        config
    }

    /// 切换部署目录，默认文件名随之迁移
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        if self.env_file == self.work_dir.join(DEFAULT_ENV_FILE) {
            self.env_file = work_dir.join(DEFAULT_ENV_FILE);
        }
        if self.manifest_file == self.work_dir.join(DEFAULT_MANIFEST_FILE) {
            self.manifest_file = work_dir.join(DEFAULT_MANIFEST_FILE);
        }
        self.work_dir = work_dir;
        self
    }

    /// 指定环境文件，相对路径基于部署目录
    pub fn with_env_file(mut self, path: impl AsRef<Path>) -> Self {
        self.env_file = resolve(&self.work_dir, path.as_ref());
        self
    }

    /// 指定 manifest 文件，相对路径基于部署目录
    pub fn with_manifest_file(mut self, path: impl AsRef<Path>) -> Self {
        self.manifest_file = resolve(&self.work_dir, path.as_ref());
        self
    }

    /// 指定项目名
    pub fn with_project_name(mut self, project: impl Into<String>) -> Self {
        self.project_name = project.into();
        self
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| env::var(fallback).ok())
        .filter(|v| !v.trim().is_empty())
}

/// 常量
pub mod constants {
    /// 默认环境文件名
    pub const DEFAULT_ENV_FILE: &str = ".env";

    /// 默认 manifest 文件名
    pub const DEFAULT_MANIFEST_FILE: &str = "docker-compose.yml";

    /// 默认项目名
    pub const DEFAULT_PROJECT_NAME: &str = "website";

    /// 默认容器运行时
    pub const DEFAULT_RUNTIME_PROGRAM: &str = "docker";

    /// 运行时存活探测超时（秒）
    pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

    /// 管理界面固定宿主机端口
    pub const ADMIN_UI_PORT: u16 = 5050;

    /// 数据库容器内监听端口
    pub const DB_CONTAINER_PORT: u16 = 5432;

    /// API 容器内监听端口
    pub const API_CONTAINER_PORT: u16 = 8000;

    /// 安装时读取的发行版信息文件
    pub const OS_RELEASE_PATH: &str = "/etc/os-release";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_file_names() {
        let config = BootstrapConfig::new("/srv/website");
        assert_eq!(config.env_file, PathBuf::from("/srv/website/.env"));
        assert_eq!(config.manifest_file, PathBuf::from("/srv/website/docker-compose.yml"));
        assert_eq!(config.project_name, "website");
        assert_eq!(config.runtime_program, "docker");
    }

    #[test]
    fn test_with_work_dir_moves_default_paths_only() {
        let config = BootstrapConfig::new("/a")
            .with_env_file("/etc/website.env")
            .with_work_dir("/b");
        assert_eq!(config.env_file, PathBuf::from("/etc/website.env"));
        assert_eq!(config.manifest_file, PathBuf::from("/b/docker-compose.yml"));
    }

    #[test]
    fn test_relative_paths_resolve_against_work_dir() {
        let config = BootstrapConfig::new("/srv")
            .with_env_file("conf/prod.env")
            .with_manifest_file("compose.generated.yml");
        assert_eq!(config.env_file, PathBuf::from("/srv/conf/prod.env"));
        assert_eq!(config.manifest_file, PathBuf::from("/srv/compose.generated.yml"));
    }

    #[test]
    fn test_load_with_fallback() {
        env::set_var("WS_TEST_PRIMARY", "primary_value");
        env::set_var("WS_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("WS_TEST_PRIMARY", "WS_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("WS_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("WS_TEST_PRIMARY", "WS_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("WS_TEST_FALLBACK");
        assert_eq!(load_with_fallback("WS_TEST_PRIMARY", "WS_TEST_FALLBACK"), None);
    }
}
