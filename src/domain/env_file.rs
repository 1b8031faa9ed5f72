//! 环境文件领域模型
//!
//! 扁平的 `KEY=VALUE` 文本，值为不透明字符串，不做类型校验。

use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{BootstrapError, Result};

/// 首次运行时写入的默认环境文件内容
pub const DEFAULT_ENV_TEMPLATE: &str = "\
# Website stack environment. Created once; edit values between runs.

# Database
POSTGRES_USER=postgres
POSTGRES_PASSWORD=postgres
POSTGRES_SERVER=db
POSTGRES_PORT=5432
POSTGRES_DB=website_db

# Application
APP_ENV=production
DEBUG=false
API_PORT=8000

# Object storage
AWS_ACCESS_KEY_ID=
AWS_SECRET_ACCESS_KEY=
AWS_REGION=us-east-2
S3_BUCKET_NAME=

# Admin UI
PGADMIN_DEFAULT_EMAIL=admin@example.com
PGADMIN_DEFAULT_PASSWORD=admin

# Reverse proxy
DOMAIN=localhost
";

/// 脱敏后显示的值
pub const REDACTED: &str = "********";

/// 环境文件
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentFile {
    vars: BTreeMap<String, String>,
}

impl EnvironmentFile {
    /// 创建空环境文件
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认环境文件
    pub fn defaults() -> Self {
        Self::parse(DEFAULT_ENV_TEMPLATE)
    }

    /// 从文本解析
    ///
    /// 重复的 key 以最后一次出现为准
    pub fn parse(content: &str) -> Self {
        let mut vars = BTreeMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

            let Some((key, value)) = line.split_once('=') else {
                warn!(line = index + 1, "Ignoring environment line without '='");
                continue;
            };

            let key = key.trim();
            if key.is_empty() {
                warn!(line = index + 1, "Ignoring environment line with empty key");
                continue;
            }

            let value = unquote(value.trim());
            if vars.insert(key.to_string(), value.to_string()).is_some() {
                warn!(key = %key, line = index + 1, "Duplicate environment key, last value wins");
            }
        }

        Self { vars }
    }

    /// 读取变量
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// 读取服务必需的变量，缺失时失败
    ///
    /// 空字符串视为已定义
    pub fn require(&self, key: &str, service: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| BootstrapError::missing_variable(key, service))
    }

    /// 设置变量
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// 删除变量
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// 变量数量
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// 用 `defaults` 补齐缺失的变量，返回被补齐的 key
    pub fn fill_missing(&mut self, defaults: &EnvironmentFile) -> Vec<String> {
        let mut filled = Vec::new();
        for (key, value) in &defaults.vars {
            if !self.vars.contains_key(key) {
                self.vars.insert(key.clone(), value.clone());
                filled.push(key.clone());
            }
        }
        filled
    }

    /// 渲染为 `KEY=VALUE` 文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.vars {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// 敏感关键词列表
    const SENSITIVE_KEYWORDS: &'static [&'static str] = &[
        "password", "secret", "key", "token", "credential", "auth",
        "private", "jwt", "pem", "cert",
    ];

    /// 检查变量名是否敏感
    pub fn is_sensitive_key(key: &str) -> bool {
        let key_lower = key.to_lowercase();
        Self::SENSITIVE_KEYWORDS.iter().any(|kw| key_lower.contains(kw))
    }

    /// 输出给操作者时使用的值（敏感值脱敏，空值保持为空）
    pub fn display_value<'a>(key: &str, value: &'a str) -> &'a str {
        if !value.is_empty() && Self::is_sensitive_key(key) {
            REDACTED
        } else {
            value
        }
    }
}

/// 去掉一对匹配的首尾引号
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
