//! 运行时动作领域模型
//!
//! 描述发给外部容器运行时的请求，以及单次调用的状态机记录。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 动作类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Build,
    Start,
    Stop,
    Remove,
    Prune,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Build => "build",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Remove => "remove",
            ActionKind::Prune => "prune",
        }
    }
}

/// 动作作用范围
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionScope {
    /// 整个拓扑
    #[default]
    Topology,
    /// 单个服务
    Service(String),
}

impl ActionScope {
    /// 服务名（整个拓扑时为 None）
    pub fn service(&self) -> Option<&str> {
        match self {
            ActionScope::Topology => None,
            ActionScope::Service(name) => Some(name),
        }
    }
}

/// 发给外部运行时的请求
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeAction {
    pub kind: ActionKind,
    pub scope: ActionScope,
    /// 是否连同命名卷（以及 remove 时的镜像）一起删除
    pub include_volumes: bool,
}

impl RuntimeAction {
    fn new(kind: ActionKind, include_volumes: bool) -> Self {
        Self {
            kind,
            scope: ActionScope::Topology,
            include_volumes,
        }
    }

    /// 构建镜像
    pub fn build() -> Self {
        Self::new(ActionKind::Build, false)
    }

    /// 启动容器
    pub fn start() -> Self {
        Self::new(ActionKind::Start, false)
    }

    /// 优雅停止，保留全部状态
    pub fn stop() -> Self {
        Self::new(ActionKind::Stop, false)
    }

    /// 删除容器与网络，保留命名卷
    pub fn remove() -> Self {
        Self::new(ActionKind::Remove, false)
    }

    /// 删除容器、网络、命名卷与镜像（不可逆）
    pub fn remove_all() -> Self {
        Self::new(ActionKind::Remove, true)
    }

    /// 系统级垃圾回收，范围超出本拓扑
    pub fn prune(include_volumes: bool) -> Self {
        Self::new(ActionKind::Prune, include_volumes)
    }

    /// 限定到单个服务
    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.scope = ActionScope::Service(service.into());
        self
    }

    /// 是否会永久删除持久化数据
    pub fn is_destructive(&self) -> bool {
        self.include_volumes && matches!(self.kind, ActionKind::Remove | ActionKind::Prune)
    }
}

impl fmt::Display for RuntimeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if self.include_volumes {
            write!(f, "+volumes")?;
        }
        if let ActionScope::Service(name) = &self.scope {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

/// cleanup 模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    /// 仅停止
    Stop,
    /// 停止并删除容器/网络，保留命名卷
    #[default]
    Clean,
    /// 同时删除命名卷与镜像
    All,
    /// 清理后执行系统级 prune
    Prune,
}

impl CleanupMode {
    /// 该模式对应的动作序列
    pub fn actions(&self) -> Vec<RuntimeAction> {
        match self {
            CleanupMode::Stop => vec![RuntimeAction::stop()],
            CleanupMode::Clean => vec![RuntimeAction::remove()],
            CleanupMode::All => vec![RuntimeAction::remove_all()],
            CleanupMode::Prune => vec![RuntimeAction::remove(), RuntimeAction::prune(true)],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupMode::Stop => "stop",
            CleanupMode::Clean => "clean",
            CleanupMode::All => "all",
            CleanupMode::Prune => "prune",
        }
    }
}

/// 外部进程的执行结果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RuntimeResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// 退出码为 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 追加另一次调用的输出，退出码取后者
    pub fn absorb(&mut self, other: RuntimeResult) {
        self.stdout.push_str(&other.stdout);
        self.stderr.push_str(&other.stderr);
        self.exit_code = other.exit_code;
    }
}

/// 单次调用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    NotStarted,
    Dispatched,
    Succeeded,
    Failed,
}

impl InvocationState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Succeeded | InvocationState::Failed)
    }
}

/// 动作执行记录
#[derive(Clone, Debug, Serialize)]
pub struct ActionRecord {
    pub action: RuntimeAction,
    pub state: InvocationState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
}

impl ActionRecord {
    /// 创建未开始的记录
    pub fn new(action: RuntimeAction) -> Self {
        Self {
            action,
            state: InvocationState::NotStarted,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            exit_code: None,
        }
    }

    /// 已交给外部运行时
    pub fn dispatch(&mut self) {
        self.started_at = Some(Utc::now());
        self.state = InvocationState::Dispatched;
    }

    /// 结束记录，退出码为 0 视为成功
    pub fn finish(&mut self, exit_code: i32) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.exit_code = Some(exit_code);
        self.state = if exit_code == 0 {
            InvocationState::Succeeded
        } else {
            InvocationState::Failed
        };
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 未能派发即失败（如预检失败）
    pub fn abort(&mut self) {
        self.finished_at = Some(Utc::now());
        self.state = InvocationState::Failed;
    }
}
