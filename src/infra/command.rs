//! 命令执行器
//!
//! 提供统一的外部命令调用接口 `CommandInvoker`：
//! - 阻塞等待进程结束（单次调用，不重试、不取消）
//! - stdout/stderr 分离捕获
//! - 可选实时回显给操作者
//!
//! 组件只依赖该 trait，测试中可替换为 `infra::fake::RecordingInvoker`。

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::domain::runtime::RuntimeResult;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败（通常是程序不存在）
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn `{}`: {}", program, source)
            }
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed { source, .. } | CommandError::WaitFailed(source) => Some(source),
        }
    }
}

/// 外部进程调用能力
#[async_trait]
pub trait CommandInvoker: Send + Sync {
    /// 执行命令并等待其结束
    ///
    /// 非零退出码不是错误，由调用方根据 `RuntimeResult::exit_code` 判断
    async fn invoke(&self, program: &str, args: &[String]) -> Result<RuntimeResult, CommandError>;

    /// 执行命令，输出只捕获不回显（探测类调用）
    async fn invoke_quiet(&self, program: &str, args: &[String]) -> Result<RuntimeResult, CommandError> {
        self.invoke(program, args).await
    }
}

/// 基于 tokio::process 的真实执行器
#[derive(Clone, Debug, Default)]
pub struct SystemInvoker {
    /// 工作目录（None 时继承当前进程）
    work_dir: Option<PathBuf>,
    /// 是否实时回显 stdout/stderr
    echo: bool,
}

impl SystemInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置工作目录
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// 设置是否回显
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    async fn run(&self, program: &str, args: &[String], echo: bool) -> Result<RuntimeResult, CommandError> {
        debug!(program = %program, args = ?args, "Invoking command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| CommandError::SpawnFailed {
            program: program.to_string(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 启动 stdout / stderr 读取任务
        let stdout_task = tokio::spawn(collect_lines(stdout, echo.then_some(Stream::Stdout)));
        let stderr_task = tokio::spawn(collect_lines(stderr, echo.then_some(Stream::Stderr)));

        let status = child.wait().await.map_err(CommandError::WaitFailed)?;

        // 等待日志读取完成
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(RuntimeResult::new(exit_code(&status), stdout, stderr))
    }
}

#[async_trait]
impl CommandInvoker for SystemInvoker {
    async fn invoke(&self, program: &str, args: &[String]) -> Result<RuntimeResult, CommandError> {
        self.run(program, args, self.echo).await
    }

    async fn invoke_quiet(&self, program: &str, args: &[String]) -> Result<RuntimeResult, CommandError> {
        self.run(program, args, false).await
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn collect_lines<R>(reader: Option<R>, echo: Option<Stream>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return collected;
    };

    // 按字节读取：非 UTF-8 输出也要继续读完管道
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Stopped reading command output");
                break;
            }
        }

        let raw = String::from_utf8_lossy(&buf);
        let line = raw.trim_end_matches('\n').trim_end_matches('\r');
        match echo {
            Some(Stream::Stdout) => println!("{}", line),
            Some(Stream::Stderr) => eprintln!("{}", line),
            None => {}
        }
        collected.push_str(line);
        collected.push('\n');
    }
    collected
}

/// 退出码；被信号终止时为 128 + 信号值
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// 命令行展示（日志与错误信息）
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_invoke_success_captures_stdout() {
        let invoker = SystemInvoker::new().with_work_dir(std::env::temp_dir());
        let result = invoker.invoke("echo", &args(&["hello"])).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_non_zero_is_not_an_error() {
        let invoker = SystemInvoker::new();
        let result = invoker
            .invoke_quiet("sh", &args(&["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_exit_code() {
        let invoker = SystemInvoker::new();
        let result = invoker.invoke_quiet("sh", &args(&["-c", "kill -9 $$"])).await.unwrap();
        assert_eq!(result.exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_draining() {
        let invoker = SystemInvoker::new();
        let script = "printf 'bad \\377 byte\\n'; i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done; echo done >&2";
        let result = invoker.invoke_quiet("sh", &args(&["-c", script])).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.starts_with("bad \u{FFFD} byte\n"));
        assert_eq!(result.stdout.lines().count(), 20001);
        assert!(result.stdout.ends_with("line 19999\n"));
        assert_eq!(result.stderr, "done\n");
    }

    #[tokio::test]
    async fn test_invoke_not_found() {
        let invoker = SystemInvoker::new();
        let result = invoker.invoke("nonexistent_command_12345", &[]).await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[test]
    fn test_display_command() {
        assert_eq!(
            display_command("docker", &args(&["compose", "-f", "x.yml", "up"])),
            "docker compose -f x.yml up"
        );
        assert_eq!(display_command("docker", &[]), "docker");
    }
}
