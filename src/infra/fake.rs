//! Recording command invoker for tests.
//!
//! Every invocation is recorded as a single command line. Responses are
//! scripted by command-line prefix; the first matching rule wins and
//! unmatched commands exit 0 with empty output.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::runtime::RuntimeResult;
use crate::infra::command::{display_command, CommandError, CommandInvoker};

#[derive(Clone, Debug)]
pub enum Scripted {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnFailure,
}

#[derive(Debug, Default)]
pub struct RecordingInvoker {
    rules: Vec<(String, Scripted)>,
    calls: Mutex<Vec<String>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.push((
            prefix.to_string(),
            Scripted::Exit {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub fn spawn_fails(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), Scripted::SpawnFailure));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that contain `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.contains(needle)).collect()
    }
}

#[async_trait]
impl CommandInvoker for RecordingInvoker {
    async fn invoke(&self, program: &str, args: &[String]) -> Result<RuntimeResult, CommandError> {
        let line = display_command(program, args);
        self.calls.lock().unwrap().push(line.clone());

        let rule = self.rules.iter().find(|(prefix, _)| line.starts_with(prefix.as_str()));
        match rule.map(|(_, scripted)| scripted) {
            Some(Scripted::Exit { code, stdout, stderr }) => Ok(RuntimeResult::new(*code, stdout.clone(), stderr.clone())),
            Some(Scripted::SpawnFailure) => Err(CommandError::SpawnFailed {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            None => Ok(RuntimeResult::default()),
        }
    }
}
