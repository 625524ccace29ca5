//! Sandbox execution: runs a candidate patch's code in an isolated
//! subprocess and reports back stdout/stderr/exit status. The real impl
//! shells out per `policy.sandbox_isolation`; `FixtureSandbox` in tests
//! replays canned outcomes so the retry loop can be exercised without a
//! real interpreter on the test machine.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl SandboxOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, code: &str, language: &str) -> Result<SandboxOutcome, OrchestratorError>;
}

fn interpreter_for(language: &str) -> Option<(&'static str, Vec<&'static str>)> {
    match language {
        "python" | "python3" => Some(("python3", vec!["-"])),
        "javascript" | "node" => Some(("node", vec!["-"])),
        "bash" | "shell" => Some(("bash", vec![])),
        _ => None,
    }
}

/// Executes candidate code by piping it into the language's interpreter on
/// stdin, bounded by a wall-clock timeout.
pub struct ProcessSandbox {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait]
impl SandboxExecutor for ProcessSandbox {
    async fn execute(&self, code: &str, language: &str) -> Result<SandboxOutcome, OrchestratorError> {
        let (program, args) = interpreter_for(language)
            .ok_or_else(|| OrchestratorError::Sandbox(format!("no interpreter for language `{language}`")))?;

        let mut command = Command::new(program);
        command.args(&args);
        command.stdin(std::process::Stdio::piped());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| OrchestratorError::Sandbox(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| OrchestratorError::Sandbox(e.to_string()))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::SandboxTimeout(self.timeout.as_millis() as u64))?
            .map_err(|e| OrchestratorError::Sandbox(e.to_string()))?;

        Ok(SandboxOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Test double that replays a fixed queue of outcomes, one per call.
pub struct FixtureSandbox {
    outcomes: std::sync::Mutex<std::collections::VecDeque<SandboxOutcome>>,
}

impl FixtureSandbox {
    pub fn new(outcomes: Vec<SandboxOutcome>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl SandboxExecutor for FixtureSandbox {
    async fn execute(&self, _code: &str, _language: &str) -> Result<SandboxOutcome, OrchestratorError> {
        let mut queue = self.outcomes.lock().unwrap();
        queue
            .pop_front()
            .ok_or_else(|| OrchestratorError::Sandbox("fixture sandbox exhausted".to_string()))
    }
}
