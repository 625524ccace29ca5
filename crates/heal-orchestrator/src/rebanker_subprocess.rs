//! The re-banker adapter: normalizes a language-specific syntax checker's
//! output into the fixed-shape [`RebankerDiagnostic`] contract. A checker
//! that exits clean reports `Ok(None)`; one whose output can't be parsed as
//! JSON falls back to the `UNPARSED` sentinel rather than erroring the
//! whole attempt.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use heal_coordination::RebankerDiagnostic;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::OrchestratorError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait RebankerAdapter: Send + Sync {
    async fn diagnose(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Option<RebankerDiagnostic>, OrchestratorError>;
}

/// Invokes an external checker binary, feeding it source on stdin and
/// expecting a single JSON object (or empty output for a clean pass) on
/// stdout.
pub struct SubprocessRebanker {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl SubprocessRebanker {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl RebankerAdapter for SubprocessRebanker {
    async fn diagnose(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Option<RebankerDiagnostic>, OrchestratorError> {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args);
        command.arg("--language").arg(language);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| OrchestratorError::Rebanker(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| OrchestratorError::Rebanker(e.to_string()))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::Rebanker("re-banker subprocess timed out".to_string()))?
            .map_err(|e| OrchestratorError::Rebanker(e.to_string()))?;

        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<RebankerDiagnostic>(&raw) {
            Ok(diagnostic) => Ok(Some(diagnostic)),
            Err(_) => Ok(Some(RebankerDiagnostic::unparsed(&raw))),
        }
    }
}

/// Test double returning a fixed queue of diagnostics, one per call.
pub struct FixtureRebanker {
    diagnostics: std::sync::Mutex<std::collections::VecDeque<Option<RebankerDiagnostic>>>,
}

impl FixtureRebanker {
    pub fn new(diagnostics: Vec<Option<RebankerDiagnostic>>) -> Self {
        Self {
            diagnostics: std::sync::Mutex::new(diagnostics.into()),
        }
    }
}

#[async_trait]
impl RebankerAdapter for FixtureRebanker {
    async fn diagnose(
        &self,
        _code: &str,
        _language: &str,
    ) -> Result<Option<RebankerDiagnostic>, OrchestratorError> {
        let mut queue = self.diagnostics.lock().unwrap();
        Ok(queue.pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_coordination::Severity;

    fn diag() -> RebankerDiagnostic {
        RebankerDiagnostic {
            file: "a.py".to_string(),
            line: Some(1),
            column: Some(1),
            message: "bad syntax".to_string(),
            code: "E999".to_string(),
            severity: Severity::Error,
            family: None,
            difficulty: None,
            cluster_id: None,
            hint: None,
        }
    }

    #[tokio::test]
    async fn fixture_rebanker_replays_queue() {
        let rebanker = FixtureRebanker::new(vec![Some(diag()), None]);
        let first = rebanker.diagnose("code", "python").await.unwrap();
        assert!(first.is_some());
        let second = rebanker.diagnose("code", "python").await.unwrap();
        assert!(second.is_none());
    }
}
