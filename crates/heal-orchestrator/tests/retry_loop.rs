//! Black-box integration tests for the full `attempt_with_backoff` loop
//! against fixture adapters, exercising the convergence and rollback
//! scenarios described for the control loop.

use std::sync::Arc;

use heal_coordination::rate_limiter::TokenBucket;
use heal_coordination::rebanker::{RebankerDiagnostic, Severity};
use heal_coordination::{ErrorClass, MemoryBuffer, PolicyConfig};
use heal_orchestrator::sandbox::{FixtureSandbox, SandboxOutcome};
use heal_orchestrator::{
    Action, AttemptOptions, FixtureRebanker, RepairSession,
};
use tokio::sync::Mutex;

fn diag(line: u32, message: &str) -> RebankerDiagnostic {
    RebankerDiagnostic {
        file: "module.py".to_string(),
        line: Some(line),
        column: Some(1),
        message: message.to_string(),
        code: "E111".to_string(),
        severity: Severity::Error,
        family: None,
        difficulty: None,
        cluster_id: None,
        hint: None,
    }
}

fn sandbox_outcome(exit_code: i32, stderr: &str) -> SandboxOutcome {
    SandboxOutcome {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
        duration_ms: 2,
    }
}

fn session(sandbox_outcomes: Vec<SandboxOutcome>, diagnostics: Vec<Option<RebankerDiagnostic>>) -> RepairSession {
    RepairSession::new(
        PolicyConfig::mid_tier(),
        Arc::new(FixtureSandbox::new(sandbox_outcomes)),
        Arc::new(FixtureRebanker::new(diagnostics)),
        Arc::new(Mutex::new(TokenBucket::new(120))),
        Arc::new(Mutex::new(MemoryBuffer::default())),
        "/workspace".to_string(),
    )
}

#[tokio::test]
async fn converging_chain_eventually_promotes() {
    let mut s = session(
        vec![
            sandbox_outcome(1, "indentation error"),
            sandbox_outcome(1, "unused variable"),
            sandbox_outcome(0, ""),
        ],
        vec![
            Some(diag(10, "indentation error")),
            Some(diag(20, "unused variable")),
            None,
        ],
    );

    let result = s
        .attempt_with_backoff(
            ErrorClass::Syntax,
            "indentation error".to_string(),
            "def f():\npass".to_string(),
            "def f():\npass".to_string(),
            vec![0.8, 0.3],
            "python".to_string(),
            vec!["module.py".to_string()],
            AttemptOptions {
                max_attempts: 5,
                min_wait_ms: 1,
                max_wait_ms: 5,
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.action, Action::Promote);
    assert_eq!(result.envelope.counters.total_attempts, 3);
}

#[tokio::test]
async fn exhausting_max_attempts_returns_a_terminal_non_promote_action() {
    let outcomes = vec![sandbox_outcome(1, "persistent error"); 3];
    let diagnostics = vec![Some(diag(5, "persistent error")); 3];
    let mut s = session(outcomes, diagnostics);

    let result = s
        .attempt_with_backoff(
            ErrorClass::Logic,
            "persistent error".to_string(),
            "x = 1".to_string(),
            "x = 1".to_string(),
            vec![0.2, 0.1],
            "python".to_string(),
            vec!["module.py".to_string()],
            AttemptOptions {
                max_attempts: 3,
                min_wait_ms: 1,
                max_wait_ms: 5,
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_ne!(result.action, Action::Promote);
}

#[tokio::test]
async fn single_max_attempt_never_retries() {
    let mut s = session(vec![sandbox_outcome(0, "")], vec![None]);

    let result = s
        .attempt_with_backoff(
            ErrorClass::Syntax,
            "trivial fix".to_string(),
            "pass".to_string(),
            "pas".to_string(),
            vec![2.0],
            "python".to_string(),
            vec!["module.py".to_string()],
            AttemptOptions {
                max_attempts: 1,
                min_wait_ms: 1,
                max_wait_ms: 5,
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.envelope.counters.total_attempts, 1);
}
