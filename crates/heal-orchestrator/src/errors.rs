//! Orchestrator error types and the retry-classification ladder used purely
//! for logging/metrics. It never changes which action the breaker or
//! cascade handler already decided on, it just labels why an attempt step
//! failed.
//!
//! The categories mirror the retry-worthiness classifier used around the
//! sandbox and re-banker subprocess adapters: transient failures are worth
//! another attempt, permanent ones are not.

use heal_coordination::EnvelopeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("sandbox execution failed: {0}")]
    Sandbox(String),

    #[error("sandbox execution timed out after {0}ms")]
    SandboxTimeout(u64),

    #[error("re-banker adapter failed: {0}")]
    Rebanker(String),

    #[error("llm adapter failed: {0}")]
    Llm(String),

    #[error("envelope invariant violated: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of why an attempt step failed, attached to log
/// records and metrics only. It never feeds back into the breaker's own
/// decisions, which stay driven by [`heal_coordination::breaker::Recommendation`]
/// and [`heal_coordination::cascade::FrictionAssessment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    Transient,
    RateLimited,
    Timeout,
    Permanent,
    Unknown,
}

impl RetryCategory {
    pub fn classify(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::SandboxTimeout(_) => RetryCategory::Timeout,
            OrchestratorError::Sandbox(msg) if msg.to_lowercase().contains("timed out") => {
                RetryCategory::Timeout
            }
            OrchestratorError::Llm(msg) if msg.to_lowercase().contains("rate limit") => {
                RetryCategory::RateLimited
            }
            OrchestratorError::Llm(_) | OrchestratorError::Rebanker(_) => RetryCategory::Transient,
            OrchestratorError::Envelope(_) | OrchestratorError::Config(_) => {
                RetryCategory::Permanent
            }
            OrchestratorError::Io(_) => RetryCategory::Transient,
            #[allow(unreachable_patterns)]
            _ => RetryCategory::Unknown,
        }
    }

    pub fn is_worth_retrying(self) -> bool {
        matches!(self, RetryCategory::Transient | RetryCategory::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_classifies_as_timeout() {
        let err = OrchestratorError::SandboxTimeout(5000);
        assert_eq!(RetryCategory::classify(&err), RetryCategory::Timeout);
    }

    #[test]
    fn envelope_errors_are_permanent() {
        let err = OrchestratorError::Envelope(EnvelopeError::SchemaValidation("bad".into()));
        assert_eq!(RetryCategory::classify(&err), RetryCategory::Permanent);
        assert!(!RetryCategory::classify(&err).is_worth_retrying());
    }

    #[test]
    fn rebanker_failures_are_transient_and_retryable() {
        let err = OrchestratorError::Rebanker("parser crashed".into());
        let category = RetryCategory::classify(&err);
        assert_eq!(category, RetryCategory::Transient);
        assert!(category.is_worth_retrying());
    }
}
