//! Async orchestration layer: sandbox execution, the re-banker subprocess
//! adapter, the LLM consult adapter, chat mirroring, the deterministic
//! minimal-tweak fallback, and the `process_error`/`attempt_with_backoff`
//! control loop itself. Built on the synchronous primitives in
//! `heal-coordination`.

pub mod chat_adapter;
pub mod config;
pub mod errors;
pub mod llm_adapter;
pub mod minimal_tweak;
pub mod orchestrator;
pub mod rebanker_subprocess;
pub mod sandbox;

pub use chat_adapter::{ChatAdapter, InMemoryChatAdapter, NullChatAdapter};
pub use config::{PolicyPreset, RunConfig};
pub use errors::{OrchestratorError, RetryCategory};
pub use llm_adapter::{ConsultEnvelope, FixtureLlmAdapter, LlmAdapter, LlmReply, RigLlmAdapter};
pub use minimal_tweak::minimal_tweak;
pub use orchestrator::{Action, AttemptOptions, ProcessErrorInput, ProcessErrorResult, RepairSession};
pub use rebanker_subprocess::{FixtureRebanker, RebankerAdapter, SubprocessRebanker};
pub use sandbox::{FixtureSandbox, ProcessSandbox, SandboxExecutor, SandboxOutcome};
