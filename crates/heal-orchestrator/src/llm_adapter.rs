//! LLM consult adapter: sends the jitter consult envelope to a language
//! model and extracts a patched-code candidate back out of its reply.
//!
//! The real adapter is backed by `rig-core`'s provider-agnostic `Prompt`
//! trait, so it works unchanged against any completion backend `rig`
//! supports; tests exercise the retry loop against [`FixtureLlmAdapter`]
//! instead of a live model.

use async_trait::async_trait;
use rig::completion::Prompt;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultEnvelope {
    pub language: String,
    pub error_class: String,
    pub message: String,
    pub original_code: String,
    pub candidate_patch: String,
    pub rebanker_raw: Option<heal_coordination::RebankerDiagnostic>,
    pub rebanker_previous: Option<heal_coordination::RebankerDiagnostic>,
    pub similar_outcomes: Vec<String>,
    pub attempt_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub patched_code: String,
    pub raw_response: String,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn repair(&self, consult: &ConsultEnvelope) -> Result<LlmReply, OrchestratorError>;
}

fn render_prompt(consult: &ConsultEnvelope) -> String {
    let mut prompt = format!(
        "Language: {}\nError class: {}\nDiagnostic: {}\n\nCode:\n{}\n\nCandidate patch so far:\n{}\n",
        consult.language, consult.error_class, consult.message, consult.original_code, consult.candidate_patch
    );
    if !consult.similar_outcomes.is_empty() {
        prompt.push_str("\nSimilar past outcomes:\n");
        for outcome in &consult.similar_outcomes {
            prompt.push_str(&format!("- {outcome}\n"));
        }
    }
    prompt.push_str("\nReturn only the corrected code in a fenced code block.");
    prompt
}

/// Pull a patched-code candidate out of a model reply: a fenced code block
/// first, then a `{"patched_code": ...}` JSON object, then the raw reply
/// trimmed as a last resort.
pub fn extract_patched_code(reply: &str) -> String {
    if let Some(start) = reply.find("```") {
        let after_fence = &reply[start + 3..];
        let after_fence = after_fence
            .find('\n')
            .map(|nl| &after_fence[nl + 1..])
            .unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim().to_string();
        }
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(reply.trim()) {
        if let Some(code) = value.get("patched_code").and_then(|v| v.as_str()) {
            return code.to_string();
        }
    }

    reply.trim().to_string()
}

/// `rig-core`-backed adapter. `A` is any `rig` agent implementing `Prompt`,
/// which keeps this adapter provider-agnostic across OpenAI/Anthropic/local
/// backends.
pub struct RigLlmAdapter<A: Prompt + Send + Sync> {
    agent: A,
}

impl<A: Prompt + Send + Sync> RigLlmAdapter<A> {
    pub fn new(agent: A) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl<A: Prompt + Send + Sync> LlmAdapter for RigLlmAdapter<A> {
    async fn repair(&self, consult: &ConsultEnvelope) -> Result<LlmReply, OrchestratorError> {
        let prompt = render_prompt(consult);
        let raw_response = self
            .agent
            .prompt(prompt)
            .await
            .map_err(|e| OrchestratorError::Llm(e.to_string()))?;
        let patched_code = extract_patched_code(&raw_response);
        Ok(LlmReply {
            patched_code,
            raw_response,
        })
    }
}

/// Test double that replays a fixed queue of replies.
pub struct FixtureLlmAdapter {
    replies: std::sync::Mutex<std::collections::VecDeque<LlmReply>>,
}

impl FixtureLlmAdapter {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl LlmAdapter for FixtureLlmAdapter {
    async fn repair(&self, _consult: &ConsultEnvelope) -> Result<LlmReply, OrchestratorError> {
        let mut queue = self.replies.lock().unwrap();
        queue
            .pop_front()
            .ok_or_else(|| OrchestratorError::Llm("fixture adapter exhausted".to_string()))
    }
}
