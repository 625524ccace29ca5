//! The control loop: `process_error` (one gated attempt) wrapped by
//! `attempt_with_backoff` (the jittered, LLM-consulting retry driver).
//!
//! A [`RepairSession`] owns the envelope, breaker, cascade handler, and
//! scorer for one repair chain and is mutated sequentially: a single
//! cooperative task per session, so no lock is needed around envelope state
//! itself. Cross-session shared state (memory buffer, rate limiter) is
//! behind `tokio::sync::Mutex`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use heal_coordination::backoff::BackoffPolicy;
use heal_coordination::observers::{self, Observer, ObserverContext, SuspicionLevel};
use heal_coordination::rate_limiter::TokenBucket;
use heal_coordination::{
    envelope, BudgetGroup, CascadeEntry, CascadeHandler, ConfidenceScorer, DualCircuitBreaker,
    ErrorClass, HistoricalFactors, MemoryBuffer, MemoryOutcome, PatchData, PatchEnvelope,
    PolicyConfig, Recommendation, RiskFlag,
};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::chat_adapter::ChatAdapter;
use crate::errors::OrchestratorError;
use crate::llm_adapter::{ConsultEnvelope, LlmAdapter};
use crate::minimal_tweak::minimal_tweak;
use crate::rebanker_subprocess::RebankerAdapter;
use crate::sandbox::SandboxExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Promote,
    Retry,
    Rollback,
    Stop,
    PauseAndBackoff,
    HumanReview,
    StrategyChange,
}

pub struct ProcessErrorInput {
    pub error_class: ErrorClass,
    pub message: String,
    pub candidate_patch: String,
    pub original_code: String,
    pub logits: Vec<f64>,
    pub language: String,
    pub file_paths: Vec<String>,
    pub attempt_number: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessErrorResult {
    pub action: Action,
    pub envelope: PatchEnvelope,
    pub extras: serde_json::Value,
}

pub struct AttemptOptions {
    pub max_attempts: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for AttemptOptions {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_wait_ms: 200,
            max_wait_ms: 10_000,
        }
    }
}

fn risk_score(level: SuspicionLevel) -> f64 {
    match level {
        SuspicionLevel::None => 0.0,
        SuspicionLevel::Low => 0.33,
        SuspicionLevel::Medium => 0.66,
        SuspicionLevel::High => 1.0,
    }
}

/// The watchdog's own suspicion ladder: escalates with attempt number and
/// consecutive-flag count independent of the generic observer levels.
/// `attempt >= 3 or consecutive >= 2` is danger; `attempt >= 4 or
/// consecutive >= 3` is extreme.
fn watchdog_ladder(attempt_number: u32, consecutive_flags: u32) -> SuspicionLevel {
    if attempt_number >= 4 || consecutive_flags >= 3 {
        SuspicionLevel::High
    } else if attempt_number >= 3 || consecutive_flags >= 2 {
        SuspicionLevel::Medium
    } else if consecutive_flags >= 1 {
        SuspicionLevel::Low
    } else {
        SuspicionLevel::None
    }
}

fn choose_strategy(error_class: ErrorClass, message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    match error_class {
        ErrorClass::Syntax if lowered.contains("unexpected token") => "reparse",
        ErrorClass::Syntax => "syntax_patch",
        ErrorClass::Logic | ErrorClass::Runtime => "logic_patch",
        ErrorClass::Performance => "optimize",
        ErrorClass::Security => "harden",
    }
}

fn decide_action(
    success: bool,
    recommendation: Recommendation,
    watchdog: SuspicionLevel,
    attempt_number: u32,
) -> Action {
    if watchdog == SuspicionLevel::High && attempt_number >= 2 {
        return Action::Rollback;
    }
    if watchdog != SuspicionLevel::None && attempt_number == 1 {
        return Action::PauseAndBackoff;
    }
    match recommendation {
        Recommendation::Promote => Action::Promote,
        Recommendation::Rollback => Action::Rollback,
        Recommendation::TryDifferentStrategy => Action::StrategyChange,
        Recommendation::Continue => {
            if success {
                Action::Promote
            } else {
                Action::Retry
            }
        }
    }
}

pub struct RepairSession {
    envelope: Option<PatchEnvelope>,
    breaker: DualCircuitBreaker,
    cascade: CascadeHandler,
    scorer: ConfidenceScorer,
    policy: PolicyConfig,
    sandbox: Arc<dyn SandboxExecutor>,
    rebanker: Arc<dyn RebankerAdapter>,
    rate_limiter: Arc<AsyncMutex<TokenBucket>>,
    memory: Arc<AsyncMutex<MemoryBuffer>>,
    previous_errors_detected: u32,
    consecutive_hang_flags: u32,
    workspace_root: String,
    historical: HistoricalFactors,
}

impl RepairSession {
    pub fn new(
        policy: PolicyConfig,
        sandbox: Arc<dyn SandboxExecutor>,
        rebanker: Arc<dyn RebankerAdapter>,
        rate_limiter: Arc<AsyncMutex<TokenBucket>>,
        memory: Arc<AsyncMutex<MemoryBuffer>>,
        workspace_root: String,
    ) -> Self {
        Self {
            envelope: None,
            breaker: DualCircuitBreaker::new(),
            cascade: CascadeHandler::new(policy.cascade_max_depth),
            scorer: ConfidenceScorer::new(),
            policy,
            sandbox,
            rebanker,
            rate_limiter,
            memory,
            previous_errors_detected: 0,
            consecutive_hang_flags: 0,
            workspace_root,
            historical: HistoricalFactors::default(),
        }
    }

    fn finalize_and_return(
        &mut self,
        action: Action,
        extras: serde_json::Value,
    ) -> ProcessErrorResult {
        let env = self.envelope.as_mut().expect("envelope initialized before finalize");
        envelope::finalize(env);
        ProcessErrorResult {
            action,
            envelope: env.clone(),
            extras,
        }
    }

    /// One gated attempt: the 23-step `process_error` contract.
    pub async fn process_error(
        &mut self,
        input: ProcessErrorInput,
    ) -> Result<ProcessErrorResult, OrchestratorError> {
        // 1. Rate-limit check.
        loop {
            let wait = {
                let mut bucket = self.rate_limiter.lock().await;
                if bucket.try_acquire() {
                    None
                } else {
                    Some(bucket.time_to_next_token())
                }
            };
            match wait {
                None => break,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }

        // 2. Wrap patch → envelope (first attempt only); freeze policy_snapshot.
        if self.envelope.is_none() {
            let patch_data = PatchData {
                language: input.language.clone(),
                error_class: input.error_class,
                message: input.message.clone(),
                candidate_patch: input.candidate_patch.clone(),
                original_code: input.original_code.clone(),
            };
            self.envelope = Some(envelope::wrap_patch(patch_data, &self.policy));
        }

        let group = input.error_class.budget_group();
        let watchdog_timeout_ms: u64 = 5_000;
        let observer_list = Observer::from_policy(&self.policy, watchdog_timeout_ms);
        let pre_exec_ctx = ObserverContext {
            candidate_patch: &input.candidate_patch,
            file_paths: &input.file_paths,
            elapsed_ms: 0,
            workspace_root: &self.workspace_root,
        };
        // The hang watchdog needs real elapsed time from the sandbox run
        // below, so it is dispatched separately after execution (step 13)
        // rather than here with everyone else.
        let mut observer_events: Vec<_> = observer_list
            .iter()
            .filter(|o| !matches!(o, Observer::HangWatchdog { .. }))
            .map(|o| o.evaluate(&pre_exec_ctx))
            .collect();

        // 3. Risk observer → attach risk_flags.
        let risky_events: Vec<RiskFlag> = observer_events
            .iter()
            .filter(|e| matches!(e.observer, heal_coordination::observers::ObserverKind::RiskyEdit) && e.suspicion != SuspicionLevel::None)
            .map(|e| RiskFlag {
                category: "risky_edit".to_string(),
                severity: format!("{:?}", e.suspicion).to_lowercase(),
                detail: e.detail.clone(),
            })
            .collect();
        let is_risky = !risky_events.is_empty();
        envelope::attach_risk_flags(self.envelope.as_mut().unwrap(), risky_events);

        // 4. Path observer → attach missing_paths.
        let missing_paths: Vec<String> = observer_events
            .iter()
            .filter(|e| matches!(e.observer, heal_coordination::observers::ObserverKind::PathResolution) && e.suspicion != SuspicionLevel::None)
            .map(|e| e.detail.clone())
            .collect();
        envelope::attach_missing_paths(self.envelope.as_mut().unwrap(), missing_paths);

        // 5. Confidence scorer → merge confidence_components.
        let risk_suspicion = observers::escalate(&observer_events);
        let taxonomy_difficulty = self
            .envelope
            .as_ref()
            .unwrap()
            .metadata
            .rebanker_raw
            .as_ref()
            .and_then(|d| d.difficulty);
        let confidence = self.scorer.score(
            &input.logits,
            input.error_class,
            risk_score(risk_suspicion),
            taxonomy_difficulty,
            &self.historical,
        );
        envelope::merge_confidence(self.envelope.as_mut().unwrap(), confidence);

        // 6. Breaker summary → set breaker_state.
        let breaker_summary = self.breaker.get_state_summary(group, &self.policy);
        envelope::set_breaker_state(self.envelope.as_mut().unwrap(), breaker_summary.state);

        // 7. Cascade depth + resource usage → merge.
        envelope::set_cascade_depth(self.envelope.as_mut().unwrap(), self.cascade.depth());

        // 8. Strategy selection.
        let strategy = choose_strategy(input.error_class, &input.message);

        // 9. Gate: risky + policy requires human.
        if is_risky && self.policy.require_human_on_risky {
            envelope::apply_developer_flag(
                self.envelope.as_mut().unwrap(),
                envelope::DeveloperFlag {
                    flagged: true,
                    message: "risky construct detected in candidate patch".to_string(),
                },
            );
            return Ok(self.finalize_and_return(
                Action::HumanReview,
                json!({"reason": "risky_edit", "strategy": strategy}),
            ));
        }

        // 10. Gate: breaker denies attempt.
        let (attempt_allowed, attempt_denied_reason) = self.breaker.can_attempt(group, &self.policy);
        if !attempt_allowed {
            return Ok(self.finalize_and_return(
                Action::Rollback,
                json!({"reason": "breaker_denied", "detail": attempt_denied_reason, "strategy": strategy}),
            ));
        }

        // 11. Gate: cascade stop, or low confidence while still closed (rollback).
        let friction = self.cascade.assess();
        if friction.should_stop {
            return Ok(self.finalize_and_return(
                Action::Stop,
                json!({"reason": "cascade_stop", "signal": friction.signal}),
            ));
        }
        if confidence.overall < self.policy.conf_floor(group) {
            return Ok(self.finalize_and_return(
                Action::Rollback,
                json!({"reason": "confidence_below_floor", "overall": confidence.overall}),
            ));
        }

        // 12. Start hang watchdog timer; 13. Sandbox execute.
        let started = Instant::now();
        let sandbox_result = self
            .sandbox
            .execute(&input.candidate_patch, &input.language)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (success, sandbox_message, resource_usage) = match &sandbox_result {
            Ok(outcome) => (
                outcome.succeeded(),
                outcome.stderr.clone(),
                envelope::ResourceUsage {
                    execution_time_ms: outcome.duration_ms,
                    memory_used_mb: 0.0,
                    cpu_used_percent: 0.0,
                },
            ),
            Err(e) => (false, e.to_string(), envelope::ResourceUsage::default()),
        };
        envelope::merge_resource_usage(self.envelope.as_mut().unwrap(), resource_usage);

        // The hang watchdog observer now runs with the real elapsed time
        // from the execution above, and its verdict is what actually
        // drives the trip detection below rather than a parallel hand-rolled
        // timeout check.
        let post_exec_ctx = ObserverContext {
            candidate_patch: &input.candidate_patch,
            file_paths: &input.file_paths,
            elapsed_ms,
            workspace_root: &self.workspace_root,
        };
        let watchdog_event = Observer::HangWatchdog { timeout_ms: watchdog_timeout_ms }.evaluate(&post_exec_ctx);
        let hang_flag_this_attempt = watchdog_event.suspicion != SuspicionLevel::None
            || matches!(sandbox_result, Err(OrchestratorError::SandboxTimeout(_)));
        observer_events.push(watchdog_event);

        self.consecutive_hang_flags = if hang_flag_this_attempt {
            self.consecutive_hang_flags + 1
        } else {
            0
        };
        // The observer only reports a binary trip/no-trip per attempt; the
        // ladder layers in how many consecutive attempts have tripped and
        // how far into the chain this attempt is, so it escalates faster
        // than a single slow attempt would.
        let watchdog_suspicion = if hang_flag_this_attempt {
            watchdog_ladder(input.attempt_number, self.consecutive_hang_flags)
        } else {
            SuspicionLevel::None
        };

        // 14. Re-banker invoke; verify existing hash first, then attach new diagnostic.
        // A hash mismatch is a tampering signal, not an ordinary failure: it
        // aborts the chain into HUMAN_REVIEW rather than propagating as an
        // error from process_error.
        let diagnostic = self
            .rebanker
            .diagnose(&input.candidate_patch, &input.language)
            .await?;
        let seal_result = if let Some(diag) = diagnostic.clone() {
            envelope::attach_rebanker_diagnostic(
                self.envelope.as_mut().unwrap(),
                input.attempt_number,
                diag,
            )
        } else {
            envelope::verify_rebanker_hash(self.envelope.as_ref().unwrap())
        };
        if let Err(heal_coordination::EnvelopeError::HashMismatch { .. }) = seal_result {
            envelope::apply_developer_flag(
                self.envelope.as_mut().unwrap(),
                envelope::DeveloperFlag {
                    flagged: true,
                    message: "re-banker diagnostic hash mismatch: tampering detected, chain aborted".to_string(),
                },
            );
            return Ok(self.finalize_and_return(
                Action::HumanReview,
                json!({"reason": "rebanker_hash_mismatch"}),
            ));
        }
        seal_result?;

        // 15. Compute errors_detected / errors_resolved / lines_of_code.
        let errors_detected: u32 = if diagnostic.is_some() { 1 } else { 0 };
        let errors_resolved = self.previous_errors_detected.saturating_sub(errors_detected);
        let lines_of_code = input.original_code.lines().count().max(1);

        // 16. Record attempt in breaker; get recommendation.
        self.breaker.record_attempt(
            group,
            success,
            errors_detected,
            errors_resolved,
            confidence.overall,
            lines_of_code,
            &self.policy,
        );
        let breaker_summary = self.breaker.get_state_summary(group, &self.policy);
        let recommendation = breaker_summary.recommended_action;

        // 17. Persist patch_result to memory.
        {
            let mut memory = self.memory.lock().await;
            memory.safe_add_outcome(MemoryOutcome {
                id: format!("{}-{}", self.envelope.as_ref().unwrap().patch_id, input.attempt_number),
                message: input.message.clone(),
                code_snippet: input.candidate_patch.clone(),
                error_class: input.error_class,
                success,
                timestamp: chrono::Utc::now(),
            });
        }

        // 18. Update envelope trend_metadata.
        let error_trend = if errors_detected < self.previous_errors_detected {
            envelope::ErrorTrend::Improving
        } else if errors_detected > self.previous_errors_detected {
            envelope::ErrorTrend::Worsening
        } else {
            envelope::ErrorTrend::Stable
        };
        let quality_score = if errors_detected == 0 { 1.0 } else { confidence.overall };
        envelope::update_trend(
            self.envelope.as_mut().unwrap(),
            envelope::TrendMetadata {
                errors_detected,
                errors_resolved,
                quality_score,
                improvement_velocity: breaker_summary.improvement_velocity,
                stagnation_risk: if matches!(error_trend, envelope::ErrorTrend::Stable) {
                    0.5
                } else {
                    0.0
                },
                error_trend,
            },
        );

        let counter_kind = match group {
            BudgetGroup::Syntax => heal_coordination::envelope::CounterKind::Syntax,
            BudgetGroup::Logic => heal_coordination::envelope::CounterKind::Logic,
        };
        envelope::update_counters(self.envelope.as_mut().unwrap(), counter_kind, errors_resolved);

        // 19. Refresh historical factors from memory's record of similar past
        // errors from *other* chains. The scorer itself stays a pure
        // function of whatever is passed in; this is the only place that
        // rebuilds the state threaded across attempts. With no similar
        // outcomes on file the factors stay at their neutral defaults
        // rather than drifting off this chain's own attempt count — and
        // this chain's own just-persisted attempts are excluded by
        // patch_id prefix so a long retry sequence doesn't become its own
        // (self-referential) history.
        {
            let own_prefix = format!("{}-", self.envelope.as_ref().unwrap().patch_id);
            let memory = self.memory.lock().await;
            let similar: Vec<_> = memory
                .get_similar_outcomes(&input.message, 20)
                .into_iter()
                .filter(|o| !o.id.starts_with(&own_prefix))
                .collect();
            if !similar.is_empty() {
                let total = similar.len() as f64;
                let successes = similar.iter().filter(|o| o.success).count() as f64;
                self.historical.historical_success_rate = successes / total;
                self.historical.pattern_similarity = (total / 20.0).clamp(0.3, 1.0);

                let same_class: Vec<_> = similar
                    .iter()
                    .filter(|o| o.error_class == input.error_class)
                    .collect();
                if !same_class.is_empty() {
                    let class_successes =
                        same_class.iter().filter(|o| o.success).count() as f64;
                    let class_factor =
                        (class_successes / same_class.len() as f64).max(0.5);
                    match group {
                        BudgetGroup::Syntax => self.historical.syntax_history_factor = class_factor,
                        BudgetGroup::Logic => self.historical.logic_history_factor = class_factor,
                    }
                }
            }
        }

        // 20. If failure → add to cascade chain.
        if !success {
            let severity = diagnostic
                .as_ref()
                .map(|d| d.severity)
                .unwrap_or(heal_coordination::rebanker::Severity::Error);
            self.cascade.record(CascadeEntry {
                error_class: input.error_class,
                message: sandbox_message.clone(),
                severity,
            });
        }

        envelope::append_attempt(
            self.envelope.as_mut().unwrap(),
            envelope::AttemptRecord {
                timestamp: chrono::Utc::now(),
                success,
                note: sandbox_message.clone(),
                breaker_state: breaker_summary.state,
                failure_count: breaker_summary.failure_count,
            },
        );
        envelope::add_timeline_entry(
            self.envelope.as_mut().unwrap(),
            envelope::TimelineEntry {
                attempt_index: input.attempt_number,
                errors_detected,
                errors_resolved,
                overall_confidence: confidence.overall,
                breaker_state: breaker_summary.state,
                action_tag: strategy.to_string(),
            },
        );

        self.previous_errors_detected = errors_detected;

        // 21. Map to action.
        let action = decide_action(success, recommendation, watchdog_suspicion, input.attempt_number);

        if action == Action::Promote {
            envelope::mark_success(self.envelope.as_mut().unwrap(), true);
        }

        // 22. Finalize, with optional final-polish gate.
        let apply_final_polish = self.policy.enable_final_polish
            && action == Action::Promote
            && confidence.overall >= 0.95
            && errors_detected == 0;

        let extras = json!({
            "strategy": strategy,
            "recommendation": format!("{recommendation:?}"),
            "watchdog_suspicion": format!("{watchdog_suspicion:?}"),
            "final_polish_applied": apply_final_polish,
        });

        Ok(self.finalize_and_return(action, extras))
    }

    /// Build the consult envelope handed to the LLM adapter between retries.
    fn build_consult_envelope(
        &self,
        input: &ProcessErrorInput,
        last_result: &ProcessErrorResult,
        similar_outcomes: Vec<String>,
    ) -> ConsultEnvelope {
        let env = &last_result.envelope;
        ConsultEnvelope {
            language: input.language.clone(),
            error_class: input.error_class.to_string(),
            message: input.message.clone(),
            original_code: input.original_code.clone(),
            candidate_patch: input.candidate_patch.clone(),
            rebanker_raw: env.metadata.rebanker_raw.clone(),
            rebanker_previous: env
                .metadata
                .rebanker_history
                .last()
                .map(|h| h.diagnostic.clone()),
            similar_outcomes,
            attempt_index: input.attempt_number,
        }
    }

    /// The retry driver: loops `process_error`, and on `RETRY`/`PAUSE_AND_BACKOFF`
    /// builds a consult envelope, backs off, optionally calls the LLM, and
    /// replaces the candidate patch before the next attempt.
    pub async fn attempt_with_backoff(
        &mut self,
        error_class: ErrorClass,
        message: String,
        mut candidate_patch: String,
        original_code: String,
        logits: Vec<f64>,
        language: String,
        file_paths: Vec<String>,
        opts: AttemptOptions,
        llm_adapter: Option<Arc<dyn LlmAdapter>>,
        chat_adapter: Option<Arc<dyn ChatAdapter>>,
    ) -> Result<ProcessErrorResult, OrchestratorError> {
        let backoff = BackoffPolicy::medium();
        let mut last_result: Option<ProcessErrorResult> = None;

        for attempt_number in 1..=opts.max_attempts {
            let input = ProcessErrorInput {
                error_class,
                message: message.clone(),
                candidate_patch: candidate_patch.clone(),
                original_code: original_code.clone(),
                logits: logits.clone(),
                language: language.clone(),
                file_paths: file_paths.clone(),
                attempt_number,
            };

            let result = self.process_error(input).await?;

            match result.action {
                Action::Promote | Action::Rollback | Action::HumanReview | Action::Stop => {
                    return Ok(result);
                }
                Action::PauseAndBackoff | Action::Retry => {
                    let oscillating = matches!(
                        self.cascade.assess().signal,
                        Some(heal_coordination::FrictionSignal::Oscillation)
                    );

                    // Trend-aware watchdog: ≥2 consecutive hang flags with no
                    // improvement forces a rollback rather than another spin.
                    if self.consecutive_hang_flags >= 2
                        && !matches!(result.envelope.trend_metadata.error_trend, envelope::ErrorTrend::Improving)
                    {
                        return Ok(self.finalize_and_return(
                            Action::Rollback,
                            json!({"reason": "trend_aware_watchdog"}),
                        ));
                    }

                    let similar_outcomes: Vec<String> = {
                        let memory = self.memory.lock().await;
                        memory
                            .get_similar_outcomes(&message, 3)
                            .into_iter()
                            .map(|o| o.message.clone())
                            .collect()
                    };
                    let consult = self.build_consult_envelope(&input_for_consult(
                        error_class,
                        &message,
                        &candidate_patch,
                        &original_code,
                        &logits,
                        &language,
                        &file_paths,
                        attempt_number,
                    ), &result, similar_outcomes);

                    let wait = backoff.delay_for_attempt(attempt_number, oscillating);
                    let wait = wait.clamp(
                        Duration::from_millis(opts.min_wait_ms),
                        Duration::from_millis(opts.max_wait_ms),
                    );
                    tokio::time::sleep(wait).await;

                    let mut next_candidate = minimal_tweak(&candidate_patch, &language);

                    if let Some(llm) = &llm_adapter {
                        let reply = llm.repair(&consult).await;
                        if let Ok(reply) = &reply {
                            {
                                let mut memory = self.memory.lock().await;
                                memory.safe_add_outcome(MemoryOutcome {
                                    id: format!("jitter-{attempt_number}"),
                                    message: serde_json::to_string(&consult).unwrap_or_default(),
                                    code_snippet: reply.raw_response.clone(),
                                    error_class,
                                    success: false,
                                    timestamp: chrono::Utc::now(),
                                });
                            }
                            if let Some(chat) = &chat_adapter {
                                chat.add_message("user", &serde_json::to_string(&consult).unwrap_or_default(), json!({"attempt": attempt_number}));
                                chat.add_message("ai", &reply.raw_response, json!({"attempt": attempt_number}));
                            }
                            let sanitized = sanitize_or_fallback(&reply.patched_code, &self.policy, &candidate_patch, &language);
                            next_candidate = sanitized;
                        }
                    }

                    candidate_patch = next_candidate;
                    last_result = Some(result);
                }
                Action::StrategyChange => {
                    candidate_patch = minimal_tweak(&candidate_patch, &language);
                    last_result = Some(result);
                }
            }
        }

        last_result.ok_or_else(|| OrchestratorError::Config("no attempts were made".to_string()))
    }
}

fn input_for_consult(
    error_class: ErrorClass,
    message: &str,
    candidate_patch: &str,
    original_code: &str,
    logits: &[f64],
    language: &str,
    file_paths: &[String],
    attempt_number: u32,
) -> ProcessErrorInput {
    ProcessErrorInput {
        error_class,
        message: message.to_string(),
        candidate_patch: candidate_patch.to_string(),
        original_code: original_code.to_string(),
        logits: logits.to_vec(),
        language: language.to_string(),
        file_paths: file_paths.to_vec(),
        attempt_number,
    }
}

fn sanitize_or_fallback(
    proposed: &str,
    policy: &PolicyConfig,
    current_candidate: &str,
    language: &str,
) -> String {
    let lines_changed = proposed.lines().count();
    let lowered = proposed.to_lowercase();
    let has_disallowed = policy
        .risky_keywords
        .iter()
        .any(|kw| lowered.contains(&kw.to_lowercase()));

    if lines_changed > 200 || has_disallowed {
        minimal_tweak(current_candidate, language)
    } else {
        proposed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::{FixtureLlmAdapter, LlmReply};
    use crate::rebanker_subprocess::FixtureRebanker;
    use crate::sandbox::{FixtureSandbox, SandboxOutcome};
    use heal_coordination::rebanker::{RebankerDiagnostic, Severity};
    use tokio::sync::Mutex as AsyncMutex;

    fn policy() -> PolicyConfig {
        let mut p = PolicyConfig::mid_tier();
        p.grace_attempts = 1;
        p
    }

    fn diag(msg: &str) -> RebankerDiagnostic {
        RebankerDiagnostic {
            file: "a.py".to_string(),
            line: Some(1),
            column: Some(1),
            message: msg.to_string(),
            code: "E001".to_string(),
            severity: Severity::Error,
            family: None,
            difficulty: None,
            cluster_id: None,
            hint: None,
        }
    }

    fn make_session(
        sandbox_outcomes: Vec<SandboxOutcome>,
        diagnostics: Vec<Option<RebankerDiagnostic>>,
    ) -> RepairSession {
        RepairSession::new(
            policy(),
            Arc::new(FixtureSandbox::new(sandbox_outcomes)),
            Arc::new(FixtureRebanker::new(diagnostics)),
            Arc::new(AsyncMutex::new(TokenBucket::new(1000))),
            Arc::new(AsyncMutex::new(MemoryBuffer::default())),
            "/workspace".to_string(),
        )
    }

    #[tokio::test]
    async fn clean_first_attempt_promotes() {
        let mut session = make_session(
            vec![SandboxOutcome {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                duration_ms: 5,
            }],
            vec![None],
        );

        let result = session
            .attempt_with_backoff(
                ErrorClass::Syntax,
                "unexpected token".to_string(),
                "fn main() {}".to_string(),
                "fn main() {".to_string(),
                vec![2.0, 0.1],
                "rust".to_string(),
                vec!["main.rs".to_string()],
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

        assert_eq!(result.action, Action::Promote);
        assert!(result.envelope.success);
    }

    #[tokio::test]
    async fn retries_with_llm_consult_until_clean() {
        let mut session = make_session(
            vec![
                SandboxOutcome {
                    stdout: String::new(),
                    stderr: "syntax error".to_string(),
                    exit_code: 1,
                    duration_ms: 5,
                },
                SandboxOutcome {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                    duration_ms: 5,
                },
            ],
            vec![Some(diag("unexpected token")), None],
        );

        let llm = Arc::new(FixtureLlmAdapter::new(vec![LlmReply {
            patched_code: "fn main() {}".to_string(),
            raw_response: "```rust\nfn main() {}\n```".to_string(),
        }]));

        let result = session
            .attempt_with_backoff(
                ErrorClass::Syntax,
                "unexpected token".to_string(),
                "fn main() {".to_string(),
                "fn main() {".to_string(),
                vec![1.0, 0.2],
                "rust".to_string(),
                vec!["main.rs".to_string()],
                AttemptOptions {
                    max_attempts: 4,
                    min_wait_ms: 1,
                    max_wait_ms: 5,
                },
                Some(llm),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.action, Action::Promote);
    }

    #[tokio::test]
    async fn risky_patch_triggers_human_review() {
        let mut session = make_session(vec![], vec![]);
        let result = session
            .attempt_with_backoff(
                ErrorClass::Security,
                "possible injection".to_string(),
                "os.system(\"rm -rf /\")".to_string(),
                "os.system(\"ls\")".to_string(),
                vec![1.0],
                "python".to_string(),
                vec!["app.py".to_string()],
                AttemptOptions {
                    max_attempts: 2,
                    min_wait_ms: 1,
                    max_wait_ms: 5,
                },
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.action, Action::HumanReview);
    }

    #[tokio::test]
    async fn tampered_rebanker_diagnostic_aborts_into_human_review() {
        let mut session = make_session(
            vec![
                SandboxOutcome {
                    stdout: String::new(),
                    stderr: "syntax error".to_string(),
                    exit_code: 1,
                    duration_ms: 1,
                },
                SandboxOutcome {
                    stdout: String::new(),
                    stderr: "syntax error".to_string(),
                    exit_code: 1,
                    duration_ms: 1,
                },
            ],
            vec![Some(diag("unexpected token")), None],
        );

        let first = session
            .process_error(ProcessErrorInput {
                error_class: ErrorClass::Syntax,
                message: "unexpected token".to_string(),
                candidate_patch: "fn main() {".to_string(),
                original_code: "fn main() {".to_string(),
                logits: vec![1.0, 0.1],
                language: "rust".to_string(),
                file_paths: vec!["main.rs".to_string()],
                attempt_number: 1,
            })
            .await
            .unwrap();
        assert!(first.envelope.metadata.rebanker_raw.is_some());

        // Scenario D: external code tampers with the sealed diagnostic between attempts.
        session
            .envelope
            .as_mut()
            .unwrap()
            .metadata
            .rebanker_raw
            .as_mut()
            .unwrap()
            .line = Some(999);

        let second = session
            .process_error(ProcessErrorInput {
                error_class: ErrorClass::Syntax,
                message: "unexpected token".to_string(),
                candidate_patch: "fn main() {".to_string(),
                original_code: "fn main() {".to_string(),
                logits: vec![1.0, 0.1],
                language: "rust".to_string(),
                file_paths: vec!["main.rs".to_string()],
                attempt_number: 2,
            })
            .await
            .unwrap();

        assert_eq!(second.action, Action::HumanReview);
        assert!(second.envelope.metadata.developer_flag.unwrap().flagged);
    }

    #[test]
    fn high_severity_watchdog_never_promotes_on_first_attempt() {
        let action = decide_action(true, Recommendation::Promote, SuspicionLevel::High, 1);
        assert_eq!(action, Action::PauseAndBackoff);
    }

    #[test]
    fn high_severity_watchdog_rolls_back_from_second_attempt() {
        let action = decide_action(true, Recommendation::Promote, SuspicionLevel::High, 2);
        assert_eq!(action, Action::Rollback);
    }

    #[test]
    fn oscillating_confidence_prefers_strategy_change_over_promote_or_rollback() {
        let action = decide_action(false, Recommendation::TryDifferentStrategy, SuspicionLevel::None, 3);
        assert_eq!(action, Action::StrategyChange);
    }
}
