//! Patch envelope: the append-only, hash-stable audit record that threads
//! through an entire retry chain.
//!
//! The envelope is mutated exclusively through the free-function helpers
//! below (never by poking fields from outside this crate's call sites) so
//! that every transition is auditable: `patch_id` fixed at creation,
//! `attempts`/`timeline` append-only, the re-banker's immutable diagnostic
//! sealed and hash-reverified on every read, and `envelope_hash` stable
//! across cosmetic re-emissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical;
use crate::error_class::ErrorClass;
use crate::policy::PolicyConfig;
use crate::rebanker::RebankerDiagnostic;

#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("attempted to overwrite immutable field `{0}` with a different value")]
    ImmutableFieldViolation(String),
    #[error("rebanker diagnostic hash mismatch: stored envelope state has been tampered with (expected {expected}, found {actual})")]
    HashMismatch { expected: String, actual: String },
    #[error("envelope schema validation failed: {0}")]
    SchemaValidation(String),
}

/// The patch and context a chain was created to fix. Hashed to derive
/// `patch_id`; never mutated after `wrap_patch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
    pub language: String,
    pub error_class: ErrorClass,
    pub message: String,
    pub candidate_patch: String,
    pub original_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub note: String,
    pub breaker_state: NormalizedBreakerState,
    pub failure_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTrend {
    Improving,
    Worsening,
    Stable,
    Oscillating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub attempt_index: u32,
    pub errors_detected: u32,
    pub errors_resolved: u32,
    pub overall_confidence: f64,
    pub breaker_state: NormalizedBreakerState,
    pub action_tag: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub syntax: f64,
    pub logic: f64,
    pub risk: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMetadata {
    pub errors_detected: u32,
    pub errors_resolved: u32,
    pub quality_score: f64,
    pub improvement_velocity: f64,
    pub stagnation_risk: f64,
    pub error_trend: ErrorTrend,
}

impl Default for TrendMetadata {
    fn default() -> Self {
        Self {
            errors_detected: 0,
            errors_resolved: 0,
            quality_score: 0.0,
            improvement_velocity: 0.0,
            stagnation_risk: 0.0,
            error_trend: ErrorTrend::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub syntax_errors_resolved: u32,
    pub logic_errors_resolved: u32,
    pub other_errors_resolved: u32,
    pub total_attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum CounterKind {
    Syntax,
    Logic,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub execution_time_ms: u64,
    pub memory_used_mb: f64,
    pub cpu_used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub category: String,
    pub severity: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperFlag {
    pub flagged: bool,
    pub message: String,
}

/// A sealed, previously-attached re-banker diagnostic kept for audit and for
/// the orchestrator's `rebanker_previous` field in the jitter consult
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebankerHistoryEntry {
    pub attempt_index: u32,
    pub diagnostic: RebankerDiagnostic,
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub rebanker_raw: Option<RebankerDiagnostic>,
    pub rebanker_hash: Option<String>,
    #[serde(default)]
    pub rebanker_history: Vec<RebankerHistoryEntry>,
    pub rebanker_interpreted: Option<String>,
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    #[serde(default)]
    pub missing_paths: Vec<String>,
    pub developer_flag: Option<DeveloperFlag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchEnvelope {
    pub patch_id: String,
    pub initial_patch: PatchData,
    pub attempts: Vec<AttemptRecord>,
    pub timeline: Vec<TimelineEntry>,
    pub metadata: EnvelopeMetadata,
    pub confidence_components: ConfidenceComponents,
    pub trend_metadata: TrendMetadata,
    pub counters: Counters,
    pub policy_snapshot: PolicyConfig,
    pub breaker_state: NormalizedBreakerState,
    pub cascade_depth: usize,
    pub resource_usage: ResourceUsage,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub envelope_hash: Option<String>,
}

/// Create a fresh envelope for a new repair chain. `patch_id` is derived
/// once here and never recomputed.
pub fn wrap_patch(patch_data: PatchData, policy: &PolicyConfig) -> PatchEnvelope {
    let digest = canonical::canonical_hash(&patch_data).unwrap_or_default();
    let patch_id = digest.chars().take(16).collect();

    PatchEnvelope {
        patch_id,
        initial_patch: patch_data,
        attempts: Vec::new(),
        timeline: Vec::new(),
        metadata: EnvelopeMetadata::default(),
        confidence_components: ConfidenceComponents::default(),
        trend_metadata: TrendMetadata::default(),
        counters: Counters::default(),
        policy_snapshot: policy.clone(),
        breaker_state: NormalizedBreakerState::Closed,
        cascade_depth: 0,
        resource_usage: ResourceUsage::default(),
        success: false,
        timestamp: None,
        envelope_hash: None,
    }
}

pub fn append_attempt(env: &mut PatchEnvelope, record: AttemptRecord) {
    env.attempts.push(record);
    env.counters.total_attempts = env.attempts.len() as u32;
}

pub fn merge_confidence(env: &mut PatchEnvelope, components: ConfidenceComponents) {
    env.confidence_components = components;
}

pub fn update_trend(env: &mut PatchEnvelope, metrics: TrendMetadata) {
    env.trend_metadata = metrics;
}

pub fn set_breaker_state(env: &mut PatchEnvelope, state: NormalizedBreakerState) {
    env.breaker_state = state;
}

pub fn set_cascade_depth(env: &mut PatchEnvelope, depth: usize) {
    env.cascade_depth = depth;
}

pub fn merge_resource_usage(env: &mut PatchEnvelope, usage: ResourceUsage) {
    env.resource_usage = usage;
}

pub fn apply_developer_flag(env: &mut PatchEnvelope, flag: DeveloperFlag) {
    env.metadata.developer_flag = Some(flag);
}

pub fn mark_success(env: &mut PatchEnvelope, success: bool) {
    env.success = success;
}

pub fn update_counters(env: &mut PatchEnvelope, kind: CounterKind, resolved: u32) {
    match kind {
        CounterKind::Syntax => env.counters.syntax_errors_resolved += resolved,
        CounterKind::Logic => env.counters.logic_errors_resolved += resolved,
        CounterKind::Other => env.counters.other_errors_resolved += resolved,
    }
}

pub fn add_timeline_entry(env: &mut PatchEnvelope, entry: TimelineEntry) {
    env.timeline.push(entry);
}

pub fn set_envelope_timestamp(env: &mut PatchEnvelope) {
    env.timestamp = Some(Utc::now());
}

/// Compute and stamp `envelope_hash` over a canonical serialization that
/// excludes `timestamp` and `envelope_hash` itself, so re-emitting an
/// otherwise-unchanged envelope (with a fresh timestamp) yields the same
/// hash.
pub fn set_envelope_hash(env: &mut PatchEnvelope) {
    env.envelope_hash = Some(compute_envelope_hash(env));
}

fn compute_envelope_hash(env: &PatchEnvelope) -> String {
    let mut value = serde_json::to_value(env).expect("PatchEnvelope always serializes");
    if let serde_json::Value::Object(ref mut map) = value {
        map.remove("timestamp");
        map.remove("envelope_hash");
    }
    let canonical = canonical::canonical_value(&value);
    let s = serde_json::to_string(&canonical).expect("canonical value always serializes");
    canonical::sha256_hex(&s)
}

/// Re-verify that the envelope's currently-attached re-banker diagnostic
/// still hashes to `metadata.rebanker_hash`. Call before every read of
/// `rebanker_raw` and before overwriting it with a new attempt's diagnostic.
pub fn verify_rebanker_hash(env: &PatchEnvelope) -> Result<(), EnvelopeError> {
    match (&env.metadata.rebanker_raw, &env.metadata.rebanker_hash) {
        (Some(raw), Some(expected)) => {
            let actual = canonical::canonical_hash(raw).unwrap_or_default();
            if &actual != expected {
                return Err(EnvelopeError::HashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            Ok(())
        }
        (None, None) => Ok(()),
        _ => Err(EnvelopeError::SchemaValidation(
            "rebanker_raw/rebanker_hash must both be present or both absent".to_string(),
        )),
    }
}

/// Seal a new diagnostic for `attempt_index` into the envelope.
///
/// First re-verifies any previously-sealed diagnostic (catching external
/// tampering per Scenario D), archives it into `rebanker_history`, then
/// seals the new diagnostic as the current `rebanker_raw`/`rebanker_hash`.
pub fn attach_rebanker_diagnostic(
    env: &mut PatchEnvelope,
    attempt_index: u32,
    diagnostic: RebankerDiagnostic,
) -> Result<(), EnvelopeError> {
    verify_rebanker_hash(env)?;

    if let (Some(prev_raw), Some(prev_hash)) = (
        env.metadata.rebanker_raw.take(),
        env.metadata.rebanker_hash.take(),
    ) {
        env.metadata.rebanker_history.push(RebankerHistoryEntry {
            attempt_index: attempt_index.saturating_sub(1),
            diagnostic: prev_raw,
            hash: prev_hash,
        });
    }

    let hash = canonical::canonical_hash(&diagnostic).unwrap_or_default();
    env.metadata.rebanker_raw = Some(diagnostic);
    env.metadata.rebanker_hash = Some(hash);
    Ok(())
}

/// Set the mutable LLM-summary field. Does not participate in hashing and
/// never collides with the immutable `rebanker_raw`.
pub fn set_rebanker_interpreted(env: &mut PatchEnvelope, summary: String) {
    env.metadata.rebanker_interpreted = Some(summary);
}

pub fn attach_risk_flags(env: &mut PatchEnvelope, flags: Vec<RiskFlag>) {
    env.metadata.risk_flags = flags;
}

pub fn attach_missing_paths(env: &mut PatchEnvelope, paths: Vec<String>) {
    env.metadata.missing_paths = paths;
}

/// Stamp timestamp then hash in one step: the usual finalize call.
pub fn finalize(env: &mut PatchEnvelope) {
    set_envelope_timestamp(env);
    set_envelope_hash(env);
}
