//! Bounded, TTL'd memory of past repair outcomes, used to surface similar
//! past attempts to the LLM consult step.
//!
//! A capped FIFO ring with an age cutoff, a resilient write path that never
//! lets a persistence failure interrupt the retry loop, and a pluggable
//! backend for snapshotting to disk between runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error_class::ErrorClass;

const DEFAULT_CAPACITY: usize = 500;
const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory backend serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryOutcome {
    pub id: String,
    pub message: String,
    pub code_snippet: String,
    pub error_class: ErrorClass,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Jaccard overlap of the whitespace-delimited lowercase token sets of two
/// messages. Token granularity (not bigrams) because memory queries compare
/// whole error messages and code snippets, not single lines.
fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

pub trait PersistenceBackend {
    fn save(&self, outcomes: &[MemoryOutcome]) -> Result<(), MemoryError>;
    fn load(&self) -> Result<Vec<MemoryOutcome>, MemoryError>;
}

/// Newline-delimited JSON file backend.
pub struct JsonlFileBackend {
    path: PathBuf,
}

impl JsonlFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PersistenceBackend for JsonlFileBackend {
    fn save(&self, outcomes: &[MemoryOutcome]) -> Result<(), MemoryError> {
        let mut body = String::new();
        for outcome in outcomes {
            body.push_str(&serde_json::to_string(outcome)?);
            body.push('\n');
        }
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<MemoryOutcome>, MemoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut outcomes = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            outcomes.push(serde_json::from_str(line)?);
        }
        Ok(outcomes)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_outcomes: usize,
    pub success_rate: f64,
    pub oldest_age_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    capacity: usize,
    ttl: Duration,
    items: VecDeque<MemoryOutcome>,
}

impl MemoryBuffer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            items: VecDeque::new(),
        }
    }

    fn prune_expired(&mut self) {
        let now = Utc::now();
        self.items.retain(|o| now - o.timestamp < self.ttl);
    }

    /// Add an outcome, evicting the oldest entry if at capacity and pruning
    /// anything past the TTL. Fallible variant for callers that want to
    /// observe persistence-adjacent errors; prefer [`Self::safe_add_outcome`]
    /// on the hot path.
    pub fn add_outcome(&mut self, outcome: MemoryOutcome) {
        self.prune_expired();
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(outcome);
    }

    /// Never-throw write path: the retry loop must keep running even if
    /// memory bookkeeping misbehaves. Any unexpected condition is logged and
    /// swallowed.
    pub fn safe_add_outcome(&mut self, outcome: MemoryOutcome) {
        let id = outcome.id.clone();
        let len_before = self.items.len();
        self.add_outcome(outcome);
        if self.items.len() == len_before {
            tracing::warn!(outcome_id = %id, "memory buffer did not grow after add_outcome");
        }
    }

    /// Outcomes whose message token-overlaps the query message above a
    /// small relevance floor, most similar first.
    pub fn get_similar_outcomes(&self, message: &str, limit: usize) -> Vec<&MemoryOutcome> {
        let mut scored: Vec<(f64, &MemoryOutcome)> = self
            .items
            .iter()
            .map(|o| (jaccard(message, &o.message), o))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, o)| o).collect()
    }

    pub fn get_metrics(&self) -> MemoryMetrics {
        let total = self.items.len();
        let successes = self.items.iter().filter(|o| o.success).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };
        let oldest_age_seconds = self
            .items
            .front()
            .map(|o| (Utc::now() - o.timestamp).num_seconds())
            .unwrap_or(0);
        MemoryMetrics {
            total_outcomes: total,
            success_rate,
            oldest_age_seconds,
        }
    }

    pub fn save(&self, backend: &dyn PersistenceBackend) -> Result<(), MemoryError> {
        let snapshot: Vec<MemoryOutcome> = self.items.iter().cloned().collect();
        backend.save(&snapshot)
    }

    pub fn load(
        capacity: usize,
        ttl: Duration,
        backend: &dyn PersistenceBackend,
    ) -> Result<Self, MemoryError> {
        let mut buffer = Self::new(capacity, ttl);
        for outcome in backend.load()? {
            buffer.add_outcome(outcome);
        }
        Ok(buffer)
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::days(DEFAULT_TTL_DAYS))
    }
}
