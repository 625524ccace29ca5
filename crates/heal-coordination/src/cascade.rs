//! Cascade/friction detection: watches the chain of errors seen across
//! attempts for patterns that mean "more attempts won't help": oscillation
//! between two recurring messages, a plateau on an unchanged message,
//! category churn, or severity escalating attempt over attempt.
//!
//! This is the only source of an authoritative `STOP`; the breaker only
//! ever recommends rollback or a strategy change, never termination.

use serde::{Deserialize, Serialize};

use crate::error_class::ErrorClass;
use crate::rebanker::Severity;
use crate::ring::RingBuffer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub error_class: ErrorClass,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrictionSignal {
    Oscillation,
    Plateau,
    CategoryChurn,
    RapidEscalation,
    MaxDepthReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrictionAssessment {
    pub should_stop: bool,
    pub signal: Option<FrictionSignal>,
    pub depth: usize,
}

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
    }
}

#[derive(Debug, Clone)]
pub struct CascadeHandler {
    chain: RingBuffer<CascadeEntry>,
    max_depth: usize,
}

impl CascadeHandler {
    pub fn new(max_depth: usize) -> Self {
        Self {
            chain: RingBuffer::new(max_depth.max(1)),
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    pub fn record(&mut self, entry: CascadeEntry) {
        self.chain.push(entry);
    }

    fn plateaued(&self) -> bool {
        let recent = self.chain.recent(3);
        recent.len() == 3 && recent.windows(2).all(|w| w[0].message == w[1].message)
    }

    fn oscillating(&self) -> bool {
        let recent = self.chain.recent(4);
        if recent.len() < 4 {
            return false;
        }
        recent[0].message == recent[2].message
            && recent[1].message == recent[3].message
            && recent[0].message != recent[1].message
    }

    fn category_churn(&self) -> bool {
        let recent = self.chain.recent(5);
        if recent.len() < 5 {
            return false;
        }
        let distinct: std::collections::HashSet<_> = recent.iter().map(|e| e.error_class).collect();
        distinct.len() >= 4
    }

    fn rapid_escalation(&self) -> bool {
        let recent = self.chain.recent(3);
        if recent.len() < 3 {
            return false;
        }
        recent
            .windows(2)
            .all(|w| severity_rank(w[1].severity) > severity_rank(w[0].severity))
    }

    /// Run the full friction assessment. Depth exhaustion takes priority, but
    /// every signal is checked independently so callers can log the actual
    /// cause rather than just "depth exceeded".
    pub fn assess(&self) -> FrictionAssessment {
        let depth = self.depth();

        if depth >= self.max_depth {
            return FrictionAssessment {
                should_stop: true,
                signal: Some(FrictionSignal::MaxDepthReached),
                depth,
            };
        }

        let signal = if self.oscillating() {
            Some(FrictionSignal::Oscillation)
        } else if self.plateaued() {
            Some(FrictionSignal::Plateau)
        } else if self.category_churn() {
            Some(FrictionSignal::CategoryChurn)
        } else if self.rapid_escalation() {
            Some(FrictionSignal::RapidEscalation)
        } else {
            None
        };

        FrictionAssessment {
            should_stop: signal.is_some(),
            signal,
            depth,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.assess().should_stop
    }
}
