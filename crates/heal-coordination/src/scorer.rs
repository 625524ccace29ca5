//! Confidence scoring: turns a raw per-attempt logits vector plus historical
//! context into the bounded [0, 1] scores stored on
//! [`crate::envelope::ConfidenceComponents`].
//!
//! Uses a numerically-stable softmax (subtract the row max before
//! exponentiating) so large logit magnitudes from an upstream model never
//! overflow `f64::exp`.

use serde::{Deserialize, Serialize};

use crate::envelope::ConfidenceComponents;
use crate::error_class::ErrorClass;

/// Numerically stable softmax. Returns an empty vector unchanged.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// The top softmax probability, or `0.0` for an empty logit set. An
/// absent signal must never be read as confident.
fn peak_confidence(logits: &[f64]) -> f64 {
    softmax(logits)
        .into_iter()
        .fold(0.0_f64, |acc, p| acc.max(p))
}

/// Per-class-budget history the scorer cannot observe on its own: prior
/// success rate, how closely this error resembles ones seen before, test
/// coverage over the touched code, and a rolling complexity estimate used
/// only when the re-banker hasn't supplied a taxonomy difficulty directly.
///
/// All factors default to `1.0`, the neutral value that leaves `overall`
/// driven purely by `base` and `complexity_penalty`. The orchestrator owns
/// updating these across attempts; the scorer itself stays a pure function
/// of whatever is passed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalFactors {
    pub syntax_history_factor: f64,
    pub logic_history_factor: f64,
    pub historical_success_rate: f64,
    pub pattern_similarity: f64,
    pub test_coverage: f64,
    pub historical_complexity: f64,
}

impl Default for HistoricalFactors {
    fn default() -> Self {
        Self {
            syntax_history_factor: 1.0,
            logic_history_factor: 1.0,
            historical_success_rate: 1.0,
            pattern_similarity: 1.0,
            test_coverage: 1.0,
            historical_complexity: 1.0,
        }
    }
}

/// Echo damping applied to the component that isn't the attempt's own
/// error class: a patch addressing a syntax error still has *some* bearing
/// on logic confidence, just muted relative to the direct read.
const ECHO_DAMPING: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// `logits` is the single raw vector for this attempt; `error_class`
    /// decides which of `syntax`/`logic` reads it directly versus as a
    /// damped echo. `risk` is expected in `[0, 1]` and clamped if not.
    ///
    /// `taxonomy_difficulty`, when the re-banker supplied one for this
    /// error, drives `complexity_penalty` directly; otherwise it falls back
    /// to `historical.historical_complexity`. Either way the penalty is
    /// bounded to `[0.1, 1.0]` so a single badly-scored attempt can never
    /// zero out `overall`.
    pub fn score(
        &self,
        logits: &[f64],
        error_class: ErrorClass,
        risk: f64,
        taxonomy_difficulty: Option<f64>,
        historical: &HistoricalFactors,
    ) -> ConfidenceComponents {
        let base = peak_confidence(logits);
        let risk = risk.clamp(0.0, 1.0);

        let is_syntax = matches!(error_class, ErrorClass::Syntax);
        let syntax = if is_syntax {
            base * historical.syntax_history_factor
        } else {
            base * historical.syntax_history_factor * ECHO_DAMPING
        };
        let logic = if is_syntax {
            base * historical.logic_history_factor * ECHO_DAMPING
        } else {
            base * historical.logic_history_factor
        };

        let complexity_penalty = match taxonomy_difficulty {
            Some(difficulty) => 1.0 - difficulty * 0.5,
            None => 1.0 - (historical.historical_complexity - 1.0) * 0.1,
        }
        .clamp(0.1, 1.0);

        let overall = (base
            * historical.historical_success_rate
            * historical.pattern_similarity
            * complexity_penalty
            * (0.5 + historical.test_coverage * 0.5))
            .clamp(0.0, 1.0);

        ConfidenceComponents {
            syntax: syntax.clamp(0.0, 1.0),
            logic: logic.clamp(0.0, 1.0),
            risk,
            overall,
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral() -> HistoricalFactors {
        HistoricalFactors::default()
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn softmax_handles_large_logits_without_overflow() {
        let probs = softmax(&[1000.0, 1001.0, 999.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_logits_yield_zero_confidence() {
        let scorer = ConfidenceScorer::new();
        let components = scorer.score(&[], ErrorClass::Syntax, 0.0, None, &neutral());
        assert_eq!(components.syntax, 0.0);
        assert_eq!(components.logic, 0.0);
        assert_eq!(components.overall, 0.0);
    }

    #[test]
    fn syntax_class_reads_syntax_component_directly_and_damps_logic() {
        let scorer = ConfidenceScorer::new();
        let components = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, None, &neutral());
        assert!(components.syntax > components.logic);
    }

    #[test]
    fn logic_class_reads_logic_component_directly_and_damps_syntax() {
        let scorer = ConfidenceScorer::new();
        let components = scorer.score(&[0.0, 5.0], ErrorClass::Logic, 0.0, None, &neutral());
        assert!(components.logic > components.syntax);
    }

    #[test]
    fn complexity_penalty_never_leaves_its_bounds() {
        let scorer = ConfidenceScorer::new();
        let maxed_out = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, Some(5.0), &neutral());
        let clean = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, Some(0.0), &neutral());
        // complexity_penalty is not exposed directly, but it strictly scales
        // `overall`, so a difficulty of 5.0 (clamped penalty floor 0.1) must
        // score no higher than a difficulty of 0.0 (penalty 1.0).
        assert!(maxed_out.overall <= clean.overall);
        assert!(maxed_out.overall >= 0.0);
    }

    #[test]
    fn higher_taxonomy_difficulty_lowers_overall() {
        let scorer = ConfidenceScorer::new();
        let easy = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, Some(0.2), &neutral());
        let hard = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, Some(0.9), &neutral());
        assert!(hard.overall < easy.overall);
    }

    #[test]
    fn poor_historical_success_rate_lowers_overall() {
        let scorer = ConfidenceScorer::new();
        let mut poor_history = neutral();
        poor_history.historical_success_rate = 0.2;
        let with_history = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, None, &neutral());
        let without_history = scorer.score(&[0.0, 5.0], ErrorClass::Syntax, 0.0, None, &poor_history);
        assert!(without_history.overall < with_history.overall);
    }

    #[test]
    fn overall_confidence_stays_bounded() {
        let scorer = ConfidenceScorer::new();
        let components = scorer.score(&[10.0, -10.0], ErrorClass::Logic, 1.0, Some(1.0), &neutral());
        assert!(components.overall >= 0.0 && components.overall <= 1.0);
    }
}
