//! Dual circuit breaker: independent syntax/logic budgets with a grace
//! window, rolling error-density tracking, and a recommendation ladder the
//! orchestrator consults before and after each attempt.
//!
//! A rolling window of recent attempts feeds density/velocity/regression
//! computations directly off the literal `errors_detected`/`lines_of_code`
//! readings each attempt reports, never off a derived success/failure
//! ratio, so a class that is failing less often but failing *worse* each
//! time still shows up as non-improving.

use serde::{Deserialize, Serialize};

use crate::envelope::NormalizedBreakerState;
use crate::error_class::BudgetGroup;
use crate::policy::PolicyConfig;
use crate::ring::RingBuffer;

const WINDOW_SIZE: usize = 10;

/// Fixed cool-down reported while a class is paused. The breaker does not
/// track wall-clock time internally, so this is a flat estimate rather than
/// a countdown derived from when the class actually opened.
const PAUSE_COOLDOWN_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct AttemptEntry {
    success: bool,
    errors_detected: u32,
    #[allow(dead_code)]
    errors_resolved: u32,
    confidence: f64,
    lines_of_code: usize,
}

/// What the breaker suggests the orchestrator do next for a given class.
///
/// `Stop` is deliberately absent here: per the resolved open question on
/// STOP vs ROLLBACK, only the cascade handler's independent `should_stop`
/// signal terminates a chain. The breaker's own ceiling is expressed by
/// `can_attempt` returning `false` once a class opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Continue,
    Promote,
    Rollback,
    TryDifferentStrategy,
}

#[derive(Debug, Clone)]
struct ClassState {
    state: NormalizedBreakerState,
    attempts: u32,
    consecutive_failures: u32,
    consecutive_non_improving: u32,
    total_failures: u32,
    total_resolved_cumulative: u32,
    opened_at: Option<u32>,
    window: RingBuffer<AttemptEntry>,
}

impl ClassState {
    fn new() -> Self {
        Self {
            state: NormalizedBreakerState::Closed,
            attempts: 0,
            consecutive_failures: 0,
            consecutive_non_improving: 0,
            total_failures: 0,
            total_resolved_cumulative: 0,
            opened_at: None,
            window: RingBuffer::new(WINDOW_SIZE),
        }
    }

    /// Average of `errors_detected / max(lines_of_code, 1)` across the
    /// window: the literal per-attempt density formula rolled up.
    fn error_density(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .window
            .iter()
            .map(|e| e.errors_detected as f64 / e.lines_of_code.max(1) as f64)
            .sum();
        sum / self.window.len() as f64
    }

    /// Δerrors_detected / Δattempts across the window: negative when errors
    /// are shrinking attempt over attempt.
    fn improvement_velocity(&self) -> f64 {
        let recent = self.window.recent(WINDOW_SIZE);
        if recent.len() < 2 {
            return 0.0;
        }
        let first = recent.first().unwrap().errors_detected as f64;
        let last = recent.last().unwrap().errors_detected as f64;
        (last - first) / (recent.len() - 1) as f64
    }

    /// Strictly less than the prior entry's error count. Resolved-count
    /// alone never qualifies: a patch can resolve 3 errors while
    /// introducing 5.
    fn is_improving(&self) -> bool {
        let recent = self.window.recent(2);
        recent.len() == 2 && recent[1].errors_detected < recent[0].errors_detected
    }

    /// Least-squares slope of confidence across the window; positive means
    /// confidence is trending up.
    fn confidence_slope(&self) -> f64 {
        let recent = self.window.recent(WINDOW_SIZE);
        let n = recent.len();
        if n < 2 {
            return 0.0;
        }
        let n_f = n as f64;
        let mean_x = (n_f - 1.0) / 2.0;
        let mean_y = recent.iter().map(|e| e.confidence).sum::<f64>() / n_f;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, entry) in recent.iter().enumerate() {
            let x = i as f64 - mean_x;
            num += x * (entry.confidence - mean_y);
            den += x * x;
        }
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }

    fn confidence_improving(&self) -> bool {
        self.confidence_slope() > 0.0
    }

    /// (a) strictly decreasing error counts over ≥2 recent entries, or
    /// (b) confidence trending up AND error count non-increasing. A streak
    /// of `cutoff` consecutive non-improving attempts overrides both.
    fn should_continue_attempts(&self, cutoff: u32) -> bool {
        if self.consecutive_non_improving >= cutoff {
            return false;
        }
        let recent = self.window.recent(WINDOW_SIZE);
        if recent.len() < 2 {
            return true;
        }
        let strictly_decreasing = recent.windows(2).all(|w| w[1].errors_detected < w[0].errors_detected);
        let non_increasing = recent.windows(2).all(|w| w[1].errors_detected <= w[0].errors_detected);
        strictly_decreasing || (self.confidence_improving() && non_increasing)
    }

    /// Confidence bouncing ±0.2 across the last 3 attempts with no
    /// error-count progress between the first and last of them.
    fn oscillating(&self) -> bool {
        let recent = self.window.recent(3);
        if recent.len() < 3 {
            return false;
        }
        let d1 = recent[1].confidence - recent[0].confidence;
        let d2 = recent[2].confidence - recent[1].confidence;
        let bouncing = d1.abs() >= 0.2 && d2.abs() >= 0.2 && d1.signum() != d2.signum();
        let no_progress = recent[2].errors_detected >= recent[0].errors_detected;
        bouncing && no_progress
    }

    fn plateaued_at_max_quality(&self) -> bool {
        let recent = self.window.recent(3);
        recent.len() == 3 && recent.iter().all(|e| e.confidence >= 0.999 && e.errors_detected == 0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerStateSummary {
    pub state: NormalizedBreakerState,
    pub attempts: u32,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub error_density: f64,
    pub improvement_velocity: f64,
    pub is_improving: bool,
    pub confidence_improving: bool,
    pub should_continue_attempts: bool,
    pub recommended_action: Recommendation,
    pub paused: bool,
    pub pause_remaining_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DualCircuitBreaker {
    syntax: ClassState,
    logic: ClassState,
}

impl DualCircuitBreaker {
    pub fn new() -> Self {
        Self {
            syntax: ClassState::new(),
            logic: ClassState::new(),
        }
    }

    fn state_mut(&mut self, group: BudgetGroup) -> &mut ClassState {
        match group {
            BudgetGroup::Syntax => &mut self.syntax,
            BudgetGroup::Logic => &mut self.logic,
        }
    }

    fn state(&self, group: BudgetGroup) -> &ClassState {
        match group {
            BudgetGroup::Syntax => &self.syntax,
            BudgetGroup::Logic => &self.logic,
        }
    }

    /// Whether another attempt may be made for this class: false iff the
    /// class has tripped open, or it has exhausted its attempt ceiling.
    /// The first `policy.grace_attempts` attempts always return true
    /// because the class cannot yet have opened (grace gates
    /// `record_attempt`'s own trip logic below).
    pub fn can_attempt(&self, group: BudgetGroup, policy: &PolicyConfig) -> (bool, String) {
        let s = self.state(group);
        if s.state == NormalizedBreakerState::Open {
            return (
                false,
                format!("{group:?} breaker is open: error budget exceeded without improvement"),
            );
        }
        if s.attempts >= policy.max_attempts(group) {
            return (
                false,
                format!("{group:?} attempt ceiling ({}) reached", policy.max_attempts(group)),
            );
        }
        (true, "within budget and attempt ceiling".to_string())
    }

    /// Record an attempt outcome and update the class's state machine.
    ///
    /// During the first `policy.grace_attempts` attempts for a class, the
    /// breaker gathers data but will not trip open. A single early failure
    /// should not close off a repair chain before it has had a fair shot.
    pub fn record_attempt(
        &mut self,
        group: BudgetGroup,
        success: bool,
        errors_detected: u32,
        errors_resolved: u32,
        confidence: f64,
        lines_of_code: usize,
        policy: &PolicyConfig,
    ) {
        let budget = policy.error_budget(group);
        let grace_attempts = policy.grace_attempts;

        let s = self.state_mut(group);
        let prior_errors = s.window.last().map(|e| e.errors_detected);

        s.attempts += 1;
        s.total_resolved_cumulative += errors_resolved;
        if success {
            s.consecutive_failures = 0;
        } else {
            s.total_failures += 1;
            s.consecutive_failures += 1;
        }

        s.window.push(AttemptEntry {
            success,
            errors_detected,
            errors_resolved,
            confidence,
            lines_of_code,
        });

        let improved_this_attempt = prior_errors.map(|prev| errors_detected < prev).unwrap_or(false);
        if improved_this_attempt {
            s.consecutive_non_improving = 0;
        } else {
            s.consecutive_non_improving += 1;
        }

        if s.attempts <= grace_attempts {
            return;
        }

        let no_improvement_signal = !s.is_improving() && !s.confidence_improving();
        if s.error_density() > budget && no_improvement_signal {
            if s.state != NormalizedBreakerState::Open {
                s.opened_at = Some(s.attempts);
            }
            s.state = NormalizedBreakerState::Open;
        } else if s.state == NormalizedBreakerState::Open && s.is_improving() {
            s.state = NormalizedBreakerState::Closed;
            s.opened_at = None;
        }
    }

    pub fn get_state_summary(&self, group: BudgetGroup, policy: &PolicyConfig) -> BreakerStateSummary {
        let s = self.state(group);
        let should_continue = s.should_continue_attempts(policy.failure_streak_cutoff);
        let paused = s.state == NormalizedBreakerState::Open || !should_continue;
        BreakerStateSummary {
            state: s.state,
            attempts: s.attempts,
            failure_count: s.total_failures,
            consecutive_failures: s.consecutive_failures,
            error_density: s.error_density(),
            improvement_velocity: s.improvement_velocity(),
            is_improving: s.is_improving(),
            confidence_improving: s.confidence_improving(),
            should_continue_attempts: should_continue,
            recommended_action: self.recommend(group, policy),
            paused,
            pause_remaining_ms: if paused { PAUSE_COOLDOWN_MS } else { 0 },
        }
    }

    /// Recommend the orchestrator's next move for this class, reading the
    /// most recently recorded attempt off the rolling window.
    ///
    /// `Rollback` fires once the class has actually tripped open on a
    /// budget breach; a live confidence reading below the class floor
    /// while still closed is a separate, attempt-scoped gate the
    /// orchestrator applies itself, not a breaker recommendation.
    fn recommend(&self, group: BudgetGroup, policy: &PolicyConfig) -> Recommendation {
        let s = self.state(group);

        if s.plateaued_at_max_quality() {
            return match s.window.last() {
                Some(last) if last.success => Recommendation::Promote,
                _ => Recommendation::Continue,
            };
        }

        if s.state == NormalizedBreakerState::Open {
            return Recommendation::Rollback;
        }

        if s.oscillating() {
            return Recommendation::TryDifferentStrategy;
        }

        if let Some(last) = s.window.last() {
            if last.success
                && last.confidence >= policy.conf_floor(group)
                && s.state == NormalizedBreakerState::Closed
            {
                return Recommendation::Promote;
            }
        }

        Recommendation::Continue
    }
}

impl Default for DualCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PolicyConfig {
        PolicyConfig::mid_tier()
    }

    #[test]
    fn grace_window_absorbs_early_failures() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        for _ in 0..p.grace_attempts {
            breaker.record_attempt(BudgetGroup::Syntax, false, 20, 0, 0.1, 100, &p);
        }
        assert!(breaker.can_attempt(BudgetGroup::Syntax, &p).0);
        assert_eq!(
            breaker.get_state_summary(BudgetGroup::Syntax, &p).state,
            NormalizedBreakerState::Closed
        );
    }

    #[test]
    fn budget_breach_without_improvement_trips_open() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        // Past grace, a flat high error density with no improvement signal
        // across attempts must trip the class open.
        for _ in 0..(p.grace_attempts + 4) {
            breaker.record_attempt(BudgetGroup::Syntax, false, 40, 0, 0.2, 100, &p);
        }
        assert!(!breaker.can_attempt(BudgetGroup::Syntax, &p).0);
        assert_eq!(
            breaker.get_state_summary(BudgetGroup::Syntax, &p).state,
            NormalizedBreakerState::Open
        );
    }

    #[test]
    fn attempt_ceiling_independent_of_budget() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        for _ in 0..p.max_syntax_attempts {
            breaker.record_attempt(BudgetGroup::Syntax, true, 0, 5, 0.9, 100, &p);
        }
        assert!(!breaker.can_attempt(BudgetGroup::Syntax, &p).0);
    }

    #[test]
    fn five_consecutive_non_improving_attempts_forces_should_continue_false() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        for _ in 0..5 {
            breaker.record_attempt(BudgetGroup::Logic, false, 10, 0, 0.5, 1000, &p);
        }
        assert!(!breaker.get_state_summary(BudgetGroup::Logic, &p).should_continue_attempts);
    }

    #[test]
    fn scenario_a_convergence_recommends_promote_on_third_attempt() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        let errors = [34u32, 12, 3];
        let confidences = [0.55, 0.70, 0.91];
        for i in 0..3 {
            let success = i == 2;
            breaker.record_attempt(BudgetGroup::Logic, success, errors[i], errors[i], confidences[i], 100, &p);
        }
        let summary = breaker.get_state_summary(BudgetGroup::Logic, &p);
        assert!(summary.is_improving);
        assert_eq!(summary.recommended_action, Recommendation::Promote);
    }

    #[test]
    fn scenario_b_regression_stays_below_confidence_floor_post_grace() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        let errors = [8u32, 12, 15];
        let confidences = [0.60, 0.45, 0.30];
        for i in 0..2 {
            breaker.record_attempt(BudgetGroup::Logic, false, errors[i], 0, confidences[i], 100, &p);
        }
        let summary = breaker.get_state_summary(BudgetGroup::Logic, &p);
        assert!(!summary.is_improving);
        assert!(confidences[1] < p.logic_conf_floor);
        assert_ne!(summary.recommended_action, Recommendation::Promote);
    }

    #[test]
    fn scenario_c_plateau_then_success_recommends_promote() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        let errors = [5u32, 5, 0];
        let confidences = [0.7, 0.8, 0.95];
        for i in 0..3 {
            let success = i == 2;
            breaker.record_attempt(BudgetGroup::Logic, success, errors[i], errors[i], confidences[i], 100, &p);
        }
        let summary = breaker.get_state_summary(BudgetGroup::Logic, &p);
        assert!(summary.is_improving);
        assert_eq!(summary.recommended_action, Recommendation::Promote);
    }

    #[test]
    fn scenario_f_oscillating_confidence_recommends_try_different_strategy() {
        let mut breaker = DualCircuitBreaker::new();
        let p = policy();
        let confidences = [0.6, 0.4, 0.65, 0.35];
        for &c in &confidences {
            breaker.record_attempt(BudgetGroup::Logic, false, 10, 0, c, 50, &p);
        }
        let summary = breaker.get_state_summary(BudgetGroup::Logic, &p);
        assert_eq!(summary.recommended_action, Recommendation::TryDifferentStrategy);
    }
}
