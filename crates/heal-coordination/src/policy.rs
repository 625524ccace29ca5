//! Policy configuration: the knobs recognized by the breaker, scorer,
//! orchestrator, and observers, plus the three named presets.
//!
//! A [`PolicyConfig`] is frozen into each [`crate::envelope::PatchEnvelope`]
//! at `wrap_patch` time as `policy_snapshot` so later policy changes never
//! retroactively alter historical envelopes.

use serde::{Deserialize, Serialize};

/// Recognized, all-optional-with-defaults policy keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub syntax_conf_floor: f64,
    pub logic_conf_floor: f64,
    pub max_syntax_attempts: u32,
    pub max_logic_attempts: u32,
    pub syntax_error_budget: f64,
    pub logic_error_budget: f64,
    pub rate_limit_per_min: u32,
    pub sandbox_isolation: SandboxIsolation,
    pub require_human_on_risky: bool,
    pub risky_keywords: Vec<String>,
    pub grace_attempts: u32,
    pub failure_streak_cutoff: u32,
    pub cascade_max_depth: usize,
    /// Feature-flagged final-polish (lint/format) observer; off by default
    /// per SPEC_FULL.md's resolution of the "final polish" open question.
    pub enable_final_polish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxIsolation {
    Full,
    Partial,
    None,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::mid_tier()
    }
}

const DEFAULT_RISKY_KEYWORDS: &[&str] = &[
    "drop table",
    "rm -rf",
    "eval(",
    "exec(",
    "os.system",
    "subprocess.call",
    "child_process",
    "unsafe {",
    "DELETE FROM",
    "sudo ",
];

impl PolicyConfig {
    fn base(
        syntax_conf_floor: f64,
        logic_conf_floor: f64,
        max_syntax_attempts: u32,
        max_logic_attempts: u32,
        syntax_error_budget: f64,
        logic_error_budget: f64,
    ) -> Self {
        Self {
            syntax_conf_floor,
            logic_conf_floor,
            max_syntax_attempts,
            max_logic_attempts,
            syntax_error_budget,
            logic_error_budget,
            rate_limit_per_min: 30,
            sandbox_isolation: SandboxIsolation::Full,
            require_human_on_risky: true,
            risky_keywords: DEFAULT_RISKY_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            grace_attempts: 2,
            failure_streak_cutoff: 5,
            cascade_max_depth: 10,
            enable_final_polish: false,
        }
    }

    /// Tight floors, few attempts: for high-capability models where a
    /// non-convergent chain should fail fast.
    pub fn sota() -> Self {
        Self::base(0.75, 0.75, 3, 4, 0.08, 0.15)
    }

    /// Balanced default.
    pub fn mid_tier() -> Self {
        Self::base(0.6, 0.55, 5, 6, 0.10, 0.20)
    }

    /// Loose floors, more attempts: for smaller local models that need more
    /// runway to converge.
    pub fn local_small() -> Self {
        Self::base(0.45, 0.4, 8, 10, 0.18, 0.30)
    }

    pub fn error_budget(&self, group: crate::error_class::BudgetGroup) -> f64 {
        match group {
            crate::error_class::BudgetGroup::Syntax => self.syntax_error_budget,
            crate::error_class::BudgetGroup::Logic => self.logic_error_budget,
        }
    }

    pub fn max_attempts(&self, group: crate::error_class::BudgetGroup) -> u32 {
        match group {
            crate::error_class::BudgetGroup::Syntax => self.max_syntax_attempts,
            crate::error_class::BudgetGroup::Logic => self.max_logic_attempts,
        }
    }

    pub fn conf_floor(&self, group: crate::error_class::BudgetGroup) -> f64 {
        match group {
            crate::error_class::BudgetGroup::Syntax => self.syntax_conf_floor,
            crate::error_class::BudgetGroup::Logic => self.logic_conf_floor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_equals_mid_tier() {
        assert_eq!(PolicyConfig::default(), PolicyConfig::mid_tier());
    }

    #[test]
    fn sota_is_stricter_than_local_small() {
        let sota = PolicyConfig::sota();
        let local = PolicyConfig::local_small();
        assert!(sota.syntax_conf_floor > local.syntax_conf_floor);
        assert!(sota.max_syntax_attempts < local.max_syntax_attempts);
        assert!(sota.syntax_error_budget < local.syntax_error_budget);
    }

    #[test]
    fn presets_have_nonempty_risky_keywords() {
        assert!(!PolicyConfig::mid_tier().risky_keywords.is_empty());
    }
}
