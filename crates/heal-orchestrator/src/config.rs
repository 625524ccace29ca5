//! Runtime configuration: how a `heal` invocation assembles a policy,
//! adapters, and attempt options from CLI flags or a config file.

use std::path::Path;

use heal_coordination::PolicyConfig;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::orchestrator::AttemptOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    Sota,
    MidTier,
    LocalSmall,
}

impl PolicyPreset {
    pub fn resolve(self) -> PolicyConfig {
        match self {
            PolicyPreset::Sota => PolicyConfig::sota(),
            PolicyPreset::MidTier => PolicyConfig::mid_tier(),
            PolicyPreset::LocalSmall => PolicyConfig::local_small(),
        }
    }
}

impl std::str::FromStr for PolicyPreset {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sota" => Ok(PolicyPreset::Sota),
            "mid_tier" | "mid-tier" => Ok(PolicyPreset::MidTier),
            "local_small" | "local-small" => Ok(PolicyPreset::LocalSmall),
            other => Err(OrchestratorError::Config(format!("unknown policy preset `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub policy_overrides: Option<PolicyConfig>,
    pub preset: PolicyPreset,
    pub max_attempts: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub rebanker_program: String,
    #[serde(default)]
    pub rebanker_args: Vec<String>,
    pub workspace_root: String,
}

impl RunConfig {
    pub fn policy(&self) -> PolicyConfig {
        self.policy_overrides.clone().unwrap_or_else(|| self.preset.resolve())
    }

    pub fn attempt_options(&self) -> AttemptOptions {
        AttemptOptions {
            max_attempts: self.max_attempts,
            min_wait_ms: self.min_wait_ms,
            max_wait_ms: self.max_wait_ms,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("invalid config file: {e}")))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            policy_overrides: None,
            preset: PolicyPreset::MidTier,
            max_attempts: 6,
            min_wait_ms: 200,
            max_wait_ms: 10_000,
            rebanker_program: "rebanker".to_string(),
            rebanker_args: Vec::new(),
            workspace_root: ".".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_parses_known_names() {
        assert_eq!("sota".parse::<PolicyPreset>().unwrap(), PolicyPreset::Sota);
        assert_eq!("mid_tier".parse::<PolicyPreset>().unwrap(), PolicyPreset::MidTier);
        assert!("made_up".parse::<PolicyPreset>().is_err());
    }

    #[test]
    fn default_run_config_resolves_mid_tier_policy() {
        let config = RunConfig::default();
        assert_eq!(config.policy(), PolicyConfig::mid_tier());
    }
}
