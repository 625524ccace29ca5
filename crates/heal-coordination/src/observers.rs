//! Safety observers: a small set of independent checks run over every
//! candidate patch before it is applied, each producing a suspicion level
//! that the orchestrator escalates against `policy.require_human_on_risky`.
//!
//! The risky-edit check runs against the policy-configurable
//! `risky_keywords` table so the same observer works across languages
//! instead of a single hardcoded keyword list.

use serde::{Deserialize, Serialize};

use crate::policy::PolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverKind {
    HangWatchdog,
    RiskyEdit,
    PathResolution,
    Sanitizer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverEvent {
    pub observer: ObserverKind,
    pub suspicion: SuspicionLevel,
    pub detail: String,
}

pub struct ObserverContext<'a> {
    pub candidate_patch: &'a str,
    pub file_paths: &'a [String],
    pub elapsed_ms: u64,
    pub workspace_root: &'a str,
}

/// Tagged-variant observer; each carries only the configuration its check
/// needs rather than the whole policy.
#[derive(Debug, Clone)]
pub enum Observer {
    HangWatchdog { timeout_ms: u64 },
    RiskyEdit { risky_keywords: Vec<String> },
    PathResolution,
    Sanitizer { max_lines_changed: usize },
}

impl Observer {
    pub fn from_policy(policy: &PolicyConfig, hang_timeout_ms: u64) -> Vec<Observer> {
        vec![
            Observer::HangWatchdog {
                timeout_ms: hang_timeout_ms,
            },
            Observer::RiskyEdit {
                risky_keywords: policy.risky_keywords.clone(),
            },
            Observer::PathResolution,
            Observer::Sanitizer {
                max_lines_changed: 200,
            },
        ]
    }

    pub fn evaluate(&self, ctx: &ObserverContext<'_>) -> ObserverEvent {
        match self {
            Observer::HangWatchdog { timeout_ms } => evaluate_hang_watchdog(ctx, *timeout_ms),
            Observer::RiskyEdit { risky_keywords } => evaluate_risky_edit(ctx, risky_keywords),
            Observer::PathResolution => evaluate_path_resolution(ctx),
            Observer::Sanitizer { max_lines_changed } => {
                evaluate_sanitizer(ctx, *max_lines_changed)
            }
        }
    }
}

fn evaluate_hang_watchdog(ctx: &ObserverContext<'_>, timeout_ms: u64) -> ObserverEvent {
    if ctx.elapsed_ms > timeout_ms {
        ObserverEvent {
            observer: ObserverKind::HangWatchdog,
            suspicion: SuspicionLevel::High,
            detail: format!("attempt exceeded {timeout_ms}ms (took {}ms)", ctx.elapsed_ms),
        }
    } else {
        ObserverEvent {
            observer: ObserverKind::HangWatchdog,
            suspicion: SuspicionLevel::None,
            detail: String::new(),
        }
    }
}

fn evaluate_risky_edit(ctx: &ObserverContext<'_>, risky_keywords: &[String]) -> ObserverEvent {
    let lowered = ctx.candidate_patch.to_lowercase();
    let hit = risky_keywords.iter().find(|kw| lowered.contains(&kw.to_lowercase()));
    match hit {
        Some(kw) => ObserverEvent {
            observer: ObserverKind::RiskyEdit,
            suspicion: SuspicionLevel::High,
            detail: format!("candidate patch contains risky construct `{kw}`"),
        },
        None => ObserverEvent {
            observer: ObserverKind::RiskyEdit,
            suspicion: SuspicionLevel::None,
            detail: String::new(),
        },
    }
}

fn evaluate_path_resolution(ctx: &ObserverContext<'_>) -> ObserverEvent {
    let offender = ctx.file_paths.iter().find(|p| {
        p.contains("..") || (std::path::Path::new(p).is_absolute() && !p.starts_with(ctx.workspace_root))
    });
    match offender {
        Some(p) => ObserverEvent {
            observer: ObserverKind::PathResolution,
            suspicion: SuspicionLevel::High,
            detail: format!("path `{p}` resolves outside the workspace root"),
        },
        None => ObserverEvent {
            observer: ObserverKind::PathResolution,
            suspicion: SuspicionLevel::None,
            detail: String::new(),
        },
    }
}

fn evaluate_sanitizer(ctx: &ObserverContext<'_>, max_lines_changed: usize) -> ObserverEvent {
    let lines_changed = ctx.candidate_patch.lines().count();
    if lines_changed > max_lines_changed {
        ObserverEvent {
            observer: ObserverKind::Sanitizer,
            suspicion: SuspicionLevel::Medium,
            detail: format!("patch touches {lines_changed} lines, over the {max_lines_changed} cap"),
        }
    } else {
        ObserverEvent {
            observer: ObserverKind::Sanitizer,
            suspicion: SuspicionLevel::None,
            detail: String::new(),
        }
    }
}

pub fn dispatch_all(observers: &[Observer], ctx: &ObserverContext<'_>) -> Vec<ObserverEvent> {
    observers.iter().map(|o| o.evaluate(ctx)).collect()
}

/// The suspicion ladder: the highest level reported by any observer wins.
pub fn escalate(events: &[ObserverEvent]) -> SuspicionLevel {
    events
        .iter()
        .map(|e| e.suspicion)
        .max()
        .unwrap_or(SuspicionLevel::None)
}
