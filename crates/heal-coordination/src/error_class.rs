//! Closed-set error classification shared by the scorer, breaker, and cascade
//! handler.

use serde::{Deserialize, Serialize};

/// Category of error a candidate patch is addressing.
///
/// Each class carries an independent attempt budget and confidence floor,
/// configured via [`crate::policy::PolicyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Syntax,
    Logic,
    Runtime,
    Performance,
    Security,
}

impl ErrorClass {
    /// Whether the circuit breaker tracks a dedicated budget for this class.
    ///
    /// Only syntax/logic get first-class per-class breaker state per the
    /// breaker's `SYNTAX_OPEN | LOGIC_OPEN` states; runtime/performance/
    /// security share the logic budget (they are post-compile failures, the
    /// same gradient logic applies).
    pub fn budget_group(self) -> BudgetGroup {
        match self {
            Self::Syntax => BudgetGroup::Syntax,
            Self::Logic | Self::Runtime | Self::Performance | Self::Security => {
                BudgetGroup::Logic
            }
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Logic => write!(f, "logic"),
            Self::Runtime => write!(f, "runtime"),
            Self::Performance => write!(f, "performance"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// Which breaker budget an [`ErrorClass`] draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetGroup {
    Syntax,
    Logic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_groups_partition_classes() {
        assert_eq!(ErrorClass::Syntax.budget_group(), BudgetGroup::Syntax);
        assert_eq!(ErrorClass::Logic.budget_group(), BudgetGroup::Logic);
        assert_eq!(ErrorClass::Runtime.budget_group(), BudgetGroup::Logic);
        assert_eq!(ErrorClass::Performance.budget_group(), BudgetGroup::Logic);
        assert_eq!(ErrorClass::Security.budget_group(), BudgetGroup::Logic);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ErrorClass::Syntax.to_string(), "syntax");
        assert_eq!(ErrorClass::Security.to_string(), "security");
    }
}
