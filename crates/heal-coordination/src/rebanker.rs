//! Re-banker diagnostic packet: the normalized 5-field output of a
//! language-specific syntax checker / error-output parser, plus optional
//! taxonomy enrichment.
//!
//! The packet is treated as immutable once sealed into an envelope; see
//! [`crate::envelope`] for the hash-seal-and-reverify machinery that
//! enforces that.

use serde::{Deserialize, Serialize};

/// Normalized diagnostic emitted by a re-banker adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebankerDiagnostic {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    pub code: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Sentinel code used when the re-banker's output could not be parsed as
/// JSON. The core must never crash on malformed subprocess output.
pub const UNPARSED_CODE: &str = "UNPARSED";

impl RebankerDiagnostic {
    /// Synthesize a diagnostic from raw, unparseable subprocess output.
    pub fn unparsed(raw_text: &str) -> Self {
        Self {
            file: String::new(),
            line: None,
            column: None,
            message: raw_text.to_string(),
            code: UNPARSED_CODE.to_string(),
            severity: Severity::Error,
            family: None,
            difficulty: None,
            cluster_id: None,
            hint: None,
        }
    }

    /// Whether this diagnostic represents a clean run (no error).
    ///
    /// A re-banker with no output maps to "no diagnostic at all"
    /// (`Option::None`) rather than this variant, which exists for adapters
    /// that always emit a record.
    pub fn is_unparsed(&self) -> bool {
        self.code == UNPARSED_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsed_sentinel_carries_raw_text() {
        let d = RebankerDiagnostic::unparsed("segfault at 0x0");
        assert_eq!(d.code, UNPARSED_CODE);
        assert_eq!(d.message, "segfault at 0x0");
        assert!(d.is_unparsed());
    }

    #[test]
    fn serde_roundtrip_omits_absent_optional_fields() {
        let d = RebankerDiagnostic {
            file: "a.rs".into(),
            line: Some(3),
            column: Some(1),
            message: "x".into(),
            code: "E001".into(),
            severity: Severity::Error,
            family: None,
            difficulty: None,
            cluster_id: None,
            hint: None,
        };
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("family"));
        let back: RebankerDiagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
