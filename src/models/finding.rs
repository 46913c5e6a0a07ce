//! Finding types representing review results.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumIter;

/// Severity level of a finding, matching the LLM finding schema.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, EnumIter,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational suggestion.
    Info,
    /// Minor issue worth noting.
    Minor,
    /// Significant issue that should be addressed.
    Major,
    /// Issue that must be fixed before merging.
    Critical,
}

/// Custom deserializer for Severity that accepts common LLM variations.
///
/// LLMs (and test-failure mappers) return severity values like "error",
/// "warning", "high", "medium", "low", "blocker" instead of the schema
/// enum. This normalizes them instead of failing the whole response.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "info" | "note" | "suggestion" | "trivial" | "style" => Ok(Severity::Info),
            "minor" | "low" | "warn" => Ok(Severity::Minor),
            "major" | "medium" | "moderate" | "warning" => Ok(Severity::Major),
            "critical" | "error" | "high" | "severe" | "blocker" | "fatal" => {
                Ok(Severity::Critical)
            }
            // Fall back to major for unrecognised severities rather than failing
            _ => Ok(Severity::Major),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Minor => write!(f, "minor"),
            Severity::Major => write!(f, "major"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

impl Severity {
    /// Weight used for dedup tie-breaks and ordering.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 10.0,
            Severity::Major => 7.0,
            Severity::Minor => 4.0,
            Severity::Info => 0.1,
        }
    }
}

/// Where a finding came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    /// Produced by the LLM review.
    #[default]
    Llm,
    /// Mapped from a failing test.
    Tests,
    /// Produced by a static-analysis tool.
    Static,
}

impl FindingSource {
    /// Precedence used as the final dedup tie-break: tests > static > llm.
    pub fn precedence(self) -> u8 {
        match self {
            FindingSource::Tests => 2,
            FindingSource::Static => 1,
            FindingSource::Llm => 0,
        }
    }
}

impl fmt::Display for FindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingSource::Llm => write!(f, "llm"),
            FindingSource::Tests => write!(f, "tests"),
            FindingSource::Static => write!(f, "static"),
        }
    }
}

/// Text substituted when a finding carries a blank confidence explanation.
pub const NO_EXPLANATION: &str = "No explanation provided";

/// A single blocking finding (issue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The file path relative to the repo root.
    pub file: String,
    /// The starting line number in the new file (1-based).
    pub start_line: u32,
    /// The severity of the finding.
    pub severity: Severity,
    /// Short title summarizing the issue.
    pub title: String,
    /// Suggested fix or improvement.
    pub suggestion: String,
    /// Model confidence in `[0, 1]`, when the source provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    /// Why the confidence is what it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_explanation: Option<String>,
    /// Optional concrete replacement code. Ignored by the publisher
    /// unless explicitly enabled in config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    /// Where the finding came from.
    #[serde(default)]
    pub source: FindingSource,
}

impl Finding {
    /// Confidence to use in comparisons; unscored findings rank lowest.
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence_score.unwrap_or(0.0)
    }
}

/// A non-blocking advisory note. No severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// The file path relative to the repo root.
    pub file: String,
    /// The line number in the new file (1-based).
    pub line: u32,
    /// The note text.
    #[serde(rename = "note", alias = "text")]
    pub text: String,
}

/// The complete outcome of one review, ready for publication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Overall summary of the change.
    pub summary: String,
    /// Blocking findings.
    pub issues: Vec<Finding>,
    /// Non-blocking notes.
    pub notes: Vec<Note>,
    /// LLM provider that produced the review, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// LLM model that produced the review, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
