//! Shared types used across all modules.
//!
//! This module defines the core data structures for review requests,
//! diffs, findings, and agent task state. Other modules import from
//! here rather than reaching into each other's internals.

pub mod agent;
pub mod diff;
pub mod finding;
pub mod request;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use diff::{DiffDocument, FileModification};
pub use finding::{Finding, FindingSource, Note, ReviewResult, Severity};
pub use request::{RequestId, ReviewRequest, ReviewStatus};

/// Hosted source-control providers the daemon can publish to.
///
/// `GitHub` addresses inline comments by diff position (a 1-based line
/// index into the file's unified-diff text); `GitLab` addresses them by
/// new-file line number plus the merge request's diff SHAs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    GitHub,
    GitLab,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GitHub => write!(f, "github"),
            ProviderKind::GitLab => write!(f, "gitlab"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            other => Err(format!(
                "unsupported provider: '{other}'. Supported: github, gitlab"
            )),
        }
    }
}

/// Execution mode for a review request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    /// Lightweight: review the unified diff only.
    #[default]
    Diff,
    /// Full-repository: clone, run tests in a sandbox, then review.
    Agentic,
}

impl fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewMode::Diff => write!(f, "diff"),
            ReviewMode::Agentic => write!(f, "agentic"),
        }
    }
}

impl std::str::FromStr for ReviewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "diff" => Ok(ReviewMode::Diff),
            "agentic" => Ok(ReviewMode::Agentic),
            other => Err(format!(
                "unsupported mode: '{other}'. Supported: diff, agentic"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_display_and_parse() {
        assert_eq!(ProviderKind::GitHub.to_string(), "github");
        assert_eq!(ProviderKind::GitLab.to_string(), "gitlab");
        assert_eq!("github".parse::<ProviderKind>(), Ok(ProviderKind::GitHub));
        assert_eq!("GitLab".parse::<ProviderKind>(), Ok(ProviderKind::GitLab));
        assert!("bitbucket".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn review_mode_display_and_parse() {
        assert_eq!(ReviewMode::Diff.to_string(), "diff");
        assert_eq!(ReviewMode::Agentic.to_string(), "agentic");
        assert_eq!("diff".parse::<ReviewMode>(), Ok(ReviewMode::Diff));
        assert_eq!("AGENTIC".parse::<ReviewMode>(), Ok(ReviewMode::Agentic));
        assert!("hybrid".parse::<ReviewMode>().is_err());
    }

    #[test]
    fn provider_kind_serde_roundtrip() {
        let json = serde_json::to_string(&ProviderKind::GitLab).unwrap();
        assert_eq!(json, "\"gitlab\"");
        let back: ProviderKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProviderKind::GitLab);
    }
}
