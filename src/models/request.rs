//! Review request and result-record types.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::finding::ReviewResult;
use super::{ProviderKind, ReviewMode};

/// Identifier allocated by ingest for every review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Ulid);

impl RequestId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// An accepted review request. Immutable once created by ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub request_id: RequestId,
    pub provider: ProviderKind,
    /// Provider-side repository identifier (`owner/name` or numeric id).
    pub repository_id: String,
    /// Pull/merge request number. Always positive.
    pub change_request_number: u64,
    pub mode: ReviewMode,
    /// Unix millis at creation.
    pub created_at: u64,
}

impl ReviewRequest {
    /// Create a request stamped with the current time and a fresh id.
    pub fn new(
        provider: ProviderKind,
        repository_id: impl Into<String>,
        change_request_number: u64,
        mode: ReviewMode,
    ) -> Self {
        Self {
            request_id: RequestId::new(),
            provider,
            repository_id: repository_id.into(),
            change_request_number,
            mode,
            created_at: unix_millis(),
        }
    }
}

/// Lifecycle status of a review request, as seen by subscribers and the
/// persisted result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl ReviewStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReviewStatus::Completed | ReviewStatus::Failed)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Queued => write!(f, "QUEUED"),
            ReviewStatus::Started => write!(f, "STARTED"),
            ReviewStatus::Completed => write!(f, "COMPLETED"),
            ReviewStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Persisted outcome record, keyed by request id, kept until its TTL
/// expires. Timestamps serialize as RFC 3339 / ISO-8601.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub provider: String,
    pub repository_id: String,
    pub change_request_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

/// Current time as unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_roundtrip() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);

        let s = a.to_string();
        let back: RequestId = s.parse().unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn request_ids_sort_by_creation_time() {
        let a = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RequestId::new();
        assert!(a < b);
    }

    #[test]
    fn new_request_is_stamped() {
        let req = ReviewRequest::new(super::super::ProviderKind::GitHub, "acme/api", 42, ReviewMode::Diff);
        assert_eq!(req.repository_id, "acme/api");
        assert_eq!(req.change_request_number, 42);
        assert!(req.created_at > 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ReviewStatus::Queued.is_terminal());
        assert!(!ReviewStatus::Started.is_terminal());
        assert!(ReviewStatus::Completed.is_terminal());
        assert!(ReviewStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ReviewStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }
}
