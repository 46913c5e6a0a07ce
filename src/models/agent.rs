//! Agentic task state: an immutable record updated by pure transition
//! functions.
//!
//! The executing worker is the single writer; every mutation produces a
//! new [`AgentState`] with a strictly increasing `last_updated`. Terminal
//! states latch: transition attempts out of `Completed` or `Failed` are
//! rejected rather than silently applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::finding::ReviewResult;
use super::request::{unix_millis, ReviewRequest};

/// Errors from state-machine transitions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("task is already terminal in state {0}")]
    Terminal(AgentStatus),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },
}

/// Lifecycle status of an agentic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Pending,
    Cloning,
    Analyzing,
    Reasoning,
    Publishing,
    Completed,
    Failed,
}

impl AgentStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }

    /// The next state in the happy path, `None` from `Publishing` onward.
    pub fn next(self) -> Option<AgentStatus> {
        match self {
            AgentStatus::Pending => Some(AgentStatus::Cloning),
            AgentStatus::Cloning => Some(AgentStatus::Analyzing),
            AgentStatus::Analyzing => Some(AgentStatus::Reasoning),
            AgentStatus::Reasoning => Some(AgentStatus::Publishing),
            AgentStatus::Publishing => Some(AgentStatus::Completed),
            AgentStatus::Completed | AgentStatus::Failed => None,
        }
    }

    /// Whether a direct transition `self → to` is allowed.
    pub fn can_transition_to(self, to: AgentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Any non-terminal state may fail; otherwise only the next
        // happy-path state is reachable.
        to == AgentStatus::Failed || self.next() == Some(to)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Pending => "PENDING",
            AgentStatus::Cloning => "CLONING",
            AgentStatus::Analyzing => "ANALYZING",
            AgentStatus::Reasoning => "REASONING",
            AgentStatus::Publishing => "PUBLISHING",
            AgentStatus::Completed => "COMPLETED",
            AgentStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// One failing test, as reported by the sandboxed test run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestFailure {
    /// Test identifier in `pkg.Class#method` or `module::test` form.
    pub id: String,
    /// Failure message, possibly truncated.
    pub message: String,
}

/// Outcome of the ANALYZING phase's test run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestRunSummary {
    /// Whether tests were actually executed (false when detection found
    /// no framework or tests are disabled).
    pub executed: bool,
    pub total_tests: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration_ms: u64,
    /// Per-test failure details.
    pub failures: Vec<TestFailure>,
}

/// The kind of work an action performed, with action-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    CloneRepository {
        #[serde(skip_serializing_if = "Option::is_none")]
        commit_hash: Option<String>,
    },
    RunTests {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<TestRunSummary>,
    },
    InvokeLlmReview {
        issues: usize,
        notes: usize,
    },
    PublishInlineComments {
        posted: usize,
        failed: usize,
        skipped: usize,
    },
    PublishSummary,
    Terminate,
}

/// A recorded action: what ran, when, for how long, and whether it
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub action: Action,
    /// Unix millis at which the action started.
    pub started_at: u64,
    /// Duration once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    /// A freshly started, not-yet-finished action.
    pub fn started(action: Action) -> Self {
        Self {
            action,
            started_at: unix_millis(),
            duration_ms: None,
            success: false,
            error: None,
        }
    }

    /// Mark the action finished.
    pub fn finished(mut self, action: Action, success: bool, error: Option<String>) -> Self {
        self.action = action;
        self.duration_ms = Some(unix_millis().saturating_sub(self.started_at));
        self.success = success;
        self.error = error;
        self
    }
}

/// Immutable agentic task state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub status: AgentStatus,
    pub completed_actions: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<ActionRecord>,
    /// Free-form context written by actions (clone path, commit hash, …).
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_analysis_result: Option<TestRunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_review_result: Option<ReviewResult>,
    /// Unix millis; strictly increases on every mutation.
    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentState {
    /// Initial state for a new task.
    pub fn pending() -> Self {
        Self {
            status: AgentStatus::Pending,
            completed_actions: Vec::new(),
            current_action: None,
            context: BTreeMap::new(),
            local_analysis_result: None,
            llm_review_result: None,
            last_updated: unix_millis(),
            error_message: None,
        }
    }

    /// Monotonic timestamp for the next mutation.
    fn tick(&self) -> u64 {
        unix_millis().max(self.last_updated + 1)
    }

    /// Enter a phase: transition to `to` and record `action` as started.
    pub fn start_phase(&self, to: AgentStatus, action: Action) -> Result<AgentState, StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal(self.status));
        }
        if !self.status.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        next.current_action = Some(ActionRecord::started(action));
        next.last_updated = self.tick();
        Ok(next)
    }

    /// Finish the current phase's action successfully, appending it
    /// (with its final fields) to `completed_actions`.
    pub fn complete_phase(&self, finished: Action) -> Result<AgentState, StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal(self.status));
        }
        let mut next = self.clone();
        let record = next
            .current_action
            .take()
            .unwrap_or_else(|| ActionRecord::started(finished.clone()))
            .finished(finished, true, None);
        next.completed_actions.push(record);
        next.last_updated = self.tick();
        Ok(next)
    }

    /// Terminal success: transition to COMPLETED.
    pub fn finish(&self) -> Result<AgentState, StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal(self.status));
        }
        if !self.status.can_transition_to(AgentStatus::Completed) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: AgentStatus::Completed,
            });
        }
        let mut next = self.clone();
        next.status = AgentStatus::Completed;
        next.last_updated = self.tick();
        Ok(next)
    }

    /// Transition to FAILED with an error message.
    ///
    /// The in-flight action, if any, is recorded as unsuccessful.
    pub fn fail(&self, message: impl Into<String>) -> Result<AgentState, StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal(self.status));
        }
        let message = message.into();
        let mut next = self.clone();
        if let Some(current) = next.current_action.take() {
            let action = current.action.clone();
            next.completed_actions
                .push(current.finished(action, false, Some(message.clone())));
        }
        next.status = AgentStatus::Failed;
        next.error_message = Some(message);
        next.last_updated = self.tick();
        Ok(next)
    }

    /// Store an opaque context value.
    pub fn with_context(&self, key: impl Into<String>, value: serde_json::Value) -> AgentState {
        let mut next = self.clone();
        next.context.insert(key.into(), value);
        next.last_updated = self.tick();
        next
    }

    /// Attach the ANALYZING phase's test outcome.
    pub fn with_analysis(&self, summary: TestRunSummary) -> AgentState {
        let mut next = self.clone();
        next.local_analysis_result = Some(summary);
        next.last_updated = self.tick();
        next
    }

    /// Attach the REASONING phase's review outcome.
    pub fn with_review(&self, result: ReviewResult) -> AgentState {
        let mut next = self.clone();
        next.llm_review_result = Some(result);
        next.last_updated = self.tick();
        next
    }
}

/// A claimed agentic task: the request plus its evolving state.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub task_id: Uuid,
    pub request: ReviewRequest,
    pub state: AgentState,
}

impl AgentTask {
    pub fn new(request: ReviewRequest) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            request,
            state: AgentState::pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut status = AgentStatus::Pending;
        let expected = [
            AgentStatus::Cloning,
            AgentStatus::Analyzing,
            AgentStatus::Reasoning,
            AgentStatus::Publishing,
            AgentStatus::Completed,
        ];
        for next in expected {
            assert!(status.can_transition_to(next), "{status} -> {next}");
            status = next;
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        for status in [
            AgentStatus::Pending,
            AgentStatus::Cloning,
            AgentStatus::Analyzing,
            AgentStatus::Reasoning,
            AgentStatus::Publishing,
        ] {
            assert!(status.can_transition_to(AgentStatus::Failed));
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!AgentStatus::Pending.can_transition_to(AgentStatus::Reasoning));
        assert!(!AgentStatus::Cloning.can_transition_to(AgentStatus::Publishing));
    }

    #[test]
    fn terminal_states_latch() {
        let state = AgentState::pending().fail("boom").unwrap();
        assert_eq!(state.status, AgentStatus::Failed);
        assert_eq!(
            state.start_phase(
                AgentStatus::Cloning,
                Action::CloneRepository { commit_hash: None }
            ),
            Err(StateError::Terminal(AgentStatus::Failed))
        );
        assert_eq!(
            state.fail("again"),
            Err(StateError::Terminal(AgentStatus::Failed))
        );
        assert_eq!(
            state.complete_phase(Action::Terminate),
            Err(StateError::Terminal(AgentStatus::Failed))
        );
        assert_eq!(state.finish(), Err(StateError::Terminal(AgentStatus::Failed)));
    }

    #[test]
    fn phase_lifecycle_appends_completed_action() {
        let state = AgentState::pending()
            .start_phase(
                AgentStatus::Cloning,
                Action::CloneRepository { commit_hash: None },
            )
            .unwrap();
        assert_eq!(state.status, AgentStatus::Cloning);
        assert!(state.current_action.is_some());

        let state = state
            .complete_phase(Action::CloneRepository {
                commit_hash: Some("abc123".into()),
            })
            .unwrap();
        assert!(state.current_action.is_none());
        assert_eq!(state.completed_actions.len(), 1);
        let record = &state.completed_actions[0];
        assert!(record.success);
        assert!(record.duration_ms.is_some());
        match &record.action {
            Action::CloneRepository { commit_hash } => {
                assert_eq!(commit_hash.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn full_happy_path_reaches_completed() {
        let state = AgentState::pending()
            .start_phase(
                AgentStatus::Cloning,
                Action::CloneRepository { commit_hash: None },
            )
            .unwrap()
            .complete_phase(Action::CloneRepository {
                commit_hash: Some("c".into()),
            })
            .unwrap()
            .start_phase(AgentStatus::Analyzing, Action::RunTests { summary: None })
            .unwrap()
            .complete_phase(Action::RunTests { summary: None })
            .unwrap()
            .start_phase(
                AgentStatus::Reasoning,
                Action::InvokeLlmReview { issues: 0, notes: 0 },
            )
            .unwrap()
            .complete_phase(Action::InvokeLlmReview { issues: 2, notes: 1 })
            .unwrap()
            .start_phase(
                AgentStatus::Publishing,
                Action::PublishInlineComments {
                    posted: 0,
                    failed: 0,
                    skipped: 0,
                },
            )
            .unwrap()
            .complete_phase(Action::PublishInlineComments {
                posted: 2,
                failed: 0,
                skipped: 0,
            })
            .unwrap()
            .finish()
            .unwrap();

        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.completed_actions.len(), 4);
        assert!(state.completed_actions.iter().all(|a| a.success));
    }

    #[test]
    fn finish_requires_publishing_phase() {
        let state = AgentState::pending();
        assert_eq!(
            state.finish(),
            Err(StateError::InvalidTransition {
                from: AgentStatus::Pending,
                to: AgentStatus::Completed,
            })
        );
    }

    #[test]
    fn fail_records_unsuccessful_action() {
        let state = AgentState::pending()
            .start_phase(
                AgentStatus::Cloning,
                Action::CloneRepository { commit_hash: None },
            )
            .unwrap()
            .fail("clone timed out")
            .unwrap();

        assert_eq!(state.status, AgentStatus::Failed);
        assert_eq!(state.error_message.as_deref(), Some("clone timed out"));
        assert_eq!(state.completed_actions.len(), 1);
        assert!(!state.completed_actions[0].success);
        assert_eq!(
            state.completed_actions[0].error.as_deref(),
            Some("clone timed out")
        );
    }

    #[test]
    fn last_updated_strictly_increases() {
        let s0 = AgentState::pending();
        let s1 = s0
            .start_phase(
                AgentStatus::Cloning,
                Action::CloneRepository { commit_hash: None },
            )
            .unwrap();
        let s2 = s1.with_context("k", serde_json::json!(1));
        let s3 = s2.fail("x").unwrap();
        assert!(s1.last_updated > s0.last_updated);
        assert!(s2.last_updated > s1.last_updated);
        assert!(s3.last_updated > s2.last_updated);
    }

    #[test]
    fn context_values_accumulate() {
        let state = AgentState::pending()
            .with_context("clone_path", serde_json::json!("/tmp/agent-x/repo"))
            .with_context("commit_hash", serde_json::json!("deadbeef"));
        assert_eq!(state.context.len(), 2);
        assert_eq!(
            state.context["commit_hash"],
            serde_json::json!("deadbeef")
        );
    }

    #[test]
    fn new_task_starts_pending() {
        let req = ReviewRequest::new(
            crate::models::ProviderKind::GitHub,
            "acme/api",
            7,
            crate::models::ReviewMode::Agentic,
        );
        let task = AgentTask::new(req);
        assert_eq!(task.state.status, AgentStatus::Pending);
        assert!(task.state.completed_actions.is_empty());
    }
}
