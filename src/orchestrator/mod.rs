//! Review ingest and progress subscription.
//!
//! The single entry point for new work: validate the tuple, allocate a
//! request id, enqueue, and expose the status channel per request.
//! Admission is governed by the queue's high-water mark — an overflow
//! rejects the request before any record or status event exists.

pub mod results;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::request::ResultRecord;
use crate::models::{ProviderKind, RequestId, ReviewMode, ReviewRequest};
use crate::queue::{QueueError, StatusChannel, StatusEvent, WorkQueue};

pub use results::ResultStore;

/// Errors from review ingest.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    QueueOverflow(#[from] QueueError),

    #[error("invalid review request: {0}")]
    InvalidRequest(String),
}

/// Accepts review requests and exposes progress.
pub struct ReviewService {
    diff_queue: Arc<WorkQueue>,
    agentic_queue: Arc<WorkQueue>,
    status: Arc<StatusChannel>,
    results: Arc<ResultStore>,
}

impl ReviewService {
    pub fn new(
        diff_queue: Arc<WorkQueue>,
        agentic_queue: Arc<WorkQueue>,
        status: Arc<StatusChannel>,
        results: Arc<ResultStore>,
    ) -> Self {
        Self {
            diff_queue,
            agentic_queue,
            status,
            results,
        }
    }

    fn queue_for(&self, mode: ReviewMode) -> &Arc<WorkQueue> {
        match mode {
            ReviewMode::Diff => &self.diff_queue,
            ReviewMode::Agentic => &self.agentic_queue,
        }
    }

    /// Accept a review request and enqueue it.
    ///
    /// On success the request is QUEUED (record + status event). On
    /// overflow nothing is recorded and no event is emitted.
    pub fn create_review(
        &self,
        provider: ProviderKind,
        repository_id: &str,
        change_request_number: u64,
        mode: ReviewMode,
    ) -> Result<RequestId, IngestError> {
        if repository_id.trim().is_empty() {
            return Err(IngestError::InvalidRequest(
                "repository id must not be empty".to_string(),
            ));
        }
        if change_request_number == 0 {
            return Err(IngestError::InvalidRequest(
                "change request number must be positive".to_string(),
            ));
        }

        let request = ReviewRequest::new(provider, repository_id, change_request_number, mode);
        let request_id = request.request_id;

        self.queue_for(mode).enqueue(request.clone())?;
        self.results.mark_queued(&request);
        self.status.emit(request_id, StatusEvent::Queued);

        tracing::info!(
            %request_id,
            %provider,
            repo = repository_id,
            number = change_request_number,
            %mode,
            "review request accepted"
        );
        Ok(request_id)
    }

    /// Subscribe to a request's progress events.
    pub fn subscribe(&self, request_id: RequestId) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe(request_id)
    }

    /// Fetch the persisted result record.
    pub fn result(&self, request_id: RequestId) -> Option<ResultRecord> {
        self.results.get(request_id)
    }

    /// Current depth of a mode's queue.
    pub fn queue_depth(&self, mode: ReviewMode) -> usize {
        self.queue_for(mode).depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewStatus;
    use std::time::Duration;

    fn service(high_water: usize) -> ReviewService {
        ReviewService::new(
            Arc::new(WorkQueue::new(high_water)),
            Arc::new(WorkQueue::new(high_water)),
            Arc::new(StatusChannel::default()),
            Arc::new(ResultStore::new(Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn create_review_enqueues_and_emits_queued() {
        let service = service(10);
        let id = service
            .create_review(ProviderKind::GitHub, "acme/api", 7, ReviewMode::Diff)
            .unwrap();

        assert_eq!(service.queue_depth(ReviewMode::Diff), 1);
        assert_eq!(service.queue_depth(ReviewMode::Agentic), 0);
        assert_eq!(service.result(id).unwrap().status, ReviewStatus::Queued);
    }

    #[tokio::test]
    async fn modes_route_to_their_queues() {
        let service = service(10);
        service
            .create_review(ProviderKind::GitLab, "grp/api", 1, ReviewMode::Agentic)
            .unwrap();
        assert_eq!(service.queue_depth(ReviewMode::Diff), 0);
        assert_eq!(service.queue_depth(ReviewMode::Agentic), 1);
    }

    #[tokio::test]
    async fn overflow_rejects_without_record_or_event() {
        let service = service(1);
        service
            .create_review(ProviderKind::GitHub, "acme/api", 1, ReviewMode::Diff)
            .unwrap();

        let err = service
            .create_review(ProviderKind::GitHub, "acme/api", 2, ReviewMode::Diff)
            .unwrap_err();
        assert!(matches!(err, IngestError::QueueOverflow(_)));

        // No entry, no record, no status channel for the rejected id.
        assert_eq!(service.queue_depth(ReviewMode::Diff), 1);
        assert_eq!(service.status.live_channels(), 0);
        assert_eq!(service.results.len(), 1);
    }

    #[tokio::test]
    async fn invalid_tuples_are_rejected() {
        let service = service(10);
        assert!(matches!(
            service.create_review(ProviderKind::GitHub, " ", 1, ReviewMode::Diff),
            Err(IngestError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.create_review(ProviderKind::GitHub, "acme/api", 0, ReviewMode::Diff),
            Err(IngestError::InvalidRequest(_))
        ));
        assert_eq!(service.queue_depth(ReviewMode::Diff), 0);
    }

    #[tokio::test]
    async fn subscribers_see_lifecycle_events() {
        let service = service(10);
        let id = service
            .create_review(ProviderKind::GitHub, "acme/api", 3, ReviewMode::Diff)
            .unwrap();
        let mut rx = service.subscribe(id);
        service.status.emit(id, StatusEvent::Started);
        assert_eq!(rx.recv().await.unwrap(), StatusEvent::Started);
    }
}
