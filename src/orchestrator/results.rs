//! Persisted review outcomes.
//!
//! Result records are kept in memory, keyed by request id, until their
//! TTL expires after the terminal transition. Finalization is
//! idempotent: the first terminal record wins and later attempts are
//! dropped, so redelivered tasks never flip a COMPLETED review to
//! FAILED (or vice versa).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::request::{RequestId, ResultRecord, ReviewRequest, ReviewStatus};

struct StoredRecord {
    record: ResultRecord,
    /// Start of the TTL clock; refreshed on the terminal transition.
    stored_at: Instant,
}

/// In-memory result record store with TTL expiry.
pub struct ResultStore {
    ttl: Duration,
    records: Mutex<HashMap<RequestId, StoredRecord>>,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly accepted request as QUEUED.
    pub fn mark_queued(&self, request: &ReviewRequest) {
        let mut records = self.records.lock().unwrap();
        records.insert(
            request.request_id,
            StoredRecord {
                record: placeholder(request, ReviewStatus::Queued),
                stored_at: Instant::now(),
            },
        );
    }

    /// Move a record to STARTED. Terminal records are left untouched
    /// (a redelivered entry may race its own finalization).
    pub fn mark_started(&self, request: &ReviewRequest) {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&request.request_id) {
            Some(stored) if !stored.record.status.is_terminal() => {
                stored.record.status = ReviewStatus::Started;
            }
            Some(_) => {}
            None => {
                records.insert(
                    request.request_id,
                    StoredRecord {
                        record: placeholder(request, ReviewStatus::Started),
                        stored_at: Instant::now(),
                    },
                );
            }
        }
    }

    /// Store the terminal record. Returns `false` (and changes nothing)
    /// when a terminal record already exists.
    pub fn finalize(&self, request_id: RequestId, record: ResultRecord) -> bool {
        debug_assert!(record.status.is_terminal());
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(&request_id) {
            if existing.record.status.is_terminal() {
                tracing::debug!(
                    %request_id,
                    status = %existing.record.status,
                    "duplicate finalization ignored"
                );
                return false;
            }
        }
        records.insert(
            request_id,
            StoredRecord {
                record,
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Fetch a record.
    pub fn get(&self, request_id: RequestId) -> Option<ResultRecord> {
        let records = self.records.lock().unwrap();
        records.get(&request_id).map(|s| s.record.clone())
    }

    /// Drop records whose TTL has expired. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, stored| {
            !stored.record.status.is_terminal() || stored.stored_at.elapsed() < self.ttl
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn placeholder(request: &ReviewRequest, status: ReviewStatus) -> ResultRecord {
    ResultRecord {
        status,
        result: None,
        error: None,
        processing_time_ms: 0,
        completed_at: None,
        failed_at: None,
        provider: request.provider.to_string(),
        repository_id: request.repository_id.clone(),
        change_request_number: request.change_request_number,
        llm_provider: None,
        llm_model: None,
    }
}
