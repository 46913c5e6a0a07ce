//! Durable in-process work queue with consumer-group semantics.
//!
//! Models a named append-only stream consumed by one consumer group:
//! entries are `claim`ed by a consumer, move to the group's pending set,
//! and leave the queue only on `ack`. A consumer that dies keeps its
//! entries in the pending set until another consumer `reclaim`s them
//! after `min_idle` — the at-least-once delivery contract. Producers are
//! rejected once the depth reaches the high-water mark.

pub mod status;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Notify;

use crate::models::request::{unix_millis, ReviewRequest};

pub use status::{StatusChannel, StatusEvent};

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue depth {depth} at high-water mark {high_water}; request rejected")]
    Overflow { depth: usize, high_water: usize },
}

/// A delivered queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Monotonic per-stream id.
    pub entry_id: u64,
    pub payload: ReviewRequest,
    /// Unix millis at enqueue time.
    pub enqueued_at: u64,
    /// How many times this entry has been delivered (1 on first claim).
    pub delivery_count: u32,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry_id: u64,
    payload: ReviewRequest,
    enqueued_at: u64,
    delivery_count: u32,
}

impl StoredEntry {
    fn deliver(&self) -> QueueEntry {
        QueueEntry {
            entry_id: self.entry_id,
            payload: self.payload.clone(),
            enqueued_at: self.enqueued_at,
            delivery_count: self.delivery_count,
        }
    }
}

#[derive(Debug)]
struct PendingEntry {
    entry: StoredEntry,
    consumer: String,
    claimed_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    /// Entries not yet claimed by the group, FIFO.
    ready: VecDeque<StoredEntry>,
    /// Claimed but unacknowledged entries, keyed by entry id.
    pending: BTreeMap<u64, PendingEntry>,
}

/// The shared work queue.
#[derive(Debug)]
pub struct WorkQueue {
    high_water_mark: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            high_water_mark: high_water_mark.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Append an entry. Rejected with [`QueueError::Overflow`] when the
    /// unacknowledged depth has reached the high-water mark.
    pub fn enqueue(&self, payload: ReviewRequest) -> Result<u64, QueueError> {
        let mut state = self.state.lock().unwrap();
        let depth = state.ready.len() + state.pending.len();
        if depth >= self.high_water_mark {
            return Err(QueueError::Overflow {
                depth,
                high_water: self.high_water_mark,
            });
        }

        state.next_id += 1;
        let entry_id = state.next_id;
        state.ready.push_back(StoredEntry {
            entry_id,
            payload,
            enqueued_at: unix_millis(),
            delivery_count: 0,
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(entry_id)
    }

    /// Entries not yet acknowledged (ready plus pending).
    pub fn depth(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.len() + state.pending.len()
    }

    /// Deliver up to `count` ready entries to `consumer`, blocking up to
    /// `block_timeout` when the queue is empty.
    pub async fn claim(
        &self,
        consumer: &str,
        count: usize,
        block_timeout: Duration,
    ) -> Vec<QueueEntry> {
        let deadline = Instant::now() + block_timeout;

        loop {
            // Register the waiter before checking emptiness so an
            // enqueue between the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                if !state.ready.is_empty() {
                    let mut delivered = Vec::new();
                    while delivered.len() < count.max(1) {
                        let Some(mut entry) = state.ready.pop_front() else {
                            break;
                        };
                        entry.delivery_count += 1;
                        delivered.push(entry.deliver());
                        state.pending.insert(
                            entry.entry_id,
                            PendingEntry {
                                entry,
                                consumer: consumer.to_string(),
                                claimed_at: Instant::now(),
                            },
                        );
                    }
                    return delivered;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            // Wait for a producer, but never past the deadline.
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    /// Acknowledge delivered entries, removing them from the pending
    /// set. Returns how many were actually pending.
    pub fn ack(&self, entry_ids: &[u64]) -> usize {
        let mut state = self.state.lock().unwrap();
        entry_ids
            .iter()
            .filter(|id| state.pending.remove(id).is_some())
            .count()
    }

    /// Transfer pending entries idle longer than `min_idle` to `consumer`.
    ///
    /// Each transferred entry's delivery count increments, preserving the
    /// at-least-once accounting across consumer crashes.
    pub fn reclaim(&self, consumer: &str, min_idle: Duration) -> Vec<QueueEntry> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut transferred = Vec::new();

        for pending in state.pending.values_mut() {
            if now.duration_since(pending.claimed_at) >= min_idle {
                pending.entry.delivery_count += 1;
                pending.consumer = consumer.to_string();
                pending.claimed_at = now;
                transferred.push(pending.entry.deliver());
            }
        }

        if !transferred.is_empty() {
            tracing::info!(
                consumer,
                count = transferred.len(),
                "reclaimed idle queue entries"
            );
        }
        transferred
    }

    /// Pending (claimed, unacked) entry count. For observability.
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderKind, ReviewMode};

    fn request(n: u64) -> ReviewRequest {
        ReviewRequest::new(ProviderKind::GitHub, "acme/api", n, ReviewMode::Diff)
    }

    #[tokio::test]
    async fn enqueue_claim_ack_lifecycle() {
        let queue = WorkQueue::new(100);
        let id = queue.enqueue(request(1)).unwrap();
        assert_eq!(queue.depth(), 1);

        let claimed = queue.claim("worker-1", 10, Duration::from_millis(10)).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].entry_id, id);
        assert_eq!(claimed[0].delivery_count, 1);
        // Claimed entries still count toward depth until acked.
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.pending_count(), 1);

        assert_eq!(queue.ack(&[id]), 1);
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn entries_are_fifo() {
        let queue = WorkQueue::new(100);
        for n in 1..=3 {
            queue.enqueue(request(n)).unwrap();
        }
        let claimed = queue.claim("w", 10, Duration::from_millis(10)).await;
        let numbers: Vec<u64> = claimed
            .iter()
            .map(|e| e.payload.change_request_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn claim_respects_count() {
        let queue = WorkQueue::new(100);
        for n in 1..=5 {
            queue.enqueue(request(n)).unwrap();
        }
        let first = queue.claim("w", 2, Duration::from_millis(10)).await;
        assert_eq!(first.len(), 2);
        let rest = queue.claim("w", 10, Duration::from_millis(10)).await;
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn claim_blocks_until_timeout_when_empty() {
        let queue = WorkQueue::new(100);
        let start = Instant::now();
        let claimed = queue.claim("w", 1, Duration::from_millis(30)).await;
        assert!(claimed.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn claim_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(WorkQueue::new(100));
        let q = queue.clone();
        let handle =
            tokio::spawn(async move { q.claim("w", 1, Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(request(7)).unwrap();

        let claimed = handle.await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].payload.change_request_number, 7);
    }

    #[tokio::test]
    async fn overflow_rejects_at_high_water() {
        let queue = WorkQueue::new(2);
        queue.enqueue(request(1)).unwrap();
        queue.enqueue(request(2)).unwrap();
        let err = queue.enqueue(request(3)).unwrap_err();
        assert!(matches!(
            err,
            QueueError::Overflow {
                depth: 2,
                high_water: 2
            }
        ));
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn claimed_entries_count_toward_high_water() {
        let queue = WorkQueue::new(2);
        queue.enqueue(request(1)).unwrap();
        queue.enqueue(request(2)).unwrap();
        let _ = queue.claim("w", 10, Duration::from_millis(10)).await;
        // Still at the mark: claimed-but-unacked occupies capacity.
        assert!(queue.enqueue(request(3)).is_err());
        queue.ack(&[1]);
        assert!(queue.enqueue(request(3)).is_ok());
    }

    #[tokio::test]
    async fn reclaim_transfers_idle_entries() {
        let queue = WorkQueue::new(100);
        let id = queue.enqueue(request(1)).unwrap();
        let claimed = queue.claim("crashed", 1, Duration::from_millis(10)).await;
        assert_eq!(claimed[0].delivery_count, 1);

        // Not yet idle long enough.
        assert!(queue.reclaim("rescuer", Duration::from_secs(60)).is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = queue.reclaim("rescuer", Duration::from_millis(15));
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].entry_id, id);
        assert_eq!(reclaimed[0].delivery_count, 2);

        // A reclaim resets the idle clock.
        assert!(queue
            .reclaim("third", Duration::from_millis(15))
            .is_empty());
    }

    #[tokio::test]
    async fn acked_entries_are_not_redelivered() {
        let queue = WorkQueue::new(100);
        let id = queue.enqueue(request(1)).unwrap();
        let _ = queue.claim("w", 1, Duration::from_millis(10)).await;
        queue.ack(&[id]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.reclaim("w2", Duration::ZERO).is_empty());
        assert!(queue
            .claim("w2", 1, Duration::from_millis(5))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn ack_of_unknown_id_is_harmless() {
        let queue = WorkQueue::new(100);
        assert_eq!(queue.ack(&[999]), 0);
    }

    #[tokio::test]
    async fn entry_ids_are_monotonic() {
        let queue = WorkQueue::new(100);
        let a = queue.enqueue(request(1)).unwrap();
        let b = queue.enqueue(request(2)).unwrap();
        assert!(b > a);
    }
}
