//! Optional result cache for diff-mode reviews.
//!
//! Keyed by an xxh3 hash of `(code, language, filename)` so identical
//! chunks reviewed again (redeliveries, force-pushes that didn't touch a
//! file) skip the LLM call. Bounded by entry count and TTL; eviction is
//! oldest-first.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use std::sync::Mutex;
use xxhash_rust::xxh3::xxh3_128;

use crate::response::ParsedReview;

/// Compute the cache key for a reviewed chunk.
pub fn cache_key(code: &str, language: &str, filename: &str) -> String {
    let mut input = String::with_capacity(code.len() + language.len() + filename.len() + 2);
    input.push_str(language);
    input.push('\u{1f}');
    input.push_str(filename);
    input.push('\u{1f}');
    input.push_str(code);
    format!("{:032x}", xxh3_128(input.as_bytes()))
}

struct CachedEntry {
    review: ParsedReview,
    inserted_at: Instant,
}

/// Bounded, TTL'd in-memory review cache.
pub struct ReviewCache {
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<String, CachedEntry>>,
}

impl ReviewCache {
    pub fn new(enabled: bool, max_entries: usize, ttl: Duration) -> Self {
        Self {
            enabled,
            max_entries: max_entries.max(1),
            ttl,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(false, 1, Duration::ZERO)
    }

    /// Fetch a cached review, dropping it if expired.
    pub fn get(&self, key: &str) -> Option<ParsedReview> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.review.clone()),
            Some(_) => {
                entries.shift_remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a review, evicting the oldest entries beyond the bound.
    pub fn put(&self, key: &str, review: &ParsedReview) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            CachedEntry {
                review: review.clone(),
                inserted_at: Instant::now(),
            },
        );
        while entries.len() > self.max_entries {
            entries.shift_remove_index(0);
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
