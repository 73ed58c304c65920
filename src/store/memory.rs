//! In-memory [`KeyValueStore`] backed by a `DashMap`.
//!
//! Each key keeps a bounded list of past revisions so that `get_revision`
//! behaves like the replicated backend's history. Revisions are per key and
//! start at 1.

use std::collections::VecDeque;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tracing::trace;

use super::{Entry, KeyValueStore, StoreError};

/// Revisions retained per key unless configured otherwise.
pub const DEFAULT_MAX_HISTORY: usize = 64;

#[derive(Debug)]
struct History {
    /// Oldest first. `(revision, value)`
    revisions: VecDeque<(u64, Vec<u8>)>,
}

impl History {
    fn latest(&self) -> Option<&(u64, Vec<u8>)> {
        self.revisions.back()
    }

    fn revision(&self) -> u64 {
        self.latest().map_or(0, |(rev, _)| *rev)
    }
}

/// In-memory store with create-if-absent and revision-checked updates.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, History>,
    max_history: usize,
}

impl MemoryStore {
    /// Create an empty store keeping [`DEFAULT_MAX_HISTORY`] revisions per key.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Create an empty store keeping at most `max_history` revisions per key.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_history: max_history.max(1),
        }
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Entry, StoreError> {
        let history = self
            .entries
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let (revision, value) = history
            .latest()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Entry {
            value: value.clone(),
            revision: *revision,
        })
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Err(StoreError::AlreadyExists(key.to_string())),
            MapEntry::Vacant(slot) => {
                slot.insert(History {
                    revisions: VecDeque::from([(1, value)]),
                });
                trace!(key, "created");
                Ok(1)
            }
        }
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64, StoreError> {
        let mut history = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let current = history.revision();
        if current != expected_revision {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_revision,
                current,
            });
        }

        let next = current + 1;
        history.revisions.push_back((next, value));
        while history.revisions.len() > self.max_history {
            history.revisions.pop_front();
        }
        trace!(key, revision = next, "updated");
        Ok(next)
    }

    async fn get_revision(&self, key: &str, revision: u64) -> Result<Vec<u8>, StoreError> {
        let history = self
            .entries
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        history
            .revisions
            .iter()
            .find(|(rev, _)| *rev == revision)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{key}@{revision}")))
    }
}
