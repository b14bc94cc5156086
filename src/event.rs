//! Event finalization.
//!
//! The pipeline never persists records itself. Once a batch succeeds it
//! hands every produced record to an [`EventTracker`] in one call, grouped
//! under [`INDEX_ENTRIES_KEY`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::data::{ApproximateIndexEntry, Event};
use crate::error::{ApproxError, Result};

/// Grouping key for approximate index entries produced by a batch.
pub const INDEX_ENTRIES_KEY: &str = "IndexEntries";

/// Records produced by a job, grouped by kind.
pub type EventResults = BTreeMap<String, Vec<ApproximateIndexEntry>>;

/// External job tracker that persists results and marks events done.
///
/// `finalize` is called once per successful batch; a failed batch never
/// reaches it.
pub trait EventTracker: Send + Sync + Debug {
    fn finalize(&self, event: &Event, results: EventResults) -> Result<()>;
}

/// Tracker keeping finalized results in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventTracker {
    finalized: Mutex<HashMap<Uuid, EventResults>>,
}

impl InMemoryEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results recorded for `event_id`, if it was finalized.
    pub fn results(&self, event_id: Uuid) -> Option<EventResults> {
        self.finalized.lock().get(&event_id).cloned()
    }

    /// Index entries recorded for `event_id` (empty if none).
    pub fn index_entries(&self, event_id: Uuid) -> Vec<ApproximateIndexEntry> {
        self.finalized
            .lock()
            .get(&event_id)
            .and_then(|results| results.get(INDEX_ENTRIES_KEY).cloned())
            .unwrap_or_default()
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.lock().len()
    }
}

impl EventTracker for InMemoryEventTracker {
    fn finalize(&self, event: &Event, results: EventResults) -> Result<()> {
        let mut guard = self.finalized.lock();
        if guard.contains_key(&event.id) {
            return Err(ApproxError::invalid_argument(format!(
                "event {} was already finalized",
                event.id
            )));
        }
        guard.insert(event.id, results);
        Ok(())
    }
}
