//! In-process job journal.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::application::queue::JobKind;
use crate::application::queue::journal::{JobJournal, JournalError, JournalResult};

/// Journal that survives queue instances but not the process.
#[derive(Default)]
pub struct MemoryJobJournal {
    sets: Mutex<HashMap<JobKind, BTreeSet<String>>>,
}

impl MemoryJobJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending payloads for `kind`.
    pub fn len(&self, kind: JobKind) -> usize {
        self.sets
            .lock()
            .map(|sets| sets.get(&kind).map_or(0, BTreeSet::len))
            .unwrap_or(0)
    }

    fn with_sets<T>(
        &self,
        f: impl FnOnce(&mut HashMap<JobKind, BTreeSet<String>>) -> T,
    ) -> JournalResult<T> {
        self.sets
            .lock()
            .map(|mut sets| f(&mut sets))
            .map_err(|_| JournalError::Operation("journal lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobJournal for MemoryJobJournal {
    async fn record(&self, kind: JobKind, payload: &str) -> JournalResult<()> {
        self.with_sets(|sets| {
            sets.entry(kind).or_default().insert(payload.to_string());
        })
    }

    async fn complete(&self, kind: JobKind, payload: &str) -> JournalResult<()> {
        self.with_sets(|sets| {
            if let Some(set) = sets.get_mut(&kind) {
                set.remove(payload);
            }
        })
    }

    async fn pending(&self, kind: JobKind) -> JournalResult<Vec<String>> {
        self.with_sets(|sets| {
            sets.get(&kind)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        })
    }
}
