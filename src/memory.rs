//! In-process [`EventStorage`] backend.
//!
//! Keeps every stream and snapshot in memory. Used by tests and demos; it
//! can also be told to fail appends or snapshot writes so callers can check
//! their failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PersistenceError;
use crate::event::EventRecord;
use crate::snapshot::SnapshotRecord;
use crate::storage::{EventStorage, StreamId};

#[derive(Debug, Default)]
struct Streams {
    events: HashMap<StreamId, Vec<EventRecord>>,
    snapshots: HashMap<StreamId, SnapshotRecord>,
    snapshot_writes: usize,
}

/// Memory-backed event log and snapshot store.
///
/// `Clone` is cheap and clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    streams: Arc<Mutex<Streams>>,
    fail_appends: Arc<AtomicBool>,
    fail_snapshots: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail (`true`) or succeed (`false`).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent snapshot writes fail (`true`) or succeed (`false`).
    pub fn set_fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Every record appended to `stream`, in order.
    pub fn events(&self, stream: &StreamId) -> Vec<EventRecord> {
        self.lock().events.get(stream).cloned().unwrap_or_default()
    }

    /// Total number of successful snapshot writes across all streams.
    pub fn snapshot_writes(&self) -> usize {
        self.lock().snapshot_writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Streams> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl EventStorage for MemoryStorage {
    async fn append(
        &self,
        stream: &StreamId,
        record: &EventRecord,
    ) -> Result<(), PersistenceError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend(format!(
                "append to {stream} rejected"
            )));
        }
        self.lock()
            .events
            .entry(*stream)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn read_events(
        &self,
        stream: &StreamId,
        after: u64,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        Ok(self
            .lock()
            .events
            .get(stream)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.sequence > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_snapshot(
        &self,
        stream: &StreamId,
    ) -> Result<Option<SnapshotRecord>, PersistenceError> {
        Ok(self.lock().snapshots.get(stream).cloned())
    }

    async fn write_snapshot(
        &self,
        stream: &StreamId,
        snapshot: &SnapshotRecord,
    ) -> Result<(), PersistenceError> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend(format!(
                "snapshot write for {stream} rejected"
            )));
        }
        let mut streams = self.lock();
        streams.snapshots.insert(*stream, snapshot.clone());
        streams.snapshot_writes += 1;
        Ok(())
    }
}
