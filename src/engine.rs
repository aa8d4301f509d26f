//! The event application engine: the single path by which actor state changes.
//!
//! An [`Engine`] is built from explicit collaborators (storage, dispatch
//! table, type registry) and produces [`ActorCore`]s by replaying each
//! actor's snapshot and event tail. `ActorCore::apply_event` then persists
//! and folds new events one at a time.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::dispatch::{Checkpoint, DispatchTable};
use crate::error::{ApplyError, CodecError, PersistenceError};
use crate::event::{DomainEvent, EventCodec, EventEnvelope};
use crate::registry::EventTypeRegistry;
use crate::snapshot::SnapshotRecord;
use crate::state::ActorState;
use crate::storage::{EventStorage, StreamId};

/// Engine tuning.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Also snapshot after this many events since the last snapshot.
    /// `None` (the default) snapshots only when a handler asks for it.
    pub snapshot_interval: Option<u64>,
}

/// Shared, per-actor-type engine.
///
/// `Clone` is cheap; all collaborators are `Arc`-wrapped.
pub struct Engine<S: ActorState> {
    storage: Arc<dyn EventStorage>,
    handlers: Arc<DispatchTable<S>>,
    codec: EventCodec,
    config: EngineConfig,
}

impl<S: ActorState> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            handlers: Arc::clone(&self.handlers),
            codec: self.codec.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ActorState> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("actor_type", &S::ACTOR_TYPE)
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: ActorState> Engine<S> {
    /// Create an engine from its collaborators.
    ///
    /// # Arguments
    ///
    /// * `storage` - Durable log and snapshot store.
    /// * `handlers` - Per-event-type handlers for `S`.
    /// * `registry` - Type codes used to encode stored records.
    pub fn new(
        storage: Arc<dyn EventStorage>,
        handlers: Arc<DispatchTable<S>>,
        registry: Arc<EventTypeRegistry>,
    ) -> Self {
        Self {
            storage,
            handlers,
            codec: EventCodec::new(registry),
            config: EngineConfig::default(),
        }
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The handler table.
    pub fn handlers(&self) -> &DispatchTable<S> {
        &self.handlers
    }

    /// Reconstruct actor `id` from its latest snapshot plus every later event.
    ///
    /// Replay goes through the same dispatch path as live events, minus the
    /// append. Replay writes nothing; if a replayed handler asked for a
    /// checkpoint the snapshot does not cover, the write is left pending for
    /// the actor's next command.
    ///
    /// # Errors
    ///
    /// * [`ApplyError::Persistence`] if storage cannot be read or a record
    ///   cannot be decoded.
    /// * [`ApplyError::Dispatch`] if a stored event has no handler.
    pub async fn activate(&self, id: Uuid) -> Result<ActorCore<S>, ApplyError> {
        let stream = StreamId::new(S::ACTOR_TYPE, id);

        let (mut state, mut version) = match self.storage.load_snapshot(&stream).await? {
            Some(snapshot) => match serde_json::from_value::<S>(snapshot.state) {
                Ok(state) => (state, snapshot.sequence),
                Err(e) => {
                    tracing::warn!(
                        stream = %stream,
                        error = %e,
                        "snapshot does not match actor state; replaying full log"
                    );
                    (S::default(), 0)
                }
            },
            None => (S::default(), 0),
        };
        let from_snapshot = version;

        let tail = self.storage.read_events(&stream, version).await?;
        let mut pending_checkpoint = false;
        for record in &tail {
            let envelope = self.codec.decode::<S::Event>(record)?;
            let meta = envelope.meta(record.sequence);
            let checkpoint = self.handlers.dispatch(&mut state, &envelope.event, &meta)?;
            // A durability point past the snapshot means its write was lost.
            pending_checkpoint |= checkpoint == Checkpoint::Snapshot;
            version = record.sequence;
        }

        tracing::debug!(
            actor_type = S::ACTOR_TYPE,
            actor_id = %id,
            snapshot_sequence = from_snapshot,
            replayed = tail.len(),
            version,
            pending_checkpoint,
            "actor activated"
        );

        Ok(ActorCore {
            id,
            stream,
            state,
            version,
            since_snapshot: tail.len() as u64,
            pending_checkpoint,
            engine: self.clone(),
        })
    }
}

/// One activated actor instance: its identity, state, and log position.
///
/// Not internally synchronized; the caller guarantees at most one in-flight
/// `apply_event` per instance (see [`spawn_actor`](crate::spawn_actor)).
pub struct ActorCore<S: ActorState> {
    id: Uuid,
    stream: StreamId,
    state: S,
    version: u64,
    since_snapshot: u64,
    /// A requested snapshot has not been written yet.
    pending_checkpoint: bool,
    engine: Engine<S>,
}

impl<S: ActorState> fmt::Debug for ActorCore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorCore")
            .field("stream", &self.stream)
            .field("version", &self.version)
            .finish()
    }
}

impl<S: ActorState> ActorCore<S> {
    /// The actor's identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The current materialized state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Sequence of the last applied event (0 for a fresh actor).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether a requested snapshot is still waiting to be written.
    pub fn has_pending_checkpoint(&self) -> bool {
        self.pending_checkpoint
    }

    /// Persist `envelope` and fold it into the state.
    ///
    /// The handler runs against a working copy; the copy replaces the live
    /// state only after the append succeeds, so a failed append leaves the
    /// actor exactly as it was and no event is ever half-applied.
    ///
    /// # Panics
    ///
    /// Panics if `envelope.aggregate_id` is not this actor's id.
    ///
    /// # Errors
    ///
    /// * [`ApplyError::Dispatch`] if the event has no handler; nothing is
    ///   appended.
    /// * [`ApplyError::Persistence`] if encoding or the append fails (state
    ///   unchanged), or if a requested snapshot write fails (the event is
    ///   durable and applied; the snapshot stays pending and is retried by
    ///   the next `apply_event` or `execute`).
    pub async fn apply_event(
        &mut self,
        envelope: EventEnvelope<S::Event>,
    ) -> Result<(), ApplyError> {
        assert_eq!(
            envelope.aggregate_id, self.id,
            "event for actor {} applied to actor {}",
            envelope.aggregate_id, self.id
        );

        let kind = envelope.event.kind();
        self.engine.handlers.resolve(kind)?;

        let sequence = self.version + 1;
        let meta = envelope.meta(sequence);
        let mut next = self.state.clone();
        let checkpoint = self
            .engine
            .handlers
            .dispatch(&mut next, &envelope.event, &meta)?;

        let record = self.engine.codec.encode(&envelope, sequence)?;
        self.engine.storage.append(&self.stream, &record).await?;

        self.state = next;
        self.version = sequence;
        self.since_snapshot += 1;

        tracing::info!(
            actor_type = S::ACTOR_TYPE,
            actor_id = %self.id,
            event_type = kind.name(),
            sequence,
            "event applied"
        );

        let interval_due = self
            .engine
            .config
            .snapshot_interval
            .is_some_and(|n| n > 0 && self.since_snapshot >= n);
        if checkpoint == Checkpoint::Snapshot || interval_due {
            self.pending_checkpoint = true;
        }
        self.flush_pending_checkpoint().await
    }

    async fn flush_pending_checkpoint(&mut self) -> Result<(), ApplyError> {
        if self.pending_checkpoint {
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Decide on `cmd` and apply every resulting event in order.
    ///
    /// Returns the applied envelopes; an empty vector means the command's
    /// precondition did not hold and nothing changed. A pending snapshot is
    /// written even when the command is a no-op, so retrying a command whose
    /// checkpoint failed completes the checkpoint.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ApplyError`]; events before it stay applied.
    pub async fn execute(
        &mut self,
        cmd: S::Command,
    ) -> Result<Vec<EventEnvelope<S::Event>>, ApplyError> {
        let events = self.state.handle(cmd);
        if events.is_empty() {
            tracing::debug!(
                actor_type = S::ACTOR_TYPE,
                actor_id = %self.id,
                "precondition not met; command ignored"
            );
            self.flush_pending_checkpoint().await?;
            return Ok(Vec::new());
        }

        let mut applied = Vec::with_capacity(events.len());
        for event in events {
            let envelope = EventEnvelope::new(self.id, event);
            self.apply_event(envelope.clone()).await?;
            applied.push(envelope);
        }
        Ok(applied)
    }

    /// Write a snapshot of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the state cannot be serialized or the
    /// storage write fails.
    pub async fn checkpoint(&mut self) -> Result<(), PersistenceError> {
        let state = serde_json::to_value(&self.state).map_err(CodecError::from)?;
        let snapshot = SnapshotRecord {
            state,
            sequence: self.version,
        };
        self.engine
            .storage
            .write_snapshot(&self.stream, &snapshot)
            .await?;
        self.since_snapshot = 0;
        self.pending_checkpoint = false;

        tracing::debug!(
            actor_type = S::ACTOR_TYPE,
            actor_id = %self.id,
            sequence = self.version,
            "snapshot written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::memory::MemoryStorage;
    use crate::state::test_fixtures::{
        Added, Counter, CounterCommand, CounterEvent, Noted, counter_registry, counter_table,
        partial_counter_table,
    };

    fn engine(storage: &MemoryStorage) -> Engine<Counter> {
        Engine::new(
            Arc::new(storage.clone()),
            Arc::new(counter_table()),
            counter_registry(),
        )
    }

    #[tokio::test]
    async fn fresh_actor_starts_at_default() {
        let storage = MemoryStorage::new();
        let core = engine(&storage)
            .activate(Uuid::new_v4())
            .await
            .expect("activate should succeed");

        assert_eq!(core.state(), &Counter::default());
        assert_eq!(core.version(), 0);
    }

    #[tokio::test]
    async fn apply_event_appends_then_mutates() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let mut core = engine(&storage).activate(id).await.expect("activate");

        core.apply_event(EventEnvelope::new(id, CounterEvent::Added(Added { amount: 3 })))
            .await
            .expect("apply should succeed");

        assert_eq!(core.state().value, 3);
        assert_eq!(core.version(), 1);
        let records = storage.events(&StreamId::new("counter", id));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].type_code, 1);
    }

    #[tokio::test]
    async fn failed_append_leaves_state_unchanged() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let mut core = engine(&storage).activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(2)).await.expect("first add");

        storage.set_fail_appends(true);
        let err = core
            .execute(CounterCommand::Add(5))
            .await
            .expect_err("append should fail");

        assert!(matches!(err, ApplyError::Persistence(_)), "got: {err:?}");
        assert_eq!(core.state().value, 2);
        assert_eq!(core.version(), 1);
    }

    #[tokio::test]
    async fn missing_handler_appends_nothing() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = Engine::new(
            Arc::new(storage.clone()) as Arc<dyn EventStorage>,
            Arc::new(partial_counter_table()),
            counter_registry(),
        );
        let mut core = engine.activate(id).await.expect("activate");

        let err = core
            .apply_event(EventEnvelope::new(
                id,
                CounterEvent::Noted(Noted { text: "hi".into() }),
            ))
            .await
            .expect_err("Noted has no handler");

        assert!(
            matches!(
                err,
                ApplyError::Dispatch(DispatchError {
                    event_type: "Noted",
                    ..
                })
            ),
            "got: {err:?}"
        );
        assert!(storage.events(&StreamId::new("counter", id)).is_empty());
        assert_eq!(core.version(), 0);
    }

    #[tokio::test]
    async fn precondition_miss_is_silent_noop() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let mut core = engine(&storage).activate(id).await.expect("activate");

        let applied = core.execute(CounterCommand::Reset).await.expect("no-op");

        assert!(applied.is_empty());
        assert_eq!(core.version(), 0);
        assert!(storage.events(&StreamId::new("counter", id)).is_empty());
    }

    #[tokio::test]
    async fn replay_without_snapshot_reproduces_state() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = engine(&storage);

        let mut core = engine.activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(4)).await.expect("add");
        core.execute(CounterCommand::Note("a".into())).await.expect("note");
        core.execute(CounterCommand::Add(6)).await.expect("add");
        let expected = core.state().clone();
        drop(core);

        let replayed = engine.activate(id).await.expect("re-activate");
        assert_eq!(replayed.state(), &expected);
        assert_eq!(replayed.version(), 3);
        assert_eq!(storage.snapshot_writes(), 0);
    }

    #[tokio::test]
    async fn handler_checkpoint_writes_snapshot_and_replay_uses_it() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = engine(&storage);

        let mut core = engine.activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(4)).await.expect("add");
        core.execute(CounterCommand::Reset).await.expect("reset");
        assert_eq!(storage.snapshot_writes(), 1);

        core.execute(CounterCommand::Add(9)).await.expect("add");
        drop(core);

        let snapshot = storage
            .load_snapshot(&StreamId::new("counter", id))
            .await
            .expect("load")
            .expect("snapshot written on reset");
        assert_eq!(snapshot.sequence, 2);

        let replayed = engine.activate(id).await.expect("re-activate");
        assert_eq!(replayed.state().value, 9);
        assert_eq!(replayed.version(), 3);
    }

    #[tokio::test]
    async fn snapshot_interval_triggers_checkpoints() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = engine(&storage).with_config(EngineConfig {
            snapshot_interval: Some(2),
        });

        let mut core = engine.activate(id).await.expect("activate");
        for _ in 0..5 {
            core.execute(CounterCommand::Add(1)).await.expect("add");
        }

        assert_eq!(storage.snapshot_writes(), 2);
    }

    #[tokio::test]
    async fn failed_snapshot_surfaces_but_event_stays_applied() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let mut core = engine(&storage).activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(1)).await.expect("add");

        storage.set_fail_snapshots(true);
        let err = core
            .execute(CounterCommand::Reset)
            .await
            .expect_err("snapshot write should fail");

        assert!(matches!(err, ApplyError::Persistence(_)), "got: {err:?}");
        assert_eq!(core.state().value, 0);
        assert_eq!(core.version(), 2);
    }

    #[tokio::test]
    async fn failed_snapshot_is_retried_by_next_command() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let mut core = engine(&storage).activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(1)).await.expect("add");

        storage.set_fail_snapshots(true);
        core.execute(CounterCommand::Reset)
            .await
            .expect_err("snapshot write should fail");
        assert!(core.has_pending_checkpoint());

        // Redelivered reset is a no-op for state but still flushes the snapshot.
        storage.set_fail_snapshots(false);
        let applied = core.execute(CounterCommand::Reset).await.expect("retry");

        assert!(applied.is_empty());
        assert!(!core.has_pending_checkpoint());
        assert_eq!(storage.snapshot_writes(), 1);
        let snapshot = storage
            .load_snapshot(&StreamId::new("counter", id))
            .await
            .expect("load")
            .expect("snapshot written on retry");
        assert_eq!(snapshot.sequence, 2);
    }

    #[tokio::test]
    async fn lost_checkpoint_is_pending_after_reactivation() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = engine(&storage);

        let mut core = engine.activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(3)).await.expect("add");
        storage.set_fail_snapshots(true);
        core.execute(CounterCommand::Reset)
            .await
            .expect_err("snapshot write should fail");
        drop(core);

        storage.set_fail_snapshots(false);
        let mut core = engine.activate(id).await.expect("re-activate");
        assert!(core.has_pending_checkpoint());
        assert_eq!(storage.snapshot_writes(), 0);

        core.execute(CounterCommand::Add(0)).await.expect("no-op");
        assert!(!core.has_pending_checkpoint());
        assert_eq!(storage.snapshot_writes(), 1);
    }

    #[tokio::test]
    async fn replay_after_written_checkpoint_has_nothing_pending() {
        let storage = MemoryStorage::new();
        let id = Uuid::new_v4();
        let engine = engine(&storage);

        let mut core = engine.activate(id).await.expect("activate");
        core.execute(CounterCommand::Add(3)).await.expect("add");
        core.execute(CounterCommand::Reset).await.expect("reset");
        drop(core);

        let core = engine.activate(id).await.expect("re-activate");
        assert!(!core.has_pending_checkpoint());
    }

    #[tokio::test]
    #[should_panic(expected = "applied to actor")]
    async fn foreign_event_is_programmer_error() {
        let storage = MemoryStorage::new();
        let mut core = engine(&storage)
            .activate(Uuid::new_v4())
            .await
            .expect("activate");

        let _ = core
            .apply_event(EventEnvelope::new(
                Uuid::new_v4(),
                CounterEvent::Added(Added { amount: 1 }),
            ))
            .await;
    }
}
