//! Event-sourced actors with a stable event type registry, plus a funds
//! transfer saga built on them.

mod actor;
pub use actor::{ActorConfig, ActorHandle, DEFAULT_IDLE_TIMEOUT, spawn_actor};
mod dispatch;
pub use dispatch::{Checkpoint, DispatchTable, Handler};
mod engine;
pub use engine::{ActorCore, Engine, EngineConfig};
mod error;
mod event;
mod memory;
mod registry;
mod snapshot;
mod state;
mod storage;
mod store;
pub mod transfer;

pub use error::{
    ApplyError, CodecError, DispatchError, ExecuteError, PersistenceError, StateError, StoreError,
};
pub use event::{DomainEvent, Event, EventCodec, EventEnvelope, EventMeta, EventRecord};
pub use memory::MemoryStorage;
pub use registry::{EventKind, EventTypeRegistry};
pub use snapshot::SnapshotRecord;
pub use state::ActorState;
pub use storage::{EventStorage, FileStorage, StreamId, StreamLayout};
pub use store::{ActorStore, ActorStoreBuilder};
