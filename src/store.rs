//! Top-level entry point that wires storage, type codes, and per-actor
//! engines into a single [`ActorStore`].
//!
//! The store is opened via [`ActorStoreBuilder`], which runs the start-up
//! self-tests (every event has a handler and a type code), seals the type
//! registry, and then hands out [`ActorHandle`]s, activating (replaying)
//! actors on first use.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use uuid::Uuid;

use crate::actor::{ActorConfig, ActorHandle, spawn_actor};
use crate::dispatch::DispatchTable;
use crate::engine::{Engine, EngineConfig};
use crate::error::StoreError;
use crate::event::DomainEvent;
use crate::registry::EventTypeRegistry;
use crate::state::ActorState;
use crate::storage::EventStorage;

/// Type-erased handle cache keyed by `(TypeId, actor id)`.
///
/// `TypeId` identifies the actor state type at runtime. Downcasting recovers
/// the typed `ActorHandle<S>`.
type HandleCache = HashMap<(TypeId, Uuid), Box<dyn Any + Send + Sync>>;

/// Type-erased `Engine<S>` per registered actor type.
type EngineMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// Per-identity activation gates; an entry exists only while someone is
/// activating (or waiting to activate) that identity.
type ActivationGates = HashMap<(TypeId, Uuid), Arc<AsyncMutex<()>>>;

/// Central registry that manages actor instance lifecycles.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct ActorStore {
    cache: Arc<RwLock<HandleCache>>,
    gates: Arc<Mutex<ActivationGates>>,
    engines: Arc<EngineMap>,
    registry: Arc<EventTypeRegistry>,
    actor_config: ActorConfig,
}

// Manual `Debug` because `dyn Any` is not `Debug`.
impl std::fmt::Debug for ActorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorStore")
            .field("actor_types", &self.engines.len())
            .field("actor_config", &self.actor_config)
            .finish()
    }
}

impl ActorStore {
    /// Start configuring a store over `storage`.
    pub fn builder(storage: Arc<dyn EventStorage>) -> ActorStoreBuilder {
        ActorStoreBuilder::new(storage)
    }

    /// Get a handle to actor `id`, activating it if needed.
    ///
    /// If the actor is cached and alive, returns a clone of its handle.
    /// Otherwise replays it from storage and spawns a new actor loop.
    /// Activations of one identity are serialized so it never gets two live
    /// actors; other identities, cached or not, are not held up.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UnknownActorType`] if `S` was not registered.
    /// * [`StoreError::Activation`] if replay fails.
    pub async fn get<S: ActorState>(&self, id: Uuid) -> Result<ActorHandle<S>, StoreError> {
        let key = (TypeId::of::<S>(), id);

        // Fast path: check cache with read lock.
        if let Some(handle) = self.cached::<S>(&key).await {
            return Ok(handle);
        }

        let engine = self
            .engines
            .get(&TypeId::of::<S>())
            .and_then(|boxed| boxed.downcast_ref::<Engine<S>>())
            .ok_or(StoreError::UnknownActorType(S::ACTOR_TYPE))?;

        let gate = self.gate(key);
        let result = self.activate_gated(engine, id, &gate).await;
        self.release_gate(&key, gate);
        result
    }

    async fn activate_gated<S: ActorState>(
        &self,
        engine: &Engine<S>,
        id: Uuid,
        gate: &AsyncMutex<()>,
    ) -> Result<ActorHandle<S>, StoreError> {
        let key = (TypeId::of::<S>(), id);
        let _activating = gate.lock().await;

        // Another caller may have activated the actor while we waited.
        if let Some(handle) = self.cached::<S>(&key).await {
            return Ok(handle);
        }

        tracing::debug!(
            actor_type = S::ACTOR_TYPE,
            actor_id = %id,
            "activating actor"
        );
        let core = engine.activate(id).await?;
        let handle = spawn_actor(core, self.actor_config.clone());
        self.cache
            .write()
            .await
            .insert(key, Box::new(handle.clone()));
        Ok(handle)
    }

    async fn cached<S: ActorState>(&self, key: &(TypeId, Uuid)) -> Option<ActorHandle<S>> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .and_then(|boxed| boxed.downcast_ref::<ActorHandle<S>>())
            .filter(|handle| handle.is_alive())
            .cloned()
    }

    fn gate(&self, key: (TypeId, Uuid)) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key).or_default())
    }

    // Drop the gate entry once no other caller holds it.
    fn release_gate(&self, key: &(TypeId, Uuid), gate: Arc<AsyncMutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        drop(gate);
        if gates.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(key);
        }
    }

    /// The (sealed) type registry used by this store.
    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.registry
    }
}

/// Factory for creating a type-erased engine once storage and registry are known.
type EngineFactory = Box<
    dyn FnOnce(
        Arc<dyn EventStorage>,
        Arc<EventTypeRegistry>,
        EngineConfig,
    ) -> Result<Box<dyn Any + Send + Sync>, StoreError>,
>;

/// Builder for configuring and opening an [`ActorStore`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use sagafold::{ActorStore, EventTypeRegistry, MemoryStorage, transfer};
///
/// let registry = Arc::new(EventTypeRegistry::new());
/// transfer::register_event_types(&registry);
///
/// let store = ActorStore::builder(Arc::new(MemoryStorage::new()))
///     .registry(registry)
///     .idle_timeout(Duration::from_secs(60))
///     .actor(transfer::dispatch_table())
///     .open()
///     .expect("every transfer event has a handler and a code");
/// # let _ = store;
/// ```
pub struct ActorStoreBuilder {
    storage: Arc<dyn EventStorage>,
    registry: Option<Arc<EventTypeRegistry>>,
    actor_config: ActorConfig,
    engine_config: EngineConfig,
    factories: Vec<(TypeId, EngineFactory)>,
}

impl ActorStoreBuilder {
    /// Create a builder over `storage`.
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self {
            storage,
            registry: None,
            actor_config: ActorConfig::default(),
            engine_config: EngineConfig::default(),
            factories: Vec::new(),
        }
    }

    /// Use `registry` for type codes instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<EventTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the idle timeout for actor eviction.
    ///
    /// Actors that receive no messages for this duration shut down; the
    /// next [`get`](ActorStore::get) transparently re-activates them from
    /// snapshot + tail. Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.actor_config.idle_timeout = timeout;
        self
    }

    /// Set the engine configuration shared by every actor type.
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Register actor type `S` with its handler table.
    ///
    /// A later registration for the same `S` replaces the earlier one.
    pub fn actor<S: ActorState>(mut self, handlers: DispatchTable<S>) -> Self {
        let factory: EngineFactory = Box::new(move |storage, registry, config| {
            handlers.verify()?;
            if let Some(kind) = S::Event::kinds()
                .into_iter()
                .find(|kind| registry.event_code(*kind).is_none())
            {
                return Err(StoreError::UnregisteredEventType {
                    actor_type: S::ACTOR_TYPE,
                    event_type: kind.name(),
                });
            }
            let engine = Engine::new(storage, Arc::new(handlers), registry).with_config(config);
            Ok(Box::new(engine) as Box<dyn Any + Send + Sync>)
        });

        self.factories.retain(|(id, _)| *id != TypeId::of::<S>());
        self.factories.push((TypeId::of::<S>(), factory));
        self
    }

    /// Run the start-up self-tests, seal the registry, and open the store.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Dispatch`] if an actor event has no handler.
    /// * [`StoreError::UnregisteredEventType`] if an actor event has no
    ///   type code.
    pub fn open(self) -> Result<ActorStore, StoreError> {
        let registry = self.registry.unwrap_or_else(EventTypeRegistry::global);

        let mut engines = EngineMap::new();
        for (type_id, factory) in self.factories {
            let engine = factory(
                Arc::clone(&self.storage),
                Arc::clone(&registry),
                self.engine_config.clone(),
            )?;
            engines.insert(type_id, engine);
        }

        registry.seal();
        tracing::info!(
            actor_types = engines.len(),
            event_types = registry.len(),
            "actor store opened"
        );

        Ok(ActorStore {
            cache: Arc::new(RwLock::new(HandleCache::new())),
            gates: Arc::new(Mutex::new(ActivationGates::new())),
            engines: Arc::new(engines),
            registry,
            actor_config: self.actor_config,
        })
    }
}
