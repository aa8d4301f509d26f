//! Explicit per-event-type handler tables.
//!
//! A [`DispatchTable`] maps each concrete event type (by exact `TypeId`, no
//! hierarchy) to the function that folds it into an actor's state. Tables
//! are built once, verified against the actor's full event set, and handed
//! to the [`Engine`](crate::Engine) as a constructor parameter.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::error::DispatchError;
use crate::event::{DomainEvent, Event, EventMeta};
use crate::registry::EventKind;
use crate::state::ActorState;

/// What a handler asks the engine to do after the event is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Checkpoint {
    /// Nothing beyond the append.
    None,
    /// The new state is a durability point; write a snapshot.
    Snapshot,
}

/// Signature of a typed event handler.
pub type Handler<S, E> = fn(&mut S, &E, &EventMeta) -> Checkpoint;

/// Type-erased handler; returns `None` when the payload is not the type the
/// handler was registered for.
type ErasedHandler<S> =
    Box<dyn Fn(&mut S, &dyn Any, &EventMeta) -> Option<Checkpoint> + Send + Sync>;

/// Handler table for actor state `S`.
pub struct DispatchTable<S: ActorState> {
    handlers: HashMap<TypeId, (EventKind, ErasedHandler<S>)>,
}

impl<S: ActorState> DispatchTable<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for event type `E`.
    ///
    /// # Panics
    ///
    /// Panics if `E` already has a handler; two handlers for one type is a
    /// wiring bug.
    pub fn on<E: Event>(mut self, handler: Handler<S, E>) -> Self {
        let kind = EventKind::of::<E>();
        assert!(
            !self.handlers.contains_key(&kind.type_id()),
            "duplicate handler for event type `{}` on actor `{}`",
            kind.name(),
            S::ACTOR_TYPE,
        );

        let erased: ErasedHandler<S> = Box::new(move |state, payload, meta| {
            payload
                .downcast_ref::<E>()
                .map(|event| handler(state, event, meta))
        });
        self.handlers.insert(kind.type_id(), (kind, erased));
        self
    }

    /// Whether a handler exists for `kind`.
    pub fn contains(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind.type_id())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Fail unless `kind` has a handler.
    pub fn resolve(&self, kind: EventKind) -> Result<(), DispatchError> {
        if self.contains(kind) {
            Ok(())
        } else {
            Err(self.missing(kind))
        }
    }

    /// Self-test: every event in `S::Event` must have a handler.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] naming the first event type without one.
    pub fn verify(&self) -> Result<(), DispatchError> {
        S::Event::kinds()
            .into_iter()
            .try_for_each(|kind| self.resolve(kind))
    }

    /// Route `event` to its handler, mutating `state` in place.
    pub fn dispatch(
        &self,
        state: &mut S,
        event: &S::Event,
        meta: &EventMeta,
    ) -> Result<Checkpoint, DispatchError> {
        let kind = event.kind();
        let (_, handler) = self
            .handlers
            .get(&kind.type_id())
            .ok_or_else(|| self.missing(kind))?;
        handler(state, event.payload(), meta).ok_or_else(|| self.missing(kind))
    }

    fn missing(&self, kind: EventKind) -> DispatchError {
        DispatchError {
            actor_type: S::ACTOR_TYPE,
            event_type: kind.name(),
        }
    }
}

impl<S: ActorState> Default for DispatchTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ActorState> fmt::Debug for DispatchTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.values().map(|(k, _)| k.name()).collect();
        names.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("actor_type", &S::ACTOR_TYPE)
            .field("handlers", &names)
            .finish()
    }
}
