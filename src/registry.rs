//! Process-wide mapping between stable integer codes and event types.
//!
//! Stored records carry a compact `u32` type code instead of a type name.
//! Codes are assigned by the caller at start-up (they must stay stable across
//! releases) and registered here before any event traffic begins. Once the
//! owning [`ActorStore`](crate::ActorStore) opens, the registry is sealed and
//! further registrations are ignored.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::event::Event;

/// Runtime descriptor of a concrete event type.
///
/// Identity is the Rust `TypeId`; the name is carried along for encoding
/// and diagnostics.
#[derive(Clone, Copy)]
pub struct EventKind {
    type_id: TypeId,
    name: &'static str,
}

impl EventKind {
    /// Descriptor for the event type `E`.
    pub fn of<E: Event>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
        }
    }

    /// The event's stable name (its [`Event::NAME`]).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The Rust type identity of the event.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EventKind {}

impl Hash for EventKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventKind").field(&self.name).finish()
    }
}

/// Bidirectional `code <-> event type` registry.
///
/// Writers are serialized by a whole-registry lock. A registration whose
/// code is zero or already taken is a silent no-op: the first `(code, type)`
/// pair always wins and is never overwritten.
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    entries: RwLock<HashMap<u32, EventKind>>,
    sealed: AtomicBool,
}

static GLOBAL: OnceLock<Arc<EventTypeRegistry>> = OnceLock::new();

impl EventTypeRegistry {
    /// Create an empty, private registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<EventTypeRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EventTypeRegistry::new())))
    }

    /// Register `E` under `code`.
    ///
    /// Does nothing when `code` is `0`, when `code` is already registered,
    /// or when the registry has been sealed.
    pub fn register<E: Event>(&self, code: u32) {
        let kind = EventKind::of::<E>();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if self.sealed.load(Ordering::Acquire) {
            tracing::warn!(
                code,
                event_type = kind.name(),
                "event type registry is sealed; registration ignored"
            );
            return;
        }
        if code == 0 {
            tracing::debug!(event_type = kind.name(), "type code 0 is reserved; ignored");
            return;
        }
        if let Some(existing) = entries.get(&code) {
            tracing::debug!(
                code,
                event_type = kind.name(),
                registered = existing.name(),
                "type code already registered; ignored"
            );
            return;
        }
        entries.insert(code, kind);
    }

    /// Look up the event type registered under `code`.
    pub fn event_kind(&self, code: u32) -> Option<EventKind> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .copied()
    }

    /// Look up the code registered for `kind`.
    ///
    /// Linear scan. If several codes were somehow bound to the same type,
    /// which one is returned is unspecified.
    pub fn event_code(&self, kind: EventKind) -> Option<u32> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|(code, registered)| (*registered == kind).then_some(*code))
    }

    /// Shorthand for `event_code(EventKind::of::<E>())`.
    pub fn code_of<E: Event>(&self) -> Option<u32> {
        self.event_code(EventKind::of::<E>())
    }

    /// Freeze the registry; later registrations are ignored.
    pub fn seal(&self) {
        // Taking the write lock orders sealing after any in-flight writer.
        let _entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Number of registered codes.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(code, name)` pairs, sorted by code.
    pub fn registrations(&self) -> Vec<(u32, &'static str)> {
        let mut pairs: Vec<(u32, &'static str)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(code, kind)| (*code, kind.name()))
            .collect();
        pairs.sort_unstable_by_key(|(code, _)| *code);
        pairs
    }
}
