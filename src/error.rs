//! Crate-level error types for event application, persistence, and actor access.

/// No handler is registered for an event type.
///
/// This is a wiring error, never retried. [`ActorStoreBuilder::open`]
/// runs [`DispatchTable::verify`] so it normally surfaces at start-up rather
/// than while commands are flowing.
///
/// [`ActorStoreBuilder::open`]: crate::ActorStoreBuilder::open
/// [`DispatchTable::verify`]: crate::DispatchTable::verify
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no handler registered for event type `{event_type}` on actor `{actor_type}`")]
pub struct DispatchError {
    /// The actor type whose dispatch table was consulted.
    pub actor_type: &'static str,
    /// Name of the event type that could not be routed.
    pub event_type: &'static str,
}

/// Failure translating between domain events and their stored records.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The event type was never given a type code in the registry.
    #[error("event type `{0}` has no registered type code")]
    UnregisteredEvent(&'static str),

    /// A stored record carries a type code the registry does not know.
    #[error("unknown event type code {0}")]
    UnknownTypeCode(u32),

    /// The type code resolves to an event type that does not belong to the
    /// actor's event set.
    #[error("type code {code} maps to `{event_type}`, which this actor does not accept")]
    ForeignEvent {
        /// The stored type code.
        code: u32,
        /// Name of the event type the code resolved to.
        event_type: &'static str,
    },

    /// JSON (de)serialization of an event payload or state failed.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The storage collaborator failed to append, read, or write a snapshot.
///
/// State is never mutated when an append fails; the caller (or the runtime
/// above it) decides whether to retry the whole command.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record or snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Backend-specific failure that is not an I/O error.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Error returned by [`ActorCore::apply_event`](crate::ActorCore::apply_event)
/// and replay.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// No handler for the event's type.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The event (or a checkpoint) could not be made durable.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<CodecError> for ApplyError {
    fn from(err: CodecError) -> Self {
        Self::Persistence(PersistenceError::Codec(err))
    }
}

/// Error returned when sending a command through an [`ActorHandle`](crate::ActorHandle).
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// Applying the produced events failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// The actor task exited before replying.
    #[error("actor is no longer running")]
    ActorGone,
}

/// Error returned when reading the current state of an actor fails.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The actor task exited before replying.
    #[error("actor is no longer running")]
    ActorGone,
}

/// Error returned while opening an [`ActorStore`](crate::ActorStore) or
/// activating one of its actors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A registered dispatch table failed its self-test.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An actor's event type has no code in the registry.
    #[error("event type `{event_type}` of actor `{actor_type}` has no registered type code")]
    UnregisteredEventType {
        /// The actor type declaring the event.
        actor_type: &'static str,
        /// Name of the event type missing a code.
        event_type: &'static str,
    },

    /// The actor type was never registered with the store builder.
    #[error("actor type `{0}` is not registered with this store")]
    UnknownActorType(&'static str),

    /// Replay failed while activating an actor.
    #[error("activation failed: {0}")]
    Activation(#[from] ApplyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_names_actor_and_event() {
        let err = DispatchError {
            actor_type: "transfer",
            event_type: "TransferCanceled",
        };
        assert_eq!(
            err.to_string(),
            "no handler registered for event type `TransferCanceled` on actor `transfer`"
        );
    }

    #[test]
    fn apply_error_is_transparent_over_dispatch() {
        let err = ApplyError::from(DispatchError {
            actor_type: "counter",
            event_type: "Noted",
        });
        assert!(err.to_string().starts_with("no handler registered"));
    }

    #[test]
    fn codec_error_converts_into_persistence() {
        let err = ApplyError::from(CodecError::UnknownTypeCode(42));
        assert!(
            matches!(
                err,
                ApplyError::Persistence(PersistenceError::Codec(CodecError::UnknownTypeCode(42)))
            ),
            "got: {err:?}"
        );
    }

    #[test]
    fn persistence_io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        let err = PersistenceError::from(io_err);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn execute_error_actor_gone_display() {
        assert_eq!(ExecuteError::ActorGone.to_string(), "actor is no longer running");
        assert_eq!(StateError::ActorGone.to_string(), "actor is no longer running");
    }

    // Errors cross task boundaries through oneshot channels.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<ApplyError>();
            assert_send_sync::<ExecuteError>();
            assert_send_sync::<StateError>();
            assert_send_sync::<StoreError>();
        }
    };
}
