//! Domain event traits, the event envelope, and the compact storage codec.
//!
//! Each concrete event is its own type implementing [`Event`]. An actor's
//! full vocabulary is a tagged union implementing [`DomainEvent`], serialized
//! adjacently tagged (`{"type": NAME, "data": {...}}`). On the way to storage
//! the `"type"` string is replaced by the registry's integer code.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;
use crate::registry::{EventKind, EventTypeRegistry};

/// Marker for a concrete, immutable domain event payload.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Stable event name. Must equal the variant name used for this event in
    /// the owning [`DomainEvent`] union.
    const NAME: &'static str;
}

/// The closed set of events one actor type accepts.
///
/// Implemented by an enum with one newtype variant per [`Event`], using
/// `#[serde(tag = "type", content = "data")]`.
///
/// # Contract
///
/// - [`kind`](DomainEvent::kind) and [`payload`](DomainEvent::payload) must
///   describe the same inner value.
/// - [`kinds`](DomainEvent::kinds) lists every variant; it drives the
///   start-up self-tests.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Descriptor of the concrete event inside this variant.
    fn kind(&self) -> EventKind;

    /// The concrete event, type-erased for handler lookup.
    fn payload(&self) -> &dyn Any;

    /// Descriptors of every variant.
    fn kinds() -> Vec<EventKind>;
}

/// A domain event bound to the actor it belongs to, stamped at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope<E> {
    /// Identity of the actor instance the event belongs to.
    pub aggregate_id: Uuid,
    /// UTC construction time.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    pub event: E,
}

impl<E> EventEnvelope<E> {
    /// Wrap `event` for `aggregate_id`, stamping the current UTC time.
    pub fn new(aggregate_id: Uuid, event: E) -> Self {
        Self {
            aggregate_id,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Metadata handed to event handlers once the event has a log position.
    pub fn meta(&self, sequence: u64) -> EventMeta {
        EventMeta {
            aggregate_id: self.aggregate_id,
            timestamp: self.timestamp,
            sequence,
        }
    }
}

/// Envelope fields visible to an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// Identity of the actor instance.
    pub aggregate_id: Uuid,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// 1-based position of the event in the actor's log.
    pub sequence: u64,
}

/// The durable representation of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 1-based position in the actor's log.
    pub sequence: u64,
    /// Registry code of the event type.
    pub type_code: u32,
    /// Identity of the actor instance.
    pub aggregate_id: Uuid,
    /// UTC construction time of the event.
    pub timestamp: DateTime<Utc>,
    /// The `"data"` portion of the adjacently tagged event.
    pub payload: serde_json::Value,
}

/// Converts envelopes to and from [`EventRecord`]s using a type registry.
#[derive(Debug, Clone)]
pub struct EventCodec {
    registry: Arc<EventTypeRegistry>,
}

impl EventCodec {
    /// Create a codec backed by `registry`.
    pub fn new(registry: Arc<EventTypeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this codec resolves type codes with.
    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.registry
    }

    /// Encode `envelope` as the record stored at `sequence`.
    ///
    /// # Errors
    ///
    /// * [`CodecError::UnregisteredEvent`] if the event type has no code.
    /// * [`CodecError::Malformed`] if the event cannot be serialized.
    pub fn encode<E: DomainEvent>(
        &self,
        envelope: &EventEnvelope<E>,
        sequence: u64,
    ) -> Result<EventRecord, CodecError> {
        let kind = envelope.event.kind();
        let type_code = self
            .registry
            .event_code(kind)
            .ok_or(CodecError::UnregisteredEvent(kind.name()))?;

        // `{"type": "...", "data": {...}}`; only the data half is stored.
        let mut value = serde_json::to_value(&envelope.event)?;
        let payload = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);

        Ok(EventRecord {
            sequence,
            type_code,
            aggregate_id: envelope.aggregate_id,
            timestamp: envelope.timestamp,
            payload,
        })
    }

    /// Decode a stored record back into a typed envelope.
    ///
    /// # Errors
    ///
    /// * [`CodecError::UnknownTypeCode`] if the code is not registered.
    /// * [`CodecError::ForeignEvent`] if the code names an event outside `E`.
    /// * [`CodecError::Malformed`] if the payload does not deserialize.
    pub fn decode<E: DomainEvent>(
        &self,
        record: &EventRecord,
    ) -> Result<EventEnvelope<E>, CodecError> {
        let kind = self
            .registry
            .event_kind(record.type_code)
            .ok_or(CodecError::UnknownTypeCode(record.type_code))?;

        if !E::kinds().contains(&kind) {
            return Err(CodecError::ForeignEvent {
                code: record.type_code,
                event_type: kind.name(),
            });
        }

        let tagged = serde_json::json!({
            "type": kind.name(),
            "data": record.payload,
        });
        let event = serde_json::from_value::<E>(tagged)?;

        Ok(EventEnvelope {
            aggregate_id: record.aggregate_id,
            timestamp: record.timestamp,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_fixtures::{Added, CounterEvent, Noted, Reset, counter_registry};

    #[test]
    fn encode_replaces_name_with_code() {
        let codec = EventCodec::new(counter_registry());
        let id = Uuid::new_v4();
        let envelope = EventEnvelope::new(id, CounterEvent::Added(Added { amount: 5 }));

        let record = codec.encode(&envelope, 3).expect("encode should succeed");

        assert_eq!(record.sequence, 3);
        assert_eq!(record.type_code, 1);
        assert_eq!(record.aggregate_id, id);
        assert_eq!(record.payload, serde_json::json!({"amount": 5}));
    }

    #[test]
    fn decode_restores_envelope() {
        let codec = EventCodec::new(counter_registry());
        let envelope = EventEnvelope::new(
            Uuid::new_v4(),
            CounterEvent::Noted(Noted {
                text: "hello".into(),
            }),
        );
        let record = codec.encode(&envelope, 1).expect("encode should succeed");

        let decoded = codec
            .decode::<CounterEvent>(&record)
            .expect("decode should succeed");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn encode_unregistered_event_fails() {
        let codec = EventCodec::new(Arc::new(EventTypeRegistry::new()));
        let envelope =
            EventEnvelope::new(Uuid::new_v4(), CounterEvent::Reset(Reset { previous: 1 }));

        let err = codec.encode(&envelope, 1).expect_err("no code registered");
        assert!(matches!(err, CodecError::UnregisteredEvent("Reset")), "got: {err:?}");
    }

    #[test]
    fn decode_unknown_code_fails() {
        let codec = EventCodec::new(counter_registry());
        let record = EventRecord {
            sequence: 1,
            type_code: 4040,
            aggregate_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        };

        let err = codec
            .decode::<CounterEvent>(&record)
            .expect_err("code is not registered");
        assert!(matches!(err, CodecError::UnknownTypeCode(4040)), "got: {err:?}");
    }

    #[test]
    fn decode_malformed_payload_fails() {
        let codec = EventCodec::new(counter_registry());
        let record = EventRecord {
            sequence: 1,
            type_code: 1,
            aggregate_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: serde_json::json!({"amount": "not a number"}),
        };

        let err = codec
            .decode::<CounterEvent>(&record)
            .expect_err("payload does not match Added");
        assert!(matches!(err, CodecError::Malformed(_)), "got: {err:?}");
    }

    #[test]
    fn record_serializes_compactly() {
        let codec = EventCodec::new(counter_registry());
        let envelope = EventEnvelope::new(Uuid::new_v4(), CounterEvent::Added(Added { amount: 2 }));
        let record = codec.encode(&envelope, 1).expect("encode should succeed");

        let json = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(json["type_code"], 1);
        assert!(json.get("type").is_none(), "type name must not be stored");
    }
}
