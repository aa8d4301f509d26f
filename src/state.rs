//! The `ActorState` trait: an actor's materialized view plus its command
//! decisions.

use serde::{Serialize, de::DeserializeOwned};

use crate::event::DomainEvent;

/// State of an event-sourced actor, derived solely by folding its events.
///
/// The implementing type is the state itself. Mutation happens only in the
/// handlers of the actor's [`DispatchTable`](crate::DispatchTable); this
/// trait contributes the decision half.
///
/// # Contract
///
/// - [`handle`](ActorState::handle) must be a pure decision function: it
///   checks the command's precondition against the current state and returns
///   the events to apply. An empty vector means the precondition was not met,
///   which is a successful no-op rather than an error, so redelivered
///   commands are harmless.
pub trait ActorState:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies this actor type (e.g. `"transfer"`). Used in stream paths
    /// and log fields.
    const ACTOR_TYPE: &'static str;

    /// Commands accepted by the actor.
    type Command: Send + 'static;

    /// The actor's event vocabulary.
    type Event: DomainEvent;

    /// Decide which events a command produces in the current state.
    fn handle(&self, cmd: Self::Command) -> Vec<Self::Event>;
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use std::any::Any;
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::ActorState;
    use crate::dispatch::{Checkpoint, DispatchTable};
    use crate::event::{DomainEvent, Event, EventMeta};
    use crate::registry::{EventKind, EventTypeRegistry};

    /// A simple counter actor used as a test fixture.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Counter {
        pub value: u64,
        pub notes: Vec<String>,
    }

    pub(crate) enum CounterCommand {
        Add(u64),
        Reset,
        Note(String),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Added {
        pub amount: u64,
    }

    impl Event for Added {
        const NAME: &'static str = "Added";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Reset {
        pub previous: u64,
    }

    impl Event for Reset {
        const NAME: &'static str = "Reset";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Noted {
        pub text: String,
    }

    impl Event for Noted {
        const NAME: &'static str = "Noted";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub(crate) enum CounterEvent {
        Added(Added),
        Reset(Reset),
        Noted(Noted),
    }

    impl DomainEvent for CounterEvent {
        fn kind(&self) -> EventKind {
            match self {
                CounterEvent::Added(_) => EventKind::of::<Added>(),
                CounterEvent::Reset(_) => EventKind::of::<Reset>(),
                CounterEvent::Noted(_) => EventKind::of::<Noted>(),
            }
        }

        fn payload(&self) -> &dyn Any {
            match self {
                CounterEvent::Added(e) => e,
                CounterEvent::Reset(e) => e,
                CounterEvent::Noted(e) => e,
            }
        }

        fn kinds() -> Vec<EventKind> {
            vec![
                EventKind::of::<Added>(),
                EventKind::of::<Reset>(),
                EventKind::of::<Noted>(),
            ]
        }
    }

    impl ActorState for Counter {
        const ACTOR_TYPE: &'static str = "counter";

        type Command = CounterCommand;
        type Event = CounterEvent;

        fn handle(&self, cmd: Self::Command) -> Vec<Self::Event> {
            match cmd {
                CounterCommand::Add(0) => Vec::new(),
                CounterCommand::Add(amount) => vec![CounterEvent::Added(Added { amount })],
                CounterCommand::Reset if self.value == 0 => Vec::new(),
                CounterCommand::Reset => vec![CounterEvent::Reset(Reset {
                    previous: self.value,
                })],
                CounterCommand::Note(text) => vec![CounterEvent::Noted(Noted { text })],
            }
        }
    }

    fn on_added(state: &mut Counter, event: &Added, _meta: &EventMeta) -> Checkpoint {
        state.value += event.amount;
        Checkpoint::None
    }

    fn on_reset(state: &mut Counter, _event: &Reset, _meta: &EventMeta) -> Checkpoint {
        state.value = 0;
        Checkpoint::Snapshot
    }

    fn on_noted(state: &mut Counter, event: &Noted, _meta: &EventMeta) -> Checkpoint {
        state.notes.push(event.text.clone());
        Checkpoint::None
    }

    /// Handlers for every counter event.
    pub(crate) fn counter_table() -> DispatchTable<Counter> {
        DispatchTable::new()
            .on::<Added>(on_added)
            .on::<Reset>(on_reset)
            .on::<Noted>(on_noted)
    }

    /// A table missing the `Noted` handler.
    pub(crate) fn partial_counter_table() -> DispatchTable<Counter> {
        DispatchTable::new()
            .on::<Added>(on_added)
            .on::<Reset>(on_reset)
    }

    /// A private registry holding codes for every counter event.
    pub(crate) fn counter_registry() -> Arc<EventTypeRegistry> {
        let registry = EventTypeRegistry::new();
        registry.register::<Added>(1);
        registry.register::<Reset>(2);
        registry.register::<Noted>(3);
        Arc::new(registry)
    }
}
