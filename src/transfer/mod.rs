//! A two-ledger funds-transfer saga built on the actor engine.
//!
//! The saga tracks one transfer between a debiting and a crediting ledger.
//! Each ledger confirms its preparation and then its final commit; the two
//! confirmations of a pair may arrive in either order, and whichever lands
//! second advances the saga. Every command checks its precondition first and
//! is a silent no-op when it does not hold, so ledgers may redeliver.
//!
//! Before opening a store, register the saga's event codes with
//! [`register_event_types`] and pass [`dispatch_table`] to
//! [`ActorStoreBuilder::actor`](crate::ActorStoreBuilder::actor).

mod events;
mod saga;
mod state;

pub use events::{
    AccountValidatePassed, CancelReason, TransferCanceled, TransferEvent, TransferInConfirmed,
    TransferInPreparationConfirmed, TransferOutConfirmed, TransferOutPreparationConfirmed,
    TransferTransactionInfo, TransferTransactionStarted, codes, register_event_types,
};
pub use saga::TransferTransaction;
pub use state::{TransactionStatus, TransferCommand, TransferTransactionState, dispatch_table};
