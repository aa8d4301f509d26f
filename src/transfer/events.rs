//! Event vocabulary of the transfer saga.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DomainEvent, Event};
use crate::registry::{EventKind, EventTypeRegistry};

/// Parameters of a transfer, fixed when the saga starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTransactionInfo {
    /// Account the funds leave.
    pub from_account_id: Uuid,
    /// Account the funds arrive in.
    pub to_account_id: Uuid,
    /// Amount in minor currency units (avoids floating-point).
    pub amount: u64,
}

/// Why a transfer was canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The debited account cannot cover the amount.
    InsufficientFunds,
    /// One of the accounts does not exist.
    AccountNotFound,
    /// One of the accounts is frozen.
    AccountFrozen,
    /// A ledger did not answer in time.
    Timeout,
    /// Any other reason, as free text.
    Other(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientFunds => f.write_str("insufficient funds"),
            Self::AccountNotFound => f.write_str("account not found"),
            Self::AccountFrozen => f.write_str("account frozen"),
            Self::Timeout => f.write_str("timed out"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// The saga was started with its transfer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTransactionStarted {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// Both accounts passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountValidatePassed {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// The outgoing ledger reserved the funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutPreparationConfirmed {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// The incoming ledger is ready to receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInPreparationConfirmed {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// The outgoing ledger committed the debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutConfirmed {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// The incoming ledger committed the credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInConfirmed {
    /// The transfer's parameters.
    pub info: TransferTransactionInfo,
}

/// The transfer was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCanceled {
    /// Why the transfer stopped.
    pub reason: CancelReason,
}

impl Event for TransferTransactionStarted {
    const NAME: &'static str = "TransferTransactionStarted";
}

impl Event for AccountValidatePassed {
    const NAME: &'static str = "AccountValidatePassed";
}

impl Event for TransferOutPreparationConfirmed {
    const NAME: &'static str = "TransferOutPreparationConfirmed";
}

impl Event for TransferInPreparationConfirmed {
    const NAME: &'static str = "TransferInPreparationConfirmed";
}

impl Event for TransferOutConfirmed {
    const NAME: &'static str = "TransferOutConfirmed";
}

impl Event for TransferInConfirmed {
    const NAME: &'static str = "TransferInConfirmed";
}

impl Event for TransferCanceled {
    const NAME: &'static str = "TransferCanceled";
}

/// Every event the transfer saga produces and applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransferEvent {
    TransferTransactionStarted(TransferTransactionStarted),
    AccountValidatePassed(AccountValidatePassed),
    TransferOutPreparationConfirmed(TransferOutPreparationConfirmed),
    TransferInPreparationConfirmed(TransferInPreparationConfirmed),
    TransferOutConfirmed(TransferOutConfirmed),
    TransferInConfirmed(TransferInConfirmed),
    TransferCanceled(TransferCanceled),
}

impl DomainEvent for TransferEvent {
    fn kind(&self) -> EventKind {
        match self {
            Self::TransferTransactionStarted(_) => EventKind::of::<TransferTransactionStarted>(),
            Self::AccountValidatePassed(_) => EventKind::of::<AccountValidatePassed>(),
            Self::TransferOutPreparationConfirmed(_) => {
                EventKind::of::<TransferOutPreparationConfirmed>()
            }
            Self::TransferInPreparationConfirmed(_) => {
                EventKind::of::<TransferInPreparationConfirmed>()
            }
            Self::TransferOutConfirmed(_) => EventKind::of::<TransferOutConfirmed>(),
            Self::TransferInConfirmed(_) => EventKind::of::<TransferInConfirmed>(),
            Self::TransferCanceled(_) => EventKind::of::<TransferCanceled>(),
        }
    }

    fn payload(&self) -> &dyn Any {
        match self {
            Self::TransferTransactionStarted(e) => e,
            Self::AccountValidatePassed(e) => e,
            Self::TransferOutPreparationConfirmed(e) => e,
            Self::TransferInPreparationConfirmed(e) => e,
            Self::TransferOutConfirmed(e) => e,
            Self::TransferInConfirmed(e) => e,
            Self::TransferCanceled(e) => e,
        }
    }

    fn kinds() -> Vec<EventKind> {
        vec![
            EventKind::of::<TransferTransactionStarted>(),
            EventKind::of::<AccountValidatePassed>(),
            EventKind::of::<TransferOutPreparationConfirmed>(),
            EventKind::of::<TransferInPreparationConfirmed>(),
            EventKind::of::<TransferOutConfirmed>(),
            EventKind::of::<TransferInConfirmed>(),
            EventKind::of::<TransferCanceled>(),
        ]
    }
}

/// Stable type codes of the transfer events. Never renumber.
pub mod codes {
    pub const TRANSFER_TRANSACTION_STARTED: u32 = 1001;
    pub const ACCOUNT_VALIDATE_PASSED: u32 = 1002;
    pub const TRANSFER_OUT_PREPARATION_CONFIRMED: u32 = 1003;
    pub const TRANSFER_IN_PREPARATION_CONFIRMED: u32 = 1004;
    pub const TRANSFER_OUT_CONFIRMED: u32 = 1005;
    pub const TRANSFER_IN_CONFIRMED: u32 = 1006;
    pub const TRANSFER_CANCELED: u32 = 1007;
}

/// Register every transfer event under its stable code.
///
/// Safe to call more than once; repeated registrations are no-ops.
pub fn register_event_types(registry: &EventTypeRegistry) {
    registry.register::<TransferTransactionStarted>(codes::TRANSFER_TRANSACTION_STARTED);
    registry.register::<AccountValidatePassed>(codes::ACCOUNT_VALIDATE_PASSED);
    registry.register::<TransferOutPreparationConfirmed>(codes::TRANSFER_OUT_PREPARATION_CONFIRMED);
    registry.register::<TransferInPreparationConfirmed>(codes::TRANSFER_IN_PREPARATION_CONFIRMED);
    registry.register::<TransferOutConfirmed>(codes::TRANSFER_OUT_CONFIRMED);
    registry.register::<TransferInConfirmed>(codes::TRANSFER_IN_CONFIRMED);
    registry.register::<TransferCanceled>(codes::TRANSFER_CANCELED);
}
