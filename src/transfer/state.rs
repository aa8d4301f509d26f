//! The transfer saga's state machine: commands, preconditions, and handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{Checkpoint, DispatchTable};
use crate::event::EventMeta;
use crate::state::ActorState;

use super::events::{
    AccountValidatePassed, CancelReason, TransferCanceled, TransferEvent, TransferInConfirmed,
    TransferInPreparationConfirmed, TransferOutConfirmed, TransferOutPreparationConfirmed,
    TransferTransactionInfo, TransferTransactionStarted,
};

/// Where a transfer is in its lifecycle.
///
/// Advances `Started -> AccountValidateCompleted -> PreparationCompleted ->
/// Completed`. `Canceled` is reachable from anything but `Completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Not started yet.
    #[default]
    Uninitialized,
    /// Parameters recorded; waiting for account validation.
    Started,
    /// Accounts validated; waiting for both ledgers to prepare.
    AccountValidateCompleted,
    /// Both ledgers prepared; waiting for both to commit.
    PreparationCompleted,
    /// Both ledgers committed.
    Completed,
    /// Abandoned.
    Canceled,
}

impl TransactionStatus {
    /// Whether no further transition is possible except re-cancellation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// Materialized state of one transfer saga.
///
/// Each confirmation is a flag plus the time of the event that set it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferTransactionState {
    pub status: TransactionStatus,
    /// Set once by `Initialize`.
    pub transaction_info: Option<TransferTransactionInfo>,
    pub account_validated_at: Option<DateTime<Utc>>,
    pub transfer_out_preparation_confirmed: bool,
    pub transfer_out_preparation_confirmed_at: Option<DateTime<Utc>>,
    pub transfer_in_preparation_confirmed: bool,
    pub transfer_in_preparation_confirmed_at: Option<DateTime<Utc>>,
    pub transfer_out_confirmed: bool,
    pub transfer_out_confirmed_at: Option<DateTime<Utc>>,
    pub transfer_in_confirmed: bool,
    pub transfer_in_confirmed_at: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
}

/// Commands accepted by a transfer saga.
///
/// A command whose precondition does not hold produces no events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCommand {
    Initialize(TransferTransactionInfo),
    ConfirmAccountValidatePassed,
    ConfirmTransferOutPreparation,
    ConfirmTransferInPreparation,
    ConfirmTransferOut,
    ConfirmTransferIn,
    Cancel(CancelReason),
}

impl ActorState for TransferTransactionState {
    const ACTOR_TYPE: &'static str = "transfer";

    type Command = TransferCommand;
    type Event = TransferEvent;

    fn handle(&self, cmd: TransferCommand) -> Vec<TransferEvent> {
        use TransactionStatus as Status;

        if let TransferCommand::Initialize(info) = cmd {
            if self.status != Status::Uninitialized {
                return Vec::new();
            }
            return vec![TransferEvent::TransferTransactionStarted(
                TransferTransactionStarted { info },
            )];
        }
        if let TransferCommand::Cancel(reason) = cmd {
            if self.status == Status::Completed {
                return Vec::new();
            }
            return vec![TransferEvent::TransferCanceled(TransferCanceled { reason })];
        }

        let Some(info) = self.transaction_info.clone() else {
            return Vec::new();
        };
        let event = match cmd {
            TransferCommand::ConfirmAccountValidatePassed if self.status == Status::Started => {
                TransferEvent::AccountValidatePassed(AccountValidatePassed { info })
            }
            TransferCommand::ConfirmTransferOutPreparation
                if self.status == Status::AccountValidateCompleted
                    && !self.transfer_out_preparation_confirmed =>
            {
                TransferEvent::TransferOutPreparationConfirmed(TransferOutPreparationConfirmed {
                    info,
                })
            }
            TransferCommand::ConfirmTransferInPreparation
                if self.status == Status::AccountValidateCompleted
                    && !self.transfer_in_preparation_confirmed =>
            {
                TransferEvent::TransferInPreparationConfirmed(TransferInPreparationConfirmed {
                    info,
                })
            }
            TransferCommand::ConfirmTransferOut
                if self.status == Status::PreparationCompleted && !self.transfer_out_confirmed =>
            {
                TransferEvent::TransferOutConfirmed(TransferOutConfirmed { info })
            }
            TransferCommand::ConfirmTransferIn
                if self.status == Status::PreparationCompleted && !self.transfer_in_confirmed =>
            {
                TransferEvent::TransferInConfirmed(TransferInConfirmed { info })
            }
            _ => return Vec::new(),
        };
        vec![event]
    }
}

fn on_started(
    state: &mut TransferTransactionState,
    event: &TransferTransactionStarted,
    _meta: &EventMeta,
) -> Checkpoint {
    state.status = TransactionStatus::Started;
    state.transaction_info = Some(event.info.clone());
    Checkpoint::None
}

fn on_account_validate_passed(
    state: &mut TransferTransactionState,
    _event: &AccountValidatePassed,
    meta: &EventMeta,
) -> Checkpoint {
    state.status = TransactionStatus::AccountValidateCompleted;
    state.account_validated_at = Some(meta.timestamp);
    Checkpoint::None
}

fn on_out_prepared(
    state: &mut TransferTransactionState,
    _event: &TransferOutPreparationConfirmed,
    meta: &EventMeta,
) -> Checkpoint {
    state.transfer_out_preparation_confirmed = true;
    state.transfer_out_preparation_confirmed_at = Some(meta.timestamp);
    if state.transfer_in_preparation_confirmed {
        state.status = TransactionStatus::PreparationCompleted;
    }
    Checkpoint::None
}

fn on_in_prepared(
    state: &mut TransferTransactionState,
    _event: &TransferInPreparationConfirmed,
    meta: &EventMeta,
) -> Checkpoint {
    state.transfer_in_preparation_confirmed = true;
    state.transfer_in_preparation_confirmed_at = Some(meta.timestamp);
    if state.transfer_out_preparation_confirmed {
        state.status = TransactionStatus::PreparationCompleted;
    }
    Checkpoint::None
}

fn on_out_confirmed(
    state: &mut TransferTransactionState,
    _event: &TransferOutConfirmed,
    meta: &EventMeta,
) -> Checkpoint {
    state.transfer_out_confirmed = true;
    state.transfer_out_confirmed_at = Some(meta.timestamp);
    if state.transfer_in_confirmed {
        state.status = TransactionStatus::Completed;
        return Checkpoint::Snapshot;
    }
    Checkpoint::None
}

fn on_in_confirmed(
    state: &mut TransferTransactionState,
    _event: &TransferInConfirmed,
    meta: &EventMeta,
) -> Checkpoint {
    state.transfer_in_confirmed = true;
    state.transfer_in_confirmed_at = Some(meta.timestamp);
    if state.transfer_out_confirmed {
        state.status = TransactionStatus::Completed;
        return Checkpoint::Snapshot;
    }
    Checkpoint::None
}

// Unconditional: sub-flags are left as they were.
fn on_canceled(
    state: &mut TransferTransactionState,
    event: &TransferCanceled,
    meta: &EventMeta,
) -> Checkpoint {
    state.status = TransactionStatus::Canceled;
    state.cancel_at = Some(meta.timestamp);
    state.cancel_reason = Some(event.reason.clone());
    Checkpoint::None
}

/// Handlers for every transfer event.
pub fn dispatch_table() -> DispatchTable<TransferTransactionState> {
    DispatchTable::new()
        .on::<TransferTransactionStarted>(on_started)
        .on::<AccountValidatePassed>(on_account_validate_passed)
        .on::<TransferOutPreparationConfirmed>(on_out_prepared)
        .on::<TransferInPreparationConfirmed>(on_in_prepared)
        .on::<TransferOutConfirmed>(on_out_confirmed)
        .on::<TransferInConfirmed>(on_in_confirmed)
        .on::<TransferCanceled>(on_canceled)
}
