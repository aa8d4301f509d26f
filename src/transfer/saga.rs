//! Typed facade over a running transfer saga actor.

use uuid::Uuid;

use crate::actor::ActorHandle;
use crate::error::{ExecuteError, StateError, StoreError};
use crate::store::ActorStore;

use super::events::{CancelReason, TransferTransactionInfo};
use super::state::{TransactionStatus, TransferCommand, TransferTransactionState};

/// One transfer saga, addressed by its transaction id.
///
/// Every command returns `Ok(false)` instead of an error when the saga is in
/// a state where the command does not apply, so callers can redeliver
/// commands freely.
#[derive(Debug, Clone)]
pub struct TransferTransaction {
    handle: ActorHandle<TransferTransactionState>,
}

impl TransferTransaction {
    /// Wrap an existing actor handle.
    pub fn new(handle: ActorHandle<TransferTransactionState>) -> Self {
        Self { handle }
    }

    /// Get (activating if needed) the saga `id` from `store`.
    pub async fn open(store: &ActorStore, id: Uuid) -> Result<Self, StoreError> {
        Ok(Self::new(store.get::<TransferTransactionState>(id).await?))
    }

    /// The transaction id.
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// Start the transfer of `amount` minor units from `from` to `to`.
    pub async fn initialize(
        &self,
        from: Uuid,
        to: Uuid,
        amount: u64,
    ) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::Initialize(TransferTransactionInfo {
            from_account_id: from,
            to_account_id: to,
            amount,
        }))
        .await
    }

    /// Record that both accounts passed validation. Applies only in
    /// `Started`.
    pub async fn confirm_account_validate_passed(&self) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::ConfirmAccountValidatePassed).await
    }

    /// Record that the debiting ledger reserved the funds.
    ///
    /// The second of the two preparation confirmations, in either order,
    /// moves the saga to `PreparationCompleted`.
    pub async fn confirm_transfer_out_preparation(&self) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::ConfirmTransferOutPreparation).await
    }

    /// Record that the crediting ledger is ready to receive.
    pub async fn confirm_transfer_in_preparation(&self) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::ConfirmTransferInPreparation).await
    }

    /// Record the debit commit. Applies only once preparation completed.
    pub async fn confirm_transfer_out(&self) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::ConfirmTransferOut).await
    }

    /// Record the credit commit. Applies only once preparation completed.
    ///
    /// Whichever commit lands second completes the saga and writes a
    /// snapshot.
    pub async fn confirm_transfer_in(&self) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::ConfirmTransferIn).await
    }

    /// Abandon the transfer unless it already completed.
    pub async fn cancel(&self, reason: CancelReason) -> Result<bool, ExecuteError> {
        self.send(TransferCommand::Cancel(reason)).await
    }

    /// The saga's current lifecycle status.
    pub async fn status(&self) -> Result<TransactionStatus, StateError> {
        Ok(self.handle.state().await?.status)
    }

    /// The transfer parameters, or `None` before `initialize`.
    pub async fn transfer_transaction_info(
        &self,
    ) -> Result<Option<TransferTransactionInfo>, StateError> {
        Ok(self.handle.state().await?.transaction_info)
    }

    /// The full saga state.
    pub async fn state(&self) -> Result<TransferTransactionState, StateError> {
        self.handle.state().await
    }

    // `true` if the command applied at least one event.
    async fn send(&self, cmd: TransferCommand) -> Result<bool, ExecuteError> {
        let applied = self.handle.execute(cmd).await?;
        Ok(!applied.is_empty())
    }
}
