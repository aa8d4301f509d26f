//! Walks one transfer through its full lifecycle and cancels another.
//!
//! Run with: `cargo run --example transfer`
//!
//! Events and snapshots are written under a temporary directory. Set
//! `RUST_LOG=sagafold=debug` to see activation and snapshot logs.

use std::sync::Arc;

use sagafold::transfer::{self, CancelReason, TransferTransaction};
use sagafold::{ActorStore, EventTypeRegistry, FileStorage};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sagafold=info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let registry = EventTypeRegistry::global();
    transfer::register_event_types(&registry);

    let store = ActorStore::builder(Arc::new(FileStorage::new(dir.path())))
        .registry(registry)
        .actor(transfer::dispatch_table())
        .open()?;

    // --- Happy path ----------------------------------------------------------

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let saga = TransferTransaction::open(&store, Uuid::new_v4()).await?;
    saga.initialize(alice, bob, 1_250).await?;
    saga.confirm_account_validate_passed().await?;

    // The incoming ledger answers first; order does not matter.
    saga.confirm_transfer_in_preparation().await?;
    saga.confirm_transfer_out_preparation().await?;
    println!("after preparation: {:?}", saga.status().await?);

    saga.confirm_transfer_out().await?;
    saga.confirm_transfer_in().await?;
    println!("after confirmation: {:?}", saga.status().await?);

    // A redelivered confirmation is a no-op.
    let applied = saga.confirm_transfer_in().await?;
    println!("redelivered confirm_transfer_in applied: {applied}");

    if let Some(info) = saga.transfer_transaction_info().await? {
        println!(
            "moved {} minor units from {} to {}",
            info.amount, info.from_account_id, info.to_account_id
        );
    }

    // --- Cancellation --------------------------------------------------------

    let canceled = TransferTransaction::open(&store, Uuid::new_v4()).await?;
    canceled.initialize(bob, alice, 1_000_000).await?;
    canceled.cancel(CancelReason::InsufficientFunds).await?;
    let state = canceled.state().await?;
    println!(
        "second transfer: {:?} ({})",
        state.status,
        state
            .cancel_reason
            .map(|r| r.to_string())
            .unwrap_or_default()
    );

    let confirmed = canceled.confirm_account_validate_passed().await?;
    println!("confirm after cancel applied: {confirmed}");

    Ok(())
}
