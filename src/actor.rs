//! Actor loop that owns an [`ActorCore`] and processes commands one at a time.
//!
//! The loop runs on a tokio task and drains an `mpsc` channel sequentially,
//! which is what gives each actor identity its single-writer guarantee: at
//! most one `apply_event` is ever in flight per instance.
//!
//! Public API: [`ActorHandle`] (cloneable async handle) and [`spawn_actor`].

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use crate::engine::ActorCore;
use crate::error::{ApplyError, ExecuteError, PersistenceError, StateError};
use crate::event::EventEnvelope;
use crate::state::ActorState;

/// Default idle timeout for actors: 5 minutes.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Mailbox capacity per actor.
const MAILBOX_CAPACITY: usize = 32;

/// Configuration for the actor loop.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// How long the actor waits for a message before shutting down.
    pub idle_timeout: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ActorConfig {
    /// A configuration whose actors never idle out.
    pub fn never_idle() -> Self {
        // `u64::MAX / 2` avoids overflow when tokio adds the timeout to the
        // current `Instant`.
        Self {
            idle_timeout: Duration::from_secs(u64::MAX / 2),
        }
    }
}

/// Result type sent back through the `Execute` reply channel.
type ExecuteResult<S> = Result<Vec<EventEnvelope<<S as ActorState>::Event>>, ApplyError>;

/// Messages sent from [`ActorHandle`] to the actor loop.
pub(crate) enum ActorMessage<S: ActorState> {
    /// Decide on a command and apply the produced events.
    Execute {
        cmd: S::Command,
        reply: oneshot::Sender<ExecuteResult<S>>,
    },

    /// Retrieve a clone of the current state.
    GetState { reply: oneshot::Sender<S> },

    /// Write a snapshot now.
    Checkpoint {
        reply: oneshot::Sender<Result<(), PersistenceError>>,
    },

    /// Gracefully shut down the actor loop.
    Shutdown,
}

/// Runs the actor loop until the channel closes, `Shutdown` arrives, or the
/// idle timeout elapses.
async fn run_actor<S: ActorState>(
    mut core: ActorCore<S>,
    mut rx: mpsc::Receiver<ActorMessage<S>>,
    config: ActorConfig,
) {
    loop {
        match tokio::time::timeout(config.idle_timeout, rx.recv()).await {
            Ok(Some(ActorMessage::Execute { cmd, reply })) => {
                let span = tracing::info_span!(
                    "execute",
                    actor_type = S::ACTOR_TYPE,
                    actor_id = %core.id(),
                );
                let result = core.execute(cmd).instrument(span).await;
                // If the receiver was dropped, the caller no longer cares
                // about the result.
                let _ = reply.send(result);
            }
            Ok(Some(ActorMessage::GetState { reply })) => {
                let _ = reply.send(core.state().clone());
            }
            Ok(Some(ActorMessage::Checkpoint { reply })) => {
                let _ = reply.send(core.checkpoint().await);
            }
            Ok(Some(ActorMessage::Shutdown)) | Ok(None) => break,
            Err(_elapsed) => {
                tracing::info!(
                    actor_type = S::ACTOR_TYPE,
                    actor_id = %core.id(),
                    "actor idle, shutting down"
                );
                break;
            }
        }
    }
}

/// Async handle to a running actor.
///
/// Lightweight, cloneable, and `Send + Sync`.
#[derive(Debug)]
pub struct ActorHandle<S: ActorState> {
    id: Uuid,
    sender: mpsc::Sender<ActorMessage<S>>,
}

// Manual `Clone`: only the sender is cloned, whatever `S` is.
impl<S: ActorState> Clone for ActorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<S: ActorState> ActorHandle<S> {
    /// The identity of the actor behind this handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send a command and wait for the applied events.
    ///
    /// An empty result means the command's precondition did not hold.
    ///
    /// # Errors
    ///
    /// * [`ExecuteError::Apply`] -- dispatch or persistence failed.
    /// * [`ExecuteError::ActorGone`] -- the actor task has exited.
    pub async fn execute(
        &self,
        cmd: S::Command,
    ) -> Result<Vec<EventEnvelope<S::Event>>, ExecuteError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Execute { cmd, reply: tx })
            .await
            .map_err(|_| ExecuteError::ActorGone)?;
        Ok(rx.await.map_err(|_| ExecuteError::ActorGone)??)
    }

    /// Read a clone of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ActorGone`] if the actor task has exited.
    pub async fn state(&self) -> Result<S, StateError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::GetState { reply: tx })
            .await
            .map_err(|_| StateError::ActorGone)?;
        rx.await.map_err(|_| StateError::ActorGone)
    }

    /// Ask the actor to write a snapshot now.
    ///
    /// # Errors
    ///
    /// * [`ExecuteError::Apply`] -- the snapshot write failed.
    /// * [`ExecuteError::ActorGone`] -- the actor task has exited.
    pub async fn checkpoint(&self) -> Result<(), ExecuteError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Checkpoint { reply: tx })
            .await
            .map_err(|_| ExecuteError::ActorGone)?;
        rx.await
            .map_err(|_| ExecuteError::ActorGone)?
            .map_err(|e| ExecuteError::Apply(e.into()))
    }

    /// Ask the actor to stop after the messages already queued.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown).await;
    }

    /// Whether the actor task is still running.
    ///
    /// The store uses this to evict stale handles and re-activate the actor
    /// on the next `get`.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Start the actor loop for an activated core on the current tokio runtime.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn_actor<S: ActorState>(core: ActorCore<S>, config: ActorConfig) -> ActorHandle<S> {
    let id = core.id();
    let (tx, rx) = mpsc::channel::<ActorMessage<S>>(MAILBOX_CAPACITY);
    tokio::spawn(run_actor(core, rx, config));
    ActorHandle { id, sender: tx }
}
