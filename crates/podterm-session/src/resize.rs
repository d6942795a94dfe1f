//! Resize signal queue.
//!
//! Hands size-change events from the session's read path to the execution
//! transport's size poller. At most one event is ever in flight; nothing is
//! queued behind it. Both ends race the session's termination signal, so a
//! poller parked in [`ResizeQueue::next_size`] returns `None` and a producer
//! parked in a rendezvous hand-off returns [`ResizeError::Terminated`] as soon
//! as the session ends.

use async_trait::async_trait;
use podterm_core::{TerminalSize, TerminalSizeQueue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::Lifecycle;

/// What happens to a resize the poller has not picked up yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Depth-1 slot: a newer size replaces an unconsumed older one and the
    /// producer never waits.
    #[default]
    Latest,
    /// Unbuffered hand-off: the producer waits until the poller accepts the
    /// size or the session terminates.
    Rendezvous,
}

/// Resize hand-off failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResizeError {
    #[error("session terminated")]
    Terminated,
}

type Handoff = (TerminalSize, oneshot::Sender<()>);

enum SenderKind {
    Latest(watch::Sender<Option<TerminalSize>>),
    Rendezvous(mpsc::Sender<Handoff>),
}

enum ReceiverKind {
    Latest(watch::Receiver<Option<TerminalSize>>),
    Rendezvous(mpsc::Receiver<Handoff>),
}

/// Producer half, owned by the session's read path.
pub struct ResizeSender {
    kind: SenderKind,
    lifecycle: Lifecycle,
}

/// Consumer half, polled by the execution transport.
pub struct ResizeQueue {
    kind: ReceiverKind,
    lifecycle: Lifecycle,
}

/// Create a resize hand-off bound to `lifecycle`.
#[must_use]
pub fn resize_channel(policy: ResizePolicy, lifecycle: &Lifecycle) -> (ResizeSender, ResizeQueue) {
    let (tx, rx) = match policy {
        ResizePolicy::Latest => {
            let (tx, rx) = watch::channel(None);
            (SenderKind::Latest(tx), ReceiverKind::Latest(rx))
        }
        ResizePolicy::Rendezvous => {
            let (tx, rx) = mpsc::channel(1);
            (SenderKind::Rendezvous(tx), ReceiverKind::Rendezvous(rx))
        }
    };
    (
        ResizeSender {
            kind: tx,
            lifecycle: lifecycle.clone(),
        },
        ResizeQueue {
            kind: rx,
            lifecycle: lifecycle.clone(),
        },
    )
}

impl ResizeSender {
    /// Offer a size change to the poller.
    ///
    /// # Errors
    /// Returns [`ResizeError::Terminated`] if the session ends first or the
    /// poller is gone.
    pub async fn send(&self, size: TerminalSize) -> Result<(), ResizeError> {
        if self.lifecycle.is_terminated() {
            return Err(ResizeError::Terminated);
        }
        match &self.kind {
            SenderKind::Latest(tx) => {
                tx.send_replace(Some(size));
                Ok(())
            }
            SenderKind::Rendezvous(tx) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let handoff = async {
                    tx.send((size, ack_tx))
                        .await
                        .map_err(|_| ResizeError::Terminated)?;
                    ack_rx.await.map_err(|_| ResizeError::Terminated)
                };
                tokio::select! {
                    biased;
                    () = self.lifecycle.cancelled() => Err(ResizeError::Terminated),
                    res = handoff => res,
                }
            }
        }
    }
}

impl ResizeQueue {
    /// Wait for the next size change.
    ///
    /// Returns `None` once the session has terminated, never stale data.
    pub async fn next_size(&mut self) -> Option<TerminalSize> {
        let lifecycle = self.lifecycle.clone();
        let next = async {
            match &mut self.kind {
                ReceiverKind::Latest(rx) => {
                    rx.changed().await.ok()?;
                    *rx.borrow_and_update()
                }
                ReceiverKind::Rendezvous(rx) => {
                    let (size, ack) = rx.recv().await?;
                    // The producer may have given up already; the size still
                    // counts as delivered here.
                    let _ = ack.send(());
                    Some(size)
                }
            }
        };
        tokio::select! {
            biased;
            () = lifecycle.cancelled() => None,
            size = next => size,
        }
    }
}

#[async_trait]
impl TerminalSizeQueue for ResizeQueue {
    async fn next_size(&mut self) -> Option<TerminalSize> {
        Self::next_size(self).await
    }
}
