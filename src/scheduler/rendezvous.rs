//! Flush rendezvous between the two queues.
//!
//! The handshake has three steps:
//!
//! 1. The event runner, holding pending work, opens a rendezvous and waits.
//! 2. A user-side waiter takes the opening ([`FlushRendezvous::offer`]) and
//!    grants it ([`Flush::complete`]); the event runner drains every queued
//!    event item.
//! 3. The event runner acknowledges; the user side resumes.
//!
//! Taking an opening and granting it are separate steps so that a user-side
//! `select!` can drop an untaken offer without ever leaving a drain half
//! started. Once [`Flush::complete`] has been entered the user side stays
//! parked until the acknowledgement (or shutdown).

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::queue::{current_lane, Lane};
use crate::error::{HostError, Result};

struct Opening {
    begin: oneshot::Sender<()>,
    ack: oneshot::Receiver<()>,
}

/// The handshake object shared by both runners.
pub struct FlushRendezvous {
    openings_tx: mpsc::Sender<Opening>,
    openings_rx: Mutex<mpsc::Receiver<Opening>>,
}

/// An accepted opening, held by the user side.
#[must_use = "dropping a Flush withdraws from the rendezvous"]
pub struct Flush {
    opening: Opening,
}

/// Held by the event runner between the grant and the acknowledgement.
pub struct Draining {
    ack: oneshot::Sender<()>,
}

impl Default for FlushRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushRendezvous {
    pub fn new() -> Self {
        let (openings_tx, openings_rx) = mpsc::channel(1);
        Self {
            openings_tx,
            openings_rx: Mutex::new(openings_rx),
        }
    }

    /// Event side: opens a rendezvous and waits until the user side grants
    /// it. Returns `None` if the connection is dying.
    ///
    /// A grant that is withdrawn before completion reopens automatically.
    pub async fn accept(&self, dying: &CancellationToken) -> Option<Draining> {
        loop {
            let (begin_tx, begin_rx) = oneshot::channel();
            let (ack_tx, ack_rx) = oneshot::channel();
            let opening = Opening {
                begin: begin_tx,
                ack: ack_rx,
            };

            tokio::select! {
                sent = self.openings_tx.send(opening) => {
                    if sent.is_err() {
                        return None;
                    }
                }
                _ = dying.cancelled() => return None,
            }

            tokio::select! {
                granted = begin_rx => {
                    if granted.is_ok() {
                        return Some(Draining { ack: ack_tx });
                    }
                    tracing::trace!("flush offer withdrawn, reopening");
                }
                _ = dying.cancelled() => return None,
            }
        }
    }

    /// User side: waits for the event runner to open a rendezvous.
    ///
    /// Cancel safe. Fails loudly when called from work running on the event
    /// queue, which would otherwise deadlock.
    pub async fn offer(&self) -> Result<Flush> {
        ensure_not_event_lane()?;
        let mut openings = self.openings_rx.lock().await;
        match openings.recv().await {
            Some(opening) => Ok(Flush { opening }),
            None => Err(HostError::ShuttingDown),
        }
    }
}

/// Rejects callers running on the event queue.
pub fn ensure_not_event_lane() -> Result<()> {
    if current_lane() == Some(Lane::Event) {
        tracing::error!("attempt to flush the event queue from the event queue itself");
        return Err(HostError::EventQueueFlush);
    }
    Ok(())
}

impl Flush {
    /// Grants the drain and waits for the event runner's acknowledgement.
    pub async fn complete(self, dying: &CancellationToken) -> Result<()> {
        let Opening { begin, ack } = self.opening;
        if begin.send(()).is_err() {
            // The event runner went away before the grant; nothing to wait for.
            return Ok(());
        }
        tokio::select! {
            _ = ack => Ok(()),
            _ = dying.cancelled() => Err(HostError::ShuttingDown),
        }
    }
}

impl Draining {
    /// Signals that the drain finished.
    pub fn acknowledge(self) {
        let _ = self.ack.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::queue::QUEUE;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handshake_orders_drain_before_ack() {
        let rendezvous = Arc::new(FlushRendezvous::new());
        let dying = CancellationToken::new();
        let drained = Arc::new(AtomicBool::new(false));

        let event = tokio::spawn({
            let rendezvous = rendezvous.clone();
            let dying = dying.clone();
            let drained = drained.clone();
            async move {
                let draining = rendezvous.accept(&dying).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                drained.store(true, Ordering::SeqCst);
                draining.acknowledge();
            }
        });

        let flush = rendezvous.offer().await.unwrap();
        assert!(!drained.load(Ordering::SeqCst));
        flush.complete(&dying).await.unwrap();
        assert!(drained.load(Ordering::SeqCst));
        event.await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawn_offer_reopens() {
        let rendezvous = Arc::new(FlushRendezvous::new());
        let dying = CancellationToken::new();

        let event = tokio::spawn({
            let rendezvous = rendezvous.clone();
            let dying = dying.clone();
            async move {
                let draining = rendezvous.accept(&dying).await.unwrap();
                draining.acknowledge();
            }
        });

        drop(rendezvous.offer().await.unwrap());
        let flush = rendezvous.offer().await.unwrap();
        flush.complete(&dying).await.unwrap();
        event.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_aborts_when_dying() {
        let rendezvous = FlushRendezvous::new();
        let dying = CancellationToken::new();
        dying.cancel();
        assert!(rendezvous.accept(&dying).await.is_none());
    }

    #[tokio::test]
    async fn test_offer_from_event_lane_fails() {
        let rendezvous = FlushRendezvous::new();
        let result = QUEUE.scope(Lane::Event, rendezvous.offer()).await;
        assert!(matches!(result, Err(HostError::EventQueueFlush)));
    }
}
