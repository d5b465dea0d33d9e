//! Dual-queue scheduler.
//!
//! Inbound dispatches are queued on one of two lanes. The event lane only
//! drains when the user lane lets it, through the [`FlushRendezvous`]; user
//! work blocked on the editor keeps offering that rendezvous so events queued
//! in the meantime are not starved.

pub mod isolate;
pub mod queue;
pub mod rendezvous;
pub mod runner;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{HostError, Result};

pub use queue::{current_lane, Lane, WorkItem, WorkQueue};
pub use rendezvous::FlushRendezvous;

/// Both queues plus the rendezvous that orders them.
pub struct Scheduler {
    user: Arc<WorkQueue>,
    event: Arc<WorkQueue>,
    rendezvous: FlushRendezvous,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            user: Arc::new(WorkQueue::new(Lane::User)),
            event: Arc::new(WorkQueue::new(Lane::Event)),
            rendezvous: FlushRendezvous::new(),
        }
    }

    pub fn queue(&self, lane: Lane) -> Arc<WorkQueue> {
        match lane {
            Lane::User => self.user.clone(),
            Lane::Event => self.event.clone(),
        }
    }

    pub fn rendezvous(&self) -> &FlushRendezvous {
        &self.rendezvous
    }

    /// Queues `item` on the lane it was bound to.
    pub fn push(&self, item: WorkItem) {
        match item.lane {
            Lane::User => self.user.push(item),
            Lane::Event => self.event.push(item),
        }
    }

    /// Waits for `fut`, giving up when `dying` fires.
    ///
    /// On the user lane the wait keeps offering the flush rendezvous so the
    /// event queue drains while the caller is blocked.
    pub async fn wait_with_flush<F: Future>(
        &self,
        fut: F,
        dying: &CancellationToken,
    ) -> Result<F::Output> {
        tokio::pin!(fut);
        if current_lane() != Some(Lane::User) {
            return tokio::select! {
                out = &mut fut => Ok(out),
                _ = dying.cancelled() => Err(HostError::ShuttingDown),
            };
        }
        loop {
            tokio::select! {
                biased;
                out = &mut fut => return Ok(out),
                _ = dying.cancelled() => return Err(HostError::ShuttingDown),
                flush = self.rendezvous.offer() => flush?.complete(dying).await?,
            }
        }
    }
}
