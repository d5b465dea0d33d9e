//! Queue runners.
//!
//! Each runner owns one queue and executes its items one at a time inside a
//! [`QUEUE`] scope, so work can tell which queue it is on.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::isolate::catch_panic;
use super::queue::{Lane, WorkItem, QUEUE};
use super::Scheduler;
use crate::error::{HostError, Result};

async fn run_item(item: WorkItem) {
    let WorkItem { lane, label, work } = item;
    tracing::trace!(%lane, %label, "run work");
    if let Err(report) = catch_panic(work).await {
        tracing::error!(%lane, %label, panic = %report, "work item panicked");
    }
}

/// Drains the event queue once per flush rendezvous. Each drain runs the
/// items queued when it began and nothing pushed after.
pub async fn run_event_queue(scheduler: Arc<Scheduler>, dying: CancellationToken) -> Result<()> {
    let queue = scheduler.queue(Lane::Event);
    QUEUE
        .scope(Lane::Event, async move {
            loop {
                tokio::select! {
                    _ = queue.ready() => {}
                    _ = dying.cancelled() => return Err(HostError::ShuttingDown),
                }
                let Some(draining) = scheduler.rendezvous().accept(&dying).await else {
                    return Err(HostError::ShuttingDown);
                };

                // Only what was queued when the drain began; later arrivals
                // wait for the next flush.
                let batch = queue.take_all();
                let drained = batch.len();
                for item in batch {
                    run_item(item).await;
                }
                tracing::trace!(drained, "event queue drained");
                draining.acknowledge();
            }
        })
        .await
}

/// Runs user work, yielding to the event queue whenever it asks to drain.
///
/// When both a flush and a user item are ready the choice between them is
/// random, so neither queue can starve the other.
pub async fn run_user_queue(scheduler: Arc<Scheduler>, dying: CancellationToken) -> Result<()> {
    let queue = scheduler.queue(Lane::User);
    QUEUE
        .scope(Lane::User, async move {
            loop {
                tokio::select! {
                    _ = dying.cancelled() => return Err(HostError::ShuttingDown),
                    flush = scheduler.rendezvous().offer() => flush?.complete(&dying).await?,
                    item = queue.next() => run_item(item).await,
                }
            }
        })
        .await
}
