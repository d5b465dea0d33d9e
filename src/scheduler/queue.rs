//! Work queue primitive.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;

/// Which of the two queues a piece of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Ordinary function and command invocations.
    User,
    /// Editor events, scheduled callbacks and internal functions.
    Event,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::User => f.write_str("user"),
            Lane::Event => f.write_str("event"),
        }
    }
}

tokio::task_local! {
    /// The lane whose runner is executing the current task's work.
    pub static QUEUE: Lane;
}

/// The lane the caller is running on, if any.
pub fn current_lane() -> Option<Lane> {
    QUEUE.try_with(|lane| *lane).ok()
}

/// One deferred inbound dispatch.
pub struct WorkItem {
    pub lane: Lane,
    pub label: String,
    pub work: BoxFuture<'static, ()>,
}

impl WorkItem {
    pub fn new<F>(lane: Lane, label: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            lane,
            label: label.into(),
            work: work.boxed(),
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("lane", &self.lane)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// FIFO of work items with a "has work" signal.
///
/// Single consumer: only the lane's runner takes items off.
pub struct WorkQueue {
    lane: Lane,
    items: Mutex<VecDeque<WorkItem>>,
    has_work: Notify,
}

impl WorkQueue {
    pub fn new(lane: Lane) -> Self {
        Self {
            lane,
            items: Mutex::new(VecDeque::new()),
            has_work: Notify::new(),
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: WorkItem) {
        debug_assert_eq!(item.lane, self.lane);
        tracing::trace!(lane = %self.lane, label = %item.label, "queue work");
        self.items().push_back(item);
        self.has_work.notify_one();
    }

    pub fn pop(&self) -> Option<WorkItem> {
        self.items().pop_front()
    }

    /// Takes every item queued right now. Items pushed afterwards stay queued.
    pub fn take_all(&self) -> VecDeque<WorkItem> {
        std::mem::take(&mut *self.items())
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Resolves once the queue holds at least one item, without taking it.
    pub async fn ready(&self) {
        while self.is_empty() {
            self.has_work.notified().await;
        }
    }

    /// Takes the next item, waiting for one if the queue is empty.
    ///
    /// Cancel safe: an item is only removed once it is returned.
    pub async fn next(&self) -> WorkItem {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.has_work.notified().await;
        }
    }
}
