//! Supervision group for one connection.
//!
//! Tracks the long-lived tasks (read loop, queue runners, handshake) and
//! turns the first failure of any of them into group-wide cancellation.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{HostError, Result};
use crate::scheduler::isolate::catch_panic;

#[derive(Default)]
struct Inner {
    dying: CancellationToken,
    tasks: TaskTracker,
    fault: Mutex<Option<HostError>>,
}

/// A cheaply cloneable handle on the supervision group.
#[derive(Clone, Default)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn fault(&self) -> MutexGuard<'_, Option<HostError>> {
        self.inner.fault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token that fires once the group starts dying.
    pub fn dying(&self) -> &CancellationToken {
        &self.inner.dying
    }

    pub fn is_dying(&self) -> bool {
        self.inner.dying.is_cancelled()
    }

    /// Starts tearing the group down.
    ///
    /// A non-benign `reason` is recorded unless an earlier fault already was.
    pub fn kill(&self, reason: Option<HostError>) {
        if let Some(err) = reason {
            if err.is_benign() {
                tracing::debug!(reason = %err, "supervision group stopping");
            } else {
                let mut fault = self.fault();
                if fault.is_none() {
                    tracing::error!(error = %err, "supervision group failed");
                    *fault = Some(err);
                } else {
                    tracing::debug!(error = %err, "ignoring fault after the first");
                }
            }
        }
        self.inner.dying.cancel();
    }

    /// Runs `fut` as a member of the group.
    ///
    /// Returning `Ok` leaves the group alone. An error or a panic kills it.
    pub fn go<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let supervisor = self.clone();
        self.inner.tasks.spawn(async move {
            tracing::debug!(task = name, "task started");
            match catch_panic(fut).await {
                Ok(Ok(())) => tracing::debug!(task = name, "task finished"),
                Ok(Err(HostError::ShuttingDown)) => {
                    tracing::debug!(task = name, "task stopped for shutdown");
                }
                Ok(Err(err)) => {
                    tracing::debug!(task = name, error = %err, "task failed");
                    supervisor.kill(Some(err));
                }
                Err(report) => {
                    supervisor.kill(Some(HostError::Handler(format!(
                        "task {name} {report}"
                    ))));
                }
            }
        });
    }

    /// Waits until the group is dying and every member has returned, then
    /// yields the first recorded fault.
    pub async fn wait(&self) -> Option<HostError> {
        self.inner.dying.cancelled().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.fault().take()
    }
}
