//! The handle collaborators use to talk to the editor.

use std::backtrace::Backtrace;
use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::{Phase, Shared};
use crate::error::{HostError, Result};
use crate::models::Flavor;
use crate::scheduler::rendezvous::ensure_not_event_lane;
use crate::scheduler::{isolate, Lane, WorkItem};
use crate::wire::{BackendKind, CallbackResponse};

/// A handle on one editor connection.
///
/// Every handle belongs to a lane. User handles keep the event queue moving
/// while they wait on the editor; event handles, given to autocommand and
/// scheduled work, wait directly.
#[derive(Clone)]
pub struct Vim {
    pub(crate) shared: Arc<Shared>,
    lane: Lane,
}

impl fmt::Debug for Vim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vim")
            .field("instance", &self.shared.instance)
            .field("lane", &self.lane)
            .finish()
    }
}

/// Signals that a piece of enqueued or scheduled work has returned.
pub struct Completion {
    shared: Arc<Shared>,
    done: oneshot::Receiver<()>,
}

impl Completion {
    /// Waits for the work to return.
    ///
    /// Called from the user queue, the wait keeps offering the flush
    /// rendezvous so the work itself can run.
    pub async fn wait(self) -> Result<()> {
        let dying = self.shared.supervisor.dying();
        self.shared
            .scheduler
            .wait_with_flush(self.done, dying)
            .await?
            .map_err(|_| HostError::ShuttingDown)
    }
}

impl Vim {
    pub(crate) fn user(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            lane: Lane::User,
        }
    }

    pub(crate) fn event(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            lane: Lane::Event,
        }
    }

    pub(crate) fn on_lane(shared: Arc<Shared>, lane: Lane) -> Self {
        Self { shared, lane }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// The user-queue handle for this connection.
    pub fn sync(&self) -> Vim {
        Vim::user(self.shared.clone())
    }

    /// The event-queue handle for this connection.
    pub fn scheduled(&self) -> Vim {
        Vim::event(self.shared.clone())
    }

    pub fn backend(&self) -> BackendKind {
        self.shared.backend
    }

    /// Connection id used to tag log lines, like `#1`.
    pub fn instance(&self) -> &str {
        &self.shared.instance
    }

    /// Editor flavor, known once the host has loaded.
    pub fn flavor(&self) -> Flavor {
        self.shared
            .identity
            .get()
            .map(|id| id.flavor)
            .unwrap_or_default()
    }

    /// Editor version, known once the host has loaded.
    pub fn version(&self) -> String {
        self.shared
            .identity
            .get()
            .map(|id| id.version.clone())
            .unwrap_or_default()
    }

    /// Resolves once the editor has loaded the host.
    pub async fn loaded(&self) -> Result<()> {
        self.shared.wait_phase(Phase::Loaded).await
    }

    /// Resolves once the plugin's init has completed.
    pub async fn initialized(&self) -> Result<()> {
        self.shared.wait_phase(Phase::Initialized).await
    }

    /// Resolves once the connection has shut down completely.
    pub async fn shut_down(&self) -> Result<()> {
        self.shared.wait_phase(Phase::ShutDown).await
    }

    /// Runs an ex command.
    pub async fn ex(&self, cmd: &str) -> Result<()> {
        let resp = self.call_editor("ex", vec![json!(cmd)]).await?;
        check(resp, || format!("ex({cmd})")).map(drop)
    }

    /// Evaluates an expression and returns its value.
    pub async fn expr(&self, expr: &str) -> Result<Value> {
        let resp = self.call_editor("expr", vec![json!(expr)]).await?;
        check(resp, || format!("expr({expr})"))
    }

    /// Executes keys in normal mode.
    pub async fn normal(&self, keys: &str) -> Result<()> {
        let resp = self.call_editor("normal", vec![json!(keys)]).await?;
        check(resp, || format!("normal({keys})")).map(drop)
    }

    /// Calls an editor function and returns its result.
    pub async fn call(&self, func: &str, args: Vec<Value>) -> Result<Value> {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(json!(func));
        call_args.extend(args);
        let resp = self.call_editor("call", call_args).await?;
        check(resp, || format!("call({func})"))
    }

    /// Redraws the screen, clearing it first when `force` is set.
    pub async fn redraw(&self, force: bool) -> Result<()> {
        let arg = if force { "force" } else { "" };
        let resp = self.call_editor("redraw", vec![json!(arg)]).await?;
        check(resp, || format!("redraw (force = {force})")).map(drop)
    }

    /// Reports an unrecoverable error; the connection shuts down with it.
    pub fn errorf(&self, msg: impl fmt::Display) {
        let trace = Backtrace::force_capture();
        self.shared
            .supervisor
            .kill(Some(HostError::Handler(format!("{msg}\n{trace}"))));
    }

    /// Writes a diagnostic line tagged with the connection id.
    pub fn log(&self, msg: impl fmt::Display) {
        tracing::info!(instance = %self.shared.instance, "{msg}");
    }

    /// Queues `f` on the event queue without involving the editor.
    ///
    /// An error returned by `f` is fatal for the connection.
    pub fn enqueue<F, Fut>(&self, f: F) -> Completion
    where
        F: FnOnce(Vim) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let vim = self.scheduled();
        let supervisor = self.shared.supervisor.clone();
        self.shared
            .scheduler
            .push(WorkItem::new(Lane::Event, "enqueue", async move {
                if let Err(e) = isolate::guarded(f(vim)).await {
                    supervisor.kill(Some(HostError::Handler(format!(
                        "enqueued work failed: {e:#}"
                    ))));
                }
                let _ = done_tx.send(());
            }));
        Completion {
            shared: self.shared.clone(),
            done: done_rx,
        }
    }

    /// Runs `f` on the event queue once the editor says it is safe to.
    ///
    /// Must not be called from the event queue.
    pub async fn schedule<F, Fut>(&self, f: F) -> Result<Completion>
    where
        F: FnOnce(Vim) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.lane == Lane::Event {
            tracing::error!("attempt to schedule work on the event queue from the event queue itself");
            return Err(HostError::EventQueueFlush);
        }
        ensure_not_event_lane()?;

        let (done_tx, done_rx) = oneshot::channel();
        let id = self.shared.next_schedule_id.fetch_add(1, Ordering::Relaxed);
        self.shared.scheduled().insert(
            id,
            Box::new(move |vim: Vim| {
                async move {
                    let result = f(vim).await;
                    let _ = done_tx.send(());
                    result
                }
                .boxed()
            }),
        );

        let resp = match self.call_editor("schedule", vec![json!(id)]).await {
            Ok(resp) => resp,
            Err(e) => {
                self.shared.scheduled().remove(&id);
                return Err(e);
            }
        };
        if let Err(e) = check(resp, || format!("schedule({id})")) {
            self.shared.scheduled().remove(&id);
            return Err(e);
        }
        Ok(Completion {
            shared: self.shared.clone(),
            done: done_rx,
        })
    }

    /// Issues an editor call once the host is loaded.
    pub(crate) async fn call_editor(&self, kind: &str, args: Vec<Value>) -> Result<CallbackResponse> {
        self.shared.wait_phase(Phase::Loaded).await?;
        self.raw_call(kind, args).await
    }

    /// Issues an editor call without waiting for the load handshake.
    pub(crate) async fn raw_call(&self, kind: &str, args: Vec<Value>) -> Result<CallbackResponse> {
        let pending = self.shared.registry.issue(kind, args).await?;
        let dying = self.shared.supervisor.dying();
        match self.lane {
            Lane::User => self
                .shared
                .scheduler
                .wait_with_flush(pending.into_slot(), dying)
                .await?
                .map_err(|_| HostError::ShuttingDown),
            Lane::Event => pending.wait(dying).await,
        }
    }
}

/// Turns an editor response into a value or a [`HostError::Remote`].
pub(crate) fn check(resp: CallbackResponse, context: impl FnOnce() -> String) -> Result<Value> {
    if resp.is_err() {
        return Err(HostError::Remote {
            context: context(),
            message: resp.error,
        });
    }
    Ok(resp.value)
}
