//! Protocol engine.
//!
//! One [`Engine`] serves one editor connection: it owns the callback
//! registry, the handler table, both queues and the supervision group, and
//! drives the read loop and the load handshake until the connection ends.
//!
//! ```no_run
//! use vimbridge::engine::{Engine, Plugin, Vim};
//! use vimbridge::wire::Backend;
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Greeter {
//!     async fn init(&self, vim: Vim) -> anyhow::Result<()> {
//!         vim.define_function("Hello", None, |_vim, _args| async {
//!             Ok(serde_json::json!("World"))
//!         })
//!         .await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn serve() -> vimbridge::error::Result<()> {
//! Engine::new(Backend::stdio(), Greeter).run().await
//! # }
//! ```

mod define;
mod dispatch;
mod handle;
mod handlers;
mod handshake;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use tokio::sync::watch;

use crate::error::{HostError, Result};
use crate::models::Flavor;
use crate::registry::CallbackRegistry;
use crate::scheduler::{isolate, runner, Scheduler};
use crate::supervisor::Supervisor;
use crate::wire::{Backend, BackendKind, FrameStream, Wire};

pub use handle::{Completion, Vim};
pub use handlers::{
    Handler, HandlerTable, AUTOCOMMAND_PREFIX, COMMAND_PREFIX, FUNCTION_PREFIX, INTERNAL_PREFIX,
};

/// The collaborator served by the host.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called once the editor has loaded the host, before `initcomplete`.
    /// Definitions made here are in place before the editor continues.
    async fn init(&self, vim: Vim) -> anyhow::Result<()>;

    /// Called exactly once when the connection ends, whatever the cause.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Connected,
    Loaded,
    Initialized,
    ShutDown,
}

/// What the identity probe learned about the editor.
#[derive(Debug, Clone)]
pub(crate) struct EditorIdentity {
    pub flavor: Flavor,
    pub version: String,
}

pub(crate) type ScheduledFn = Box<dyn FnOnce(Vim) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// State shared by every task and handle of one connection.
pub(crate) struct Shared {
    pub instance: String,
    pub backend: BackendKind,
    pub wire: Arc<dyn Wire>,
    pub registry: CallbackRegistry,
    pub scheduler: Arc<Scheduler>,
    pub supervisor: Supervisor,
    pub handlers: HandlerTable,
    pub scheduled: Mutex<HashMap<u64, ScheduledFn>>,
    pub next_schedule_id: AtomicU64,
    pub phase: watch::Sender<Phase>,
    pub identity: OnceCell<EditorIdentity>,
}

impl Shared {
    fn new(backend: BackendKind, wire: Arc<dyn Wire>) -> Self {
        let (phase, _) = watch::channel(Phase::Connected);
        Self {
            instance: format!("#{}", NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)),
            backend,
            registry: CallbackRegistry::new(wire.clone()),
            wire,
            scheduler: Arc::new(Scheduler::new()),
            supervisor: Supervisor::new(),
            handlers: HandlerTable::new(),
            scheduled: Mutex::new(HashMap::new()),
            next_schedule_id: AtomicU64::new(1),
            phase,
            identity: OnceCell::new(),
        }
    }

    pub fn scheduled(&self) -> MutexGuard<'_, HashMap<u64, ScheduledFn>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_phase(&self, phase: Phase) {
        tracing::debug!(instance = %self.instance, ?phase, "phase reached");
        self.phase.send_replace(phase);
    }

    /// Waits until `phase` has been reached.
    ///
    /// Gives up with [`HostError::ShuttingDown`] if the connection starts
    /// dying first, except when waiting for [`Phase::ShutDown`] itself.
    pub async fn wait_phase(&self, phase: Phase) -> Result<()> {
        let mut rx = self.phase.subscribe();
        if phase == Phase::ShutDown {
            return rx
                .wait_for(|p| *p >= phase)
                .await
                .map(|_| ())
                .map_err(|_| HostError::ShuttingDown);
        }
        let dying = self.supervisor.dying();
        tokio::select! {
            biased;
            reached = rx.wait_for(|p| *p >= phase) => {
                reached.map(|_| ()).map_err(|_| HostError::ShuttingDown)
            }
            _ = dying.cancelled() => Err(HostError::ShuttingDown),
        }
    }
}

/// A host bound to one editor connection.
pub struct Engine {
    shared: Arc<Shared>,
    frames: FrameStream,
    plugin: Arc<dyn Plugin>,
}

impl Engine {
    pub fn new(backend: Backend, plugin: impl Plugin) -> Self {
        let Backend { kind, wire, frames } = backend;
        Self {
            shared: Arc::new(Shared::new(kind, wire)),
            frames,
            plugin: Arc::new(plugin),
        }
    }

    /// A user-lane handle, usable before and during [`Engine::run`].
    pub fn vim(&self) -> Vim {
        Vim::user(self.shared.clone())
    }

    /// Serves the connection until it ends.
    ///
    /// The plugin's `shutdown` runs exactly once afterwards. Returns the
    /// first fault that brought the connection down, otherwise the result of
    /// `shutdown`. End of input is a clean exit.
    pub async fn run(self) -> Result<()> {
        let Engine {
            shared,
            frames,
            plugin,
        } = self;
        isolate::install_panic_hook();
        tracing::info!(instance = %shared.instance, backend = %shared.backend, "host starting");

        let supervisor = shared.supervisor.clone();
        let dying = supervisor.dying().clone();
        supervisor.go("read loop", dispatch::read_loop(shared.clone(), frames));
        supervisor.go(
            "event queue",
            runner::run_event_queue(shared.scheduler.clone(), dying.clone()),
        );
        supervisor.go(
            "user queue",
            runner::run_user_queue(shared.scheduler.clone(), dying),
        );
        supervisor.go("handshake", handshake::run(shared.clone(), plugin.clone()));

        let fault = supervisor.wait().await;
        shared.registry.abandon_all();
        shared.scheduled().clear();

        let shutdown = plugin.shutdown().await;
        shared.set_phase(Phase::ShutDown);
        if let Err(e) = shared.wire.close().await {
            tracing::debug!(error = %e, "closing wire failed");
        }

        match fault {
            Some(fault) => {
                tracing::error!(instance = %shared.instance, error = %fault, "host stopped");
                if let Err(e) = shutdown {
                    tracing::warn!(error = %format!("{e:#}"), "plugin shutdown failed");
                }
                Err(fault)
            }
            None => {
                tracing::info!(instance = %shared.instance, "host stopped");
                shutdown.map_err(|e| HostError::Handler(format!("plugin shutdown failed: {e:#}")))
            }
        }
    }
}
