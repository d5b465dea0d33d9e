//! Registered handler variants and the append-only table that holds them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;

use super::handle::Vim;
use crate::models::CommandFlags;
use crate::scheduler::Lane;

pub const FUNCTION_PREFIX: &str = "function:";
pub const COMMAND_PREFIX: &str = "command:";
pub const AUTOCOMMAND_PREFIX: &str = "autocommand:";
pub const INTERNAL_PREFIX: &str = "internal:";

pub type HandlerFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

pub type FunctionFn = Arc<dyn Fn(Vim, Vec<Value>) -> HandlerFuture<Value> + Send + Sync>;
pub type RangeFunctionFn =
    Arc<dyn Fn(Vim, i64, i64, Vec<Value>) -> HandlerFuture<Value> + Send + Sync>;
pub type CommandFn = Arc<dyn Fn(Vim, CommandFlags, Vec<String>) -> HandlerFuture<()> + Send + Sync>;
pub type AutoCommandFn = Arc<dyn Fn(Vim, Vec<Value>) -> HandlerFuture<()> + Send + Sync>;
pub type InternalFn = Arc<dyn Fn(Vim, Vec<Value>) -> HandlerFuture<Value> + Send + Sync>;

/// One registered callback, tagged by kind.
#[derive(Clone)]
pub enum Handler {
    Function(FunctionFn),
    RangeFunction(RangeFunctionFn),
    Command(CommandFn),
    AutoCommand(AutoCommandFn),
    Internal(InternalFn),
}

impl Handler {
    /// The queue invocations of this handler run on.
    pub fn lane(&self) -> Lane {
        match self {
            Handler::Function(_) | Handler::RangeFunction(_) | Handler::Command(_) => Lane::User,
            Handler::AutoCommand(_) | Handler::Internal(_) => Lane::Event,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Function(_) => "function",
            Handler::RangeFunction(_) => "range function",
            Handler::Command(_) => "command",
            Handler::AutoCommand(_) => "autocommand",
            Handler::Internal(_) => "internal function",
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.kind())
    }
}

/// Handlers by namespaced name. Entries are never removed.
#[derive(Default)]
pub struct HandlerTable {
    entries: Mutex<HashMap<String, Handler>>,
    next_autocmd: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Handler>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `handler` under `name`. Returns false if the name is taken.
    pub fn register(&self, name: &str, handler: Handler) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return false;
        }
        tracing::debug!(name, kind = handler.kind(), "register handler");
        entries.insert(name.to_string(), handler);
        true
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.entries().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Allocates the next anonymous autocommand handle.
    pub fn next_autocmd_handle(&self) -> String {
        let n = self.next_autocmd.fetch_add(1, Ordering::Relaxed);
        format!("{AUTOCOMMAND_PREFIX}{n}")
    }
}

/// Name shown in error replies: functions drop their namespace.
pub fn display_name(handle: &str) -> &str {
    handle.strip_prefix(FUNCTION_PREFIX).unwrap_or(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop(_: Vim, _: Vec<Value>) -> HandlerFuture<Value> {
        async { Ok(Value::Null) }.boxed()
    }

    fn noop_function() -> Handler {
        Handler::Function(Arc::new(noop))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let table = HandlerTable::new();
        assert!(table.register("function:Hello", noop_function()));
        assert!(!table.register("function:Hello", noop_function()));
        assert_eq!(table.len(), 1);
        assert!(table.get("function:Hello").is_some());
        assert!(table.get("function:Missing").is_none());
    }

    #[test]
    fn test_autocmd_handles_are_sequential() {
        let table = HandlerTable::new();
        assert_eq!(table.next_autocmd_handle(), "autocommand:0");
        assert_eq!(table.next_autocmd_handle(), "autocommand:1");
    }

    #[test]
    fn test_lanes() {
        assert_eq!(noop_function().lane(), Lane::User);
        let internal = Handler::Internal(Arc::new(noop));
        assert_eq!(internal.lane(), Lane::Event);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("function:Hello"), "Hello");
        assert_eq!(display_name("command:Go"), "command:Go");
    }
}
