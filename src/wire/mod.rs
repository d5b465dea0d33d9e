//! Wire codecs and backend adapters.
//!
//! Two interchangeable backends implement the same logical contract:
//!
//! - [`channel`]: Vim's JSON channel protocol, one `[id, payload]` array per
//!   line over stdin/stdout.
//! - [`rpc`]: Neovim's msgpack-RPC request/response/notification model over a
//!   socket.
//!
//! Each backend is split into a write half implementing [`Wire`] (shared by
//! every task that sends) and a receive loop exposed as a [`FrameStream`]
//! (owned by the engine's read loop). The stream ends cleanly at end of
//! input; any other decoding failure is yielded as [`HostError::Protocol`].

pub mod channel;
pub mod rpc;
pub mod value;

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{HostError, Result};

/// Identifier of one outstanding host-originated call.
pub type CallId = u64;

/// Identifier the editor attached to one of its own calls; the reply must
/// carry it back.
pub type ReplyId = u64;

/// A stream of decoded inbound frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound>> + Send>>;

/// The editor's answer to a host-originated call.
///
/// Exactly one side is meaningful: a non-empty `error` signals failure and
/// `value` is then ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallbackResponse {
    pub error: String,
    pub value: Value,
}

impl CallbackResponse {
    /// A successful response carrying `value`.
    pub fn ok(value: Value) -> Self {
        Self {
            error: String::new(),
            value,
        }
    }

    /// A failed response carrying `error`.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            value: Value::Null,
        }
    }

    pub fn is_err(&self) -> bool {
        !self.error.is_empty()
    }
}

/// A decoded inbound frame, independent of backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to a host-originated call.
    Callback {
        id: CallId,
        response: CallbackResponse,
    },
    /// The editor invoking a defined function, command or autocommand.
    ///
    /// `name` carries the kind namespace (`function:Hello`, `command:Foo`,
    /// `autocommand:3`); `args` is everything after the name, still raw.
    Function {
        reply: ReplyId,
        name: String,
        args: Vec<Value>,
    },
    /// The editor signalling that a scheduled callback may run now.
    Schedule { reply: ReplyId, id: u64 },
    /// Diagnostic output from the editor side of the plugin.
    Log(Vec<Value>),
}

/// Write half of a backend.
#[async_trait]
pub trait Wire: Send + Sync {
    /// Transmits a host-originated call of `kind` tagged with `id`.
    async fn issue_call(&self, id: CallId, kind: &str, args: Vec<Value>) -> Result<()>;

    /// Answers the editor-originated call identified by `reply`.
    async fn send_response(&self, reply: ReplyId, response: CallbackResponse) -> Result<()>;

    /// Flushes and shuts down the write half.
    async fn close(&self) -> Result<()>;
}

/// Which wire protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Vim JSON channel over stdin/stdout.
    #[default]
    Channel,
    /// Neovim msgpack-RPC over a socket.
    Rpc,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Channel => f.write_str("channel"),
            BackendKind::Rpc => f.write_str("rpc"),
        }
    }
}

/// A connected backend: the shared write half plus the receive loop.
pub struct Backend {
    pub kind: BackendKind,
    pub wire: Arc<dyn Wire>,
    pub frames: FrameStream,
}

impl Backend {
    /// Builds a JSON channel backend over arbitrary streams.
    pub fn channel<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            kind: BackendKind::Channel,
            wire: Arc::new(channel::ChannelWire::new(writer)),
            frames: channel::receive_loop(reader),
        }
    }

    /// Builds a msgpack-RPC backend over arbitrary streams.
    pub fn rpc<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            kind: BackendKind::Rpc,
            wire: Arc::new(rpc::RpcWire::new(writer)),
            frames: rpc::receive_loop(reader),
        }
    }

    /// Channel backend over the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::channel(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Rpc backend over a Neovim listen socket.
    #[cfg(unix)]
    pub async fn connect_socket(path: &Path) -> Result<Self> {
        tracing::debug!(socket = %path.display(), "Connecting to editor socket");
        let stream = tokio::net::UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        tracing::info!(socket = %path.display(), "Connected to editor socket");
        Ok(Self::rpc(reader, writer))
    }

    #[cfg(not(unix))]
    pub async fn connect_socket(path: &Path) -> Result<Self> {
        Err(HostError::protocol(format!(
            "socket backends are only supported on unix: {}",
            path.display()
        )))
    }
}

/// Interprets a decoded value as a non-negative integer id.
pub(crate) fn parse_id(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| HostError::protocol(format!("expected {what} to be an id, got {value}")))
}

/// Interprets a decoded value as a string.
pub(crate) fn parse_str<'a>(value: &'a Value, what: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| HostError::protocol(format!("expected {what} to be a string, got {value}")))
}
