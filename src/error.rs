//! Host error taxonomy.
//!
//! Every fault the engine can produce falls into one of these buckets. The
//! supervisor and the top-level `run` use [`HostError::is_benign`] to decide
//! whether a fault is an orderly shutdown or something to surface.

use thiserror::Error;

/// Errors produced by the plugin host.
#[derive(Error, Debug)]
pub enum HostError {
    /// Framing or decoding failure, or a desynchronised conversation with the
    /// editor. Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The editor closed the stream. Orderly shutdown, never surfaced.
    #[error("end of stream")]
    StreamEnd,

    /// A dispatched handler failed or panicked.
    #[error("{0}")]
    Handler(String),

    /// Invalid arguments to a define operation. Nothing was sent on the wire.
    #[error("{0}")]
    Validation(String),

    /// The editor answered an outbound call with error text.
    #[error("failed to {context} in Vim: {message}")]
    Remote { context: String, message: String },

    /// The operation was abandoned because the connection is going away.
    #[error("host shutting down")]
    ShuttingDown,

    /// Work running on the event queue tried to offer the flush rendezvous.
    #[error("attempt to flush the event queue from the event queue itself")]
    EventQueueFlush,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl HostError {
    /// Builds a protocol error from anything displayable.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Builds a validation error from anything displayable.
    pub fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    /// True for faults that represent an orderly shutdown.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::StreamEnd | Self::ShuttingDown)
    }
}

/// Result alias used across the crate.
pub type Result<T, E = HostError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_format() {
        let err = HostError::Remote {
            context: "ex(echo x)".into(),
            message: "E121: Undefined variable: x".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to ex(echo x) in Vim: E121: Undefined variable: x"
        );
    }

    #[test]
    fn test_benign_errors() {
        assert!(HostError::StreamEnd.is_benign());
        assert!(HostError::ShuttingDown.is_benign());
        assert!(!HostError::protocol("bad frame").is_benign());
        assert!(!HostError::validation("bad name").is_benign());
    }
}
