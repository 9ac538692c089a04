use std::io;
use thiserror::Error;

/// Errors returned by the codec and connection layers.
///
/// Framing violations (`InvalidFormat`, `InvalidMessageLength`,
/// `PacketParsingTimeout`) always terminate the call that hit them. Only
/// `Transport` failures are recoverable: in reliable mode the connection
/// handles them by reconnecting through the failover loop.
#[derive(Error, Debug)]
pub enum StompError {
    /// The frame violates the command/header/body grammar.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
    /// The declared `content-length` does not match the actual body bytes,
    /// or the terminator after the body is not NUL.
    #[error("invalid content length received")]
    InvalidMessageLength,
    /// A partially received frame did not complete within the read timeout.
    #[error("packet parsing timeout")]
    PacketParsingTimeout,
    /// The reconnect attempt budget is spent. Fatal, non-retryable.
    #[error("max number of reconnection attempts reached")]
    MaxReconnectAttemptsReached,
    /// Underlying connect/read/write failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The peer broke the protocol contract (e.g. no CONNECTED reply), or a
    /// frame is missing a header an operation requires.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A configuration option could not be applied.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The connection was closed by an explicit disconnect.
    #[error("connection closed")]
    Closed,
}

impl StompError {
    /// Whether the reliable-mode retry loop may handle this error by
    /// reconnecting. Framing and protocol violations are never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StompError::Transport(_))
    }
}
