//! Error types for the stream bridges.

use std::io;

use thiserror::Error;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the push side of a bridge or reported to its
/// exception handler.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The underlying OS pipe or channel failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The blocking side was closed while the push side was still active.
    #[error("stream has closed")]
    Closed,

    /// A write was attempted after `end()`.
    #[error("write after end")]
    Ended,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether this error is terminal for the stream it was raised on.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Closed | Self::Ended)
    }
}

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io(e) => e,
            BridgeError::Closed | BridgeError::Ended => {
                io::Error::new(io::ErrorKind::BrokenPipe, err)
            }
            BridgeError::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}
