//! Error types for secure-stream.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::engine::EngineError;

/// Which guarded operation a nested-call error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Authenticate,
    Renegotiate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Authenticate => "authenticate",
            Operation::Renegotiate => "renegotiate",
        };
        f.write_str(name)
    }
}

/// Main error type for all secure stream operations.
///
/// The type is `Clone` so that a captured failure can be replayed by every
/// later call on a faulted stream.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The handshake engine rejected input or failed to produce output.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Protocol violation observed by the stream itself (EOF mid-frame, refused renegotiation).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call is not valid in the stream's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Another operation of the same kind is already in flight.
    #[error("invalid nested call: a {0} operation is already in progress")]
    NestedCall(Operation),

    /// The stream has not completed a handshake.
    #[error("stream is not authenticated")]
    NotAuthenticated,

    /// The operation was cancelled at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// The stream has been disposed.
    #[error("stream has been disposed")]
    Disposed,
}

impl StreamError {
    /// Whether this error puts the stream into the faulted state.
    ///
    /// Usage errors are reported to the caller but leave the stream intact.
    pub fn is_sticky(&self) -> bool {
        match self {
            StreamError::Io(_)
            | StreamError::Engine(_)
            | StreamError::Protocol(_)
            | StreamError::Cancelled => true,
            StreamError::InvalidState(_)
            | StreamError::NestedCall(_)
            | StreamError::NotAuthenticated
            | StreamError::Disposed => false,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(Arc::new(err))
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            StreamError::Io(inner) => inner.kind(),
            StreamError::Engine(_) | StreamError::Protocol(_) => ErrorKind::InvalidData,
            StreamError::InvalidState(_)
            | StreamError::NestedCall(_)
            | StreamError::NotAuthenticated => ErrorKind::Other,
            StreamError::Cancelled => ErrorKind::Interrupted,
            StreamError::Disposed => ErrorKind::NotConnected,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
