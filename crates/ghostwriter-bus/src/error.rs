use std::{io::Error as IoError, result::Result as StdResult};

use thiserror::Error;

/// The main error type for bus operations (broker and client).
#[derive(Error, Debug)]
pub enum Error {
    /// All connect attempts to the broker were exhausted.
    #[error("failed to connect to broker at {addr} after {attempts} attempts: {last}")]
    Connect {
        /// Broker address that was tried.
        addr: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final connect error.
        last: IoError,
    },

    /// IO-related errors on an established connection.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The connection task has gone away; the client can no longer
    /// publish or subscribe.
    #[error("bus connection closed")]
    ConnectionClosed,

    /// A peer violated the wire protocol (e.g. no `hello` first).
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io(e),
            other => Self::Codec(other.to_string()),
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = StdResult<T, Error>;
