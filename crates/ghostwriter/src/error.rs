//! Error type for the binary: one wrapper over the per-process errors.

use thiserror::Error;

/// The main error type for the `ghostwriter` binary.
#[derive(Error, Debug)]
pub enum Error {
    /// Process or socket level IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus connection failure.
    #[error(transparent)]
    Bus(#[from] ghostwriter_bus::Error),

    /// State store failure.
    #[error(transparent)]
    State(#[from] statestore::Error),

    /// Listener failure.
    #[error(transparent)]
    Listener(#[from] listener::Error),

    /// Playback engine failure.
    #[error(transparent)]
    Typer(#[from] playback::Error),

    /// A payload could not be encoded for printing.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
