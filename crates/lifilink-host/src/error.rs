//! Host runtime errors.

use std::path::PathBuf;

use lifilink_core::EngineError;
use thiserror::Error;

/// Errors that stop the host runtime.
///
/// Recoverable engine errors (bad frames, replays, auth failures) never get
/// here; the driver logs them and keeps reading.
#[derive(Debug, Error)]
pub enum HostError {
    /// Reading or writing the transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine reported a fatal condition.
    #[error("link stopped: {0}")]
    Engine(#[from] EngineError),

    /// The key cache could not be read or written.
    #[error("key cache {}: {reason}", path.display())]
    Cache {
        /// Cache file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Invalid command-line or runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
