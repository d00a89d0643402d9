//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] rowcast_core::Error),

    /// Malformed command or event encoding.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The dispatcher task is gone.
    #[error("dispatcher closed")]
    DispatcherClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
