//! Error types for sessionlens-core

use thiserror::Error;

/// Main error type for the sessionlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Statistics aggregation error
    #[error("aggregation error: {0}")]
    Aggregation(String),
}

/// Result type alias for sessionlens-core
pub type Result<T> = std::result::Result<T, Error>;
