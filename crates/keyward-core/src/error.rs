//! Error types for the core library.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Account store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Key or value transform failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No tokio runtime was available to host the notification dispatcher.
    #[error("Runtime error: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// Background account task panicked or was aborted.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
