//! Shared error types for the Strata memory store.

use thiserror::Error;

/// Top-level error type for the Strata memory store.
#[derive(Error, Debug)]
pub enum StrataError {
    /// A database statement failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// Creating a base record or its detail row failed; the transaction was rolled back.
    #[error("Creation failed: {0}")]
    CreationFailed(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (e.g. a vector with the wrong dimensionality).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The source lookup collaborator failed.
    #[error("Source lookup failed: {0}")]
    SourceLookup(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred (poisoned lock, join failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with StrataError.
pub type StrataResult<T> = Result<T, StrataError>;
