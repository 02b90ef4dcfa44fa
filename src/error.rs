//! Error types for AllyKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using AllyError
pub type Result<T> = std::result::Result<T, AllyError>;

/// Unified error type for AllyKV operations
#[derive(Debug, Error)]
pub enum AllyError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// On-disk content (index or segment) could not be parsed
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// A storage operation failed and was rolled back
    #[error("Storage error: {0}")]
    Storage(String),

    /// A storage operation failed and could not be rolled back.
    /// The engine refuses further work once this is observed.
    #[error("Fatal storage failure: {0}")]
    Fatal(String),

    #[error("Engine halted after a fatal storage failure")]
    Halted,

    // -------------------------------------------------------------------------
    // Encoding Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AllyError {
    /// True for failures that leave memory and disk possibly out of sync
    pub fn is_fatal(&self) -> bool {
        matches!(self, AllyError::Fatal(_) | AllyError::Halted)
    }
}
