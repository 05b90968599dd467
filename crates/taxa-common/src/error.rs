//! Error types shared across the taxa workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, TaxaError>;

/// Errors that are not specific to a single component
#[derive(Error, Debug)]
pub enum TaxaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid taxon: {0}")]
    InvalidTaxon(String),
}

impl TaxaError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        TaxaError::Config(message.into())
    }
}
