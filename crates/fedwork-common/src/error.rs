//! Error types shared across the fedwork crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared types and utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid dataset kind '{0}': expected one of employment, accessions, separations")]
    InvalidDataset(String),

    #[error("invalid import status '{0}'")]
    InvalidStatus(String),
}
