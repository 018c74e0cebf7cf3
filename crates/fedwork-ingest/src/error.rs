//! Import pipeline error types

use fedwork_common::CommonError;
use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::ImportId;
use fedwork_common::types::ImportStatus;

/// Result type alias for pipeline operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors surfaced by the import pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid dataset kind '{0}': expected one of employment, accessions, separations")]
    InvalidDataset(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("load into '{table}' failed: {message}")]
    Load { table: String, message: String },

    #[error("another import of content {0} is already in progress")]
    InProgress(String),

    #[error("import {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ImportId,
        from: ImportStatus,
        to: ImportStatus,
    },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn load(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Errors raised before any ledger row exists: bad kind, missing file, bad header
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidDataset(_) | IngestError::FileNotFound(_) | IngestError::Schema(_)
        )
    }
}

impl From<CommonError> for IngestError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Io(e) => IngestError::Io(e),
            CommonError::InvalidDataset(kind) => IngestError::InvalidDataset(kind),
            CommonError::InvalidStatus(status) => {
                IngestError::Ledger(format!("unknown status '{}' in ledger", status))
            },
        }
    }
}
