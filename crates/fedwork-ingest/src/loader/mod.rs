//! Bulk loading of a transformed data stream into a dataset table
//!
//! A load is all-or-nothing: either every row of the stream is committed to
//! the target table, or the transaction is rolled back and the table is left
//! exactly as it was.

mod memory;
mod postgres;

pub use memory::{MemoryBulkLoader, Row, Value};
pub use postgres::PgBulkLoader;

use async_trait::async_trait;
use fedwork_common::types::Dataset;

use crate::error::IngestResult;
use crate::schema::FIELD_DELIMITER;
use crate::transform::{ChunkSource, NULL_SENTINEL};

/// Default size of each chunk pulled from the transform and sent to the store
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Where and how a stream is loaded
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub dataset: Dataset,
    /// Target column names in file order
    pub columns: Vec<String>,
    /// Names of the target columns holding numeric values
    pub numeric_columns: Vec<String>,
    pub chunk_size: usize,
}

impl LoadTarget {
    pub fn table(&self) -> &'static str {
        self.dataset.table_name()
    }

    /// `COPY` statement streaming pipe-delimited CSV with a header line
    pub fn copy_statement(&self) -> String {
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT CSV, DELIMITER '{}', HEADER TRUE, NULL '{}')",
            self.table(),
            self.columns.join(", "),
            FIELD_DELIMITER as char,
            NULL_SENTINEL
        )
    }
}

/// Result of a committed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Data rows the store accepted in this load
    pub rows_copied: u64,
    /// Total rows in the table after commit, when the count query succeeded
    pub table_total: Option<i64>,
    /// Bytes streamed, header included
    pub bytes_sent: u64,
}

#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// Stream `source` into the target table inside one transaction
    async fn load(&self, target: &LoadTarget, source: &mut dyn ChunkSource) -> IngestResult<LoadOutcome>;
}
