//! Import ledger: the durable record of every import attempt
//!
//! Each attempt is an [`ImportRecord`] that starts `pending` and reaches
//! exactly one terminal state, `complete` or `error`. The ledger answers
//! "has this exact content already been ingested" and keeps the history for
//! audit. There is no in-memory cache: every check goes to the backing store.
//!
//! [`ImportLedger::begin`] is an atomic claim. It refuses to create a
//! `pending` record when a `complete` record with the same hash exists, and
//! it reports [`BeginOutcome::InProgress`] while another live import holds
//! the same content. The claim is released by `complete` or `fail`.

mod memory;
mod postgres;

pub use memory::MemoryImportLedger;
pub use postgres::PgImportLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedwork_common::checksum::Fingerprint;
use fedwork_common::types::{Dataset, ImportStatus, SnapshotPeriod};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::IngestResult;

/// Primary key of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ImportId(pub i64);

impl std::fmt::Display for ImportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One import attempt (maps to the `data_imports` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRecord {
    pub id: ImportId,
    pub dataset: Dataset,
    pub filename: String,
    pub file_hash: String,
    pub row_count: i64,
    pub snapshot_period: Option<SnapshotPeriod>,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a new `pending` record
#[derive(Debug, Clone)]
pub struct NewImport {
    pub dataset: Dataset,
    pub filename: String,
    pub file_hash: Fingerprint,
    /// Estimated data rows (lines minus header); replaced on completion
    pub expected_rows: u64,
    pub snapshot_period: Option<SnapshotPeriod>,
}

/// Result of trying to claim a content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// A `pending` record was created and the content is claimed
    Started(ImportId),
    /// The content is already ingested under the given record
    AlreadyImported(ImportId),
    /// Another live import currently holds this content
    InProgress,
}

#[async_trait]
pub trait ImportLedger: Send + Sync {
    /// Whether a `complete` record exists for `hash`
    async fn has_complete(&self, hash: &Fingerprint) -> IngestResult<bool>;

    /// Hashes of every `complete` record
    async fn complete_hashes(&self) -> IngestResult<HashSet<String>>;

    /// Create a committed `pending` record unless the content is already
    /// ingested or claimed
    async fn begin(&self, import: NewImport) -> IngestResult<BeginOutcome>;

    /// `pending → complete`, recording the final row count
    async fn complete(&self, id: ImportId, row_count: u64) -> IngestResult<()>;

    /// `pending → error`
    async fn fail(&self, id: ImportId) -> IngestResult<()>;

    async fn get(&self, id: ImportId) -> IngestResult<Option<ImportRecord>>;

    /// Most recent records first
    async fn recent(&self, limit: u32) -> IngestResult<Vec<ImportRecord>>;
}

pub(crate) fn row_count_to_i64(rows: u64) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}
