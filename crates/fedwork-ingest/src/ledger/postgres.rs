//! PostgreSQL-backed ledger (`data_imports` table)
//!
//! A claim is a session advisory lock on the content hash, held on a
//! dedicated connection from `begin` until `complete` or `fail`. The
//! connection is closed instead of being returned to the pool, so a process
//! that dies mid-import drops its claim with its session and a stale
//! `pending` row never blocks a retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedwork_common::checksum::Fingerprint;
use fedwork_common::types::{Dataset, ImportStatus, SnapshotPeriod};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::{row_count_to_i64, BeginOutcome, ImportId, ImportLedger, ImportRecord, NewImport};
use crate::error::{IngestError, IngestResult};

const RECORD_COLUMNS: &str =
    "id, dataset_type, filename, file_hash, row_count, snapshot_month, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ImportRow {
    id: i64,
    dataset_type: String,
    filename: String,
    file_hash: String,
    row_count: i64,
    snapshot_month: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ImportRow> for ImportRecord {
    type Error = IngestError;

    fn try_from(row: ImportRow) -> Result<Self, Self::Error> {
        Ok(ImportRecord {
            id: ImportId(row.id),
            dataset: row.dataset_type.parse::<Dataset>()?,
            filename: row.filename,
            file_hash: row.file_hash,
            row_count: row.row_count,
            snapshot_period: row.snapshot_month.map(SnapshotPeriod::new),
            status: row.status.parse::<ImportStatus>()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct Claim {
    conn: PoolConnection<Postgres>,
    hash: String,
}

/// Ledger stored in PostgreSQL
pub struct PgImportLedger {
    pool: PgPool,
    claims: Mutex<HashMap<ImportId, Claim>>,
}

impl PgImportLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claims: Mutex::new(HashMap::new()),
        }
    }

    fn take_claim(&self, id: ImportId) -> IngestResult<Option<Claim>> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|e| IngestError::Ledger(format!("Failed to acquire claim table: {}", e)))?;
        Ok(claims.remove(&id))
    }

    fn store_claim(&self, id: ImportId, claim: Claim) -> IngestResult<()> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|e| IngestError::Ledger(format!("Failed to acquire claim table: {}", e)))?;
        claims.insert(id, claim);
        Ok(())
    }

    async fn release(mut claim: Claim) {
        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
            .bind(&claim.hash)
            .fetch_one(&mut *claim.conn)
            .await;
        if let Err(e) = unlocked {
            // The connection closes on drop, which releases the lock anyway.
            debug!(error = %e, "advisory unlock failed");
        }
    }

    async fn transition(&self, id: ImportId, to: ImportStatus, row_count: Option<i64>) -> IngestResult<()> {
        let query = sqlx::query(
            r#"
            UPDATE data_imports
            SET status = $1, row_count = COALESCE($2, row_count), updated_at = NOW()
            WHERE id = $3 AND status = 'pending'
            "#,
        )
        .bind(to.as_str())
        .bind(row_count)
        .bind(id.0);

        let result = match self.take_claim(id)? {
            Some(mut claim) => {
                let result = query.execute(&mut *claim.conn).await;
                Self::release(claim).await;
                result
            },
            None => {
                warn!(import_id = %id, "no live claim for import; updating through the pool");
                query.execute(&self.pool).await
            },
        }?;

        if result.rows_affected() == 0 {
            return Err(match self.get(id).await? {
                Some(record) => IngestError::InvalidTransition {
                    id,
                    from: record.status,
                    to,
                },
                None => IngestError::Ledger(format!("import {} not found", id)),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ImportLedger for PgImportLedger {
    async fn has_complete(&self, hash: &Fingerprint) -> IngestResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM data_imports WHERE file_hash = $1 AND status = 'complete')",
        )
        .bind(hash.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn complete_hashes(&self) -> IngestResult<HashSet<String>> {
        let hashes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT file_hash FROM data_imports WHERE status = 'complete'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn begin(&self, import: NewImport) -> IngestResult<BeginOutcome> {
        let hash = import.file_hash.as_str().to_string();
        let mut conn = self.pool.acquire().await?;
        conn.close_on_drop();

        let claimed = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
            .bind(&hash)
            .fetch_one(&mut *conn)
            .await?;
        if !claimed {
            return Ok(BeginOutcome::InProgress);
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO data_imports
                (dataset_type, filename, file_hash, row_count, snapshot_month, status)
            SELECT $1, $2, $3, $4, $5, 'pending'
            WHERE NOT EXISTS (
                SELECT 1 FROM data_imports WHERE file_hash = $3 AND status = 'complete'
            )
            RETURNING id
            "#,
        )
        .bind(import.dataset.as_str())
        .bind(&import.filename)
        .bind(&hash)
        .bind(row_count_to_i64(import.expected_rows))
        .bind(import.snapshot_period.as_ref().map(|p| p.as_str()))
        .fetch_optional(&mut *conn)
        .await?;

        match inserted {
            Some(id) => {
                let id = ImportId(id);
                self.store_claim(id, Claim { conn, hash })?;
                Ok(BeginOutcome::Started(id))
            },
            None => {
                let existing = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM data_imports WHERE file_hash = $1 AND status = 'complete' ORDER BY id LIMIT 1",
                )
                .bind(&hash)
                .fetch_one(&mut *conn)
                .await?;
                Self::release(Claim { conn, hash }).await;
                Ok(BeginOutcome::AlreadyImported(ImportId(existing)))
            },
        }
    }

    async fn complete(&self, id: ImportId, row_count: u64) -> IngestResult<()> {
        self.transition(id, ImportStatus::Complete, Some(row_count_to_i64(row_count)))
            .await
    }

    async fn fail(&self, id: ImportId) -> IngestResult<()> {
        self.transition(id, ImportStatus::Error, None).await
    }

    async fn get(&self, id: ImportId) -> IngestResult<Option<ImportRecord>> {
        let row = sqlx::query_as::<_, ImportRow>(&format!(
            "SELECT {} FROM data_imports WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ImportRecord::try_from).transpose()
    }

    async fn recent(&self, limit: u32) -> IngestResult<Vec<ImportRecord>> {
        let rows = sqlx::query_as::<_, ImportRow>(&format!(
            "SELECT {} FROM data_imports ORDER BY id DESC LIMIT $1",
            RECORD_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ImportRecord::try_from).collect()
    }
}
