//! PostgreSQL `COPY ... FROM STDIN` loader

use async_trait::async_trait;
use sqlx::postgres::PgCopyIn;
use sqlx::{PgConnection, PgPool};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{BulkLoader, LoadOutcome, LoadTarget};
use crate::error::{IngestError, IngestResult};
use crate::transform::ChunkSource;

/// Bulk loader driving PostgreSQL's copy-in protocol
pub struct PgBulkLoader {
    pool: PgPool,
}

impl PgBulkLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Send every chunk of `source`; returns bytes sent
    async fn pump(
        copy: &mut PgCopyIn<&mut PgConnection>,
        target: &LoadTarget,
        source: &mut dyn ChunkSource,
    ) -> IngestResult<u64> {
        let mut bytes_sent = 0u64;
        loop {
            let chunk = source.next_chunk(target.chunk_size).await?;
            if chunk.is_empty() {
                return Ok(bytes_sent);
            }
            bytes_sent += chunk.len() as u64;
            copy.send(chunk)
                .await
                .map_err(|e| IngestError::load(target.table(), e))?;
        }
    }

    async fn table_total(&self, target: &LoadTarget) -> Option<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", target.table());
        match sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(table = target.table(), error = %e, "row count query failed after commit");
                None
            },
        }
    }
}

#[async_trait]
impl BulkLoader for PgBulkLoader {
    #[instrument(skip(self, target, source), fields(table = target.table()))]
    async fn load(&self, target: &LoadTarget, source: &mut dyn ChunkSource) -> IngestResult<LoadOutcome> {
        let statement = target.copy_statement();
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        debug!(statement = %statement, "starting COPY");

        let copied = {
            let mut copy = tx
                .copy_in_raw(&statement)
                .await
                .map_err(|e| IngestError::load(target.table(), e))?;

            match Self::pump(&mut copy, target, source).await {
                Ok(bytes_sent) => copy
                    .finish()
                    .await
                    .map(|rows| (rows, bytes_sent))
                    .map_err(|e| IngestError::load(target.table(), e)),
                Err(e) => {
                    if let Err(abort_err) = copy.abort(e.to_string()).await {
                        debug!(error = %abort_err, "COPY abort reported an error");
                    }
                    Err(e)
                },
            }
        };

        let (rows_copied, bytes_sent) = match copied {
            Ok(result) => result,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed COPY reported an error");
                }
                return Err(e);
            },
        };

        tx.commit()
            .await
            .map_err(|e| IngestError::load(target.table(), e))?;

        let table_total = self.table_total(target).await;
        info!(
            rows_copied,
            bytes_sent,
            table_total = table_total.unwrap_or(-1),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "COPY committed"
        );

        Ok(LoadOutcome {
            rows_copied,
            table_total,
            bytes_sent,
        })
    }
}
