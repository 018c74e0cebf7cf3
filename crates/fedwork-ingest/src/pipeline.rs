//! Import orchestration
//!
//! [`Importer::import`] runs one file through the whole pipeline:
//!
//! 1. check the file exists
//! 2. fingerprint its content
//! 3. skip it when a `complete` import of the same content exists
//! 4. derive the column mapping from the header
//! 5. claim the content in the ledger (`pending`)
//! 6. stream the transformed rows into the dataset table
//! 7. mark the record `complete` or `error`
//! 8. ask the front end to revalidate its caches
//!
//! Validation failures (steps 1 and 4) happen before any ledger row exists.
//! Once a record is `pending`, every exit path moves it to a terminal state.

use fedwork_common::checksum::Fingerprint;
use fedwork_common::types::{Dataset, SnapshotPeriod};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{error, info, instrument, warn};

use crate::error::{IngestError, IngestResult};
use crate::ledger::{BeginOutcome, ImportId, ImportLedger, NewImport};
use crate::loader::{BulkLoader, LoadTarget, DEFAULT_CHUNK_SIZE};
use crate::notify::CacheNotifier;
use crate::scan::{file_name, LocalDataFile};
use crate::schema::{read_header, ColumnMapping, SchemaRules};
use crate::transform::TransformStream;

/// A finished import
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub import_id: ImportId,
    pub dataset: Dataset,
    pub filename: String,
    pub file_hash: String,
    pub snapshot_period: Option<SnapshotPeriod>,
    /// Rows the store accepted
    pub rows_copied: u64,
    /// Line-count estimate taken before loading
    pub expected_rows: u64,
    pub table_total: Option<i64>,
    pub elapsed: Duration,
}

/// What [`Importer::import`] did with a file
#[derive(Debug, Clone, Serialize)]
pub enum ImportReport {
    Imported(ImportSummary),
    /// The same content was ingested before; nothing was written
    AlreadyImported {
        dataset: Dataset,
        filename: String,
        file_hash: String,
        existing: Option<ImportId>,
    },
}

impl ImportReport {
    pub fn is_imported(&self) -> bool {
        matches!(self, ImportReport::Imported(_))
    }
}

/// Totals of a [`Importer::sync`] run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub discovered: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Files a dry run would have imported
    pub pending: Vec<PathBuf>,
    /// `(file, error)` for every failed file
    pub failures: Vec<(String, String)>,
}

/// Fails with [`IngestError::FileNotFound`] unless `path` is a regular file
pub async fn check_data_file(path: &Path) -> IngestResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(IngestError::FileNotFound(path.to_path_buf())),
    }
}

/// Data rows of a file: newline-terminated lines plus a trailing partial
/// line, minus the header
pub async fn count_data_rows(path: &Path) -> IngestResult<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; 1 << 16];
    let mut lines = 0u64;
    let mut last = None;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        lines += buffer[..read].iter().filter(|b| **b == b'\n').count() as u64;
        last = Some(buffer[read - 1]);
    }
    if matches!(last, Some(byte) if byte != b'\n') {
        lines += 1;
    }

    Ok(lines.saturating_sub(1))
}

/// Fingerprint on the blocking pool so large files do not stall the runtime
pub async fn fingerprint_file(path: &Path) -> IngestResult<Fingerprint> {
    let owned = path.to_path_buf();
    let fingerprint = tokio::task::spawn_blocking(move || Fingerprint::of_file(&owned))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;
    Ok(fingerprint)
}

/// Runs files through the ledger, loader and notifier
pub struct Importer<L, B, N> {
    ledger: L,
    loader: B,
    notifier: N,
    rules: SchemaRules,
    chunk_size: usize,
    notify: bool,
}

impl<L, B, N> Importer<L, B, N>
where
    L: ImportLedger,
    B: BulkLoader,
    N: CacheNotifier,
{
    pub fn new(ledger: L, loader: B, notifier: N) -> Self {
        Self {
            ledger,
            loader,
            notifier,
            rules: SchemaRules::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            notify: true,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn loader(&self) -> &B {
        &self.loader
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Import one file into the dataset's table
    #[instrument(skip(self, path), fields(dataset = %dataset, file = %path.display()))]
    pub async fn import(&self, dataset: Dataset, path: &Path) -> IngestResult<ImportReport> {
        check_data_file(path).await?;

        let fingerprint = fingerprint_file(path).await?;
        self.import_fingerprinted(dataset, path, fingerprint).await
    }

    async fn import_fingerprinted(
        &self,
        dataset: Dataset,
        path: &Path,
        fingerprint: Fingerprint,
    ) -> IngestResult<ImportReport> {
        let started = Instant::now();
        let filename = file_name(path);

        // A failed lookup must not let a duplicate through.
        if self.ledger.has_complete(&fingerprint).await? {
            info!(hash = fingerprint.short(), "already imported, skipping");
            return Ok(ImportReport::AlreadyImported {
                dataset,
                filename,
                file_hash: fingerprint.as_str().to_string(),
                existing: None,
            });
        }

        let header = read_header(path).await?;
        let mapping = ColumnMapping::from_header(&header, &self.rules)?;
        let expected_rows = count_data_rows(path).await?;
        let snapshot_period = SnapshotPeriod::from_filename(&filename);

        info!(
            table = dataset.table_name(),
            columns = mapping.len(),
            expected_rows,
            snapshot = snapshot_period.as_ref().map(|p| p.as_str()).unwrap_or("-"),
            "starting import"
        );

        let import_id = match self
            .ledger
            .begin(NewImport {
                dataset,
                filename: filename.clone(),
                file_hash: fingerprint.clone(),
                expected_rows,
                snapshot_period: snapshot_period.clone(),
            })
            .await?
        {
            BeginOutcome::Started(id) => id,
            BeginOutcome::AlreadyImported(existing) => {
                info!(hash = fingerprint.short(), existing = %existing, "already imported, skipping");
                return Ok(ImportReport::AlreadyImported {
                    dataset,
                    filename,
                    file_hash: fingerprint.as_str().to_string(),
                    existing: Some(existing),
                });
            },
            BeginOutcome::InProgress => {
                return Err(IngestError::InProgress(fingerprint.short().to_string()));
            },
        };

        let columns = mapping.target_columns();
        let target = LoadTarget {
            dataset,
            numeric_columns: mapping
                .numeric_indices()
                .iter()
                .filter_map(|index| columns.get(*index).cloned())
                .collect(),
            columns,
            chunk_size: self.chunk_size,
        };

        let loaded = match TransformStream::open(path, &mapping).await {
            Ok(mut stream) => self.loader.load(&target, &mut stream).await,
            Err(e) => Err(IngestError::Io(e)),
        };

        let outcome = match loaded {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(import_id = %import_id, error = %e, "import failed");
                if let Err(mark_err) = self.ledger.fail(import_id).await {
                    error!(import_id = %import_id, error = %mark_err, "could not mark import as failed");
                }
                return Err(e);
            },
        };

        self.ledger.complete(import_id, outcome.rows_copied).await?;

        if outcome.rows_copied != expected_rows {
            warn!(
                import_id = %import_id,
                rows_copied = outcome.rows_copied,
                expected_rows,
                "row count differs from line count"
            );
        }

        let elapsed = started.elapsed();
        info!(
            import_id = %import_id,
            rows_copied = outcome.rows_copied,
            elapsed_ms = elapsed.as_millis() as u64,
            "import complete"
        );

        if self.notify {
            if let Err(e) = self.notifier.notify().await {
                warn!(error = %e, "cache revalidation failed; data is committed");
            }
        }

        Ok(ImportReport::Imported(ImportSummary {
            import_id,
            dataset,
            filename,
            file_hash: fingerprint.as_str().to_string(),
            snapshot_period,
            rows_copied: outcome.rows_copied,
            expected_rows,
            table_total: outcome.table_total,
            elapsed,
        }))
    }

    /// Import every file not yet ingested, one at a time.
    ///
    /// The up-front hash lookup only filters the work list, so a failure
    /// there is logged and treated as "nothing imported yet". Each import
    /// still runs its own gate, which fails closed.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn sync(&self, files: &[LocalDataFile], dry_run: bool) -> SyncSummary {
        let mut summary = SyncSummary {
            discovered: files.len(),
            ..SyncSummary::default()
        };

        let known = match self.ledger.complete_hashes().await {
            Ok(hashes) => hashes,
            Err(e) => {
                warn!(error = %e, "could not load imported hashes; checking every file");
                HashSet::new()
            },
        };

        for file in files {
            let name = file.filename();
            let fingerprint = match fingerprint_file(&file.path).await {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    error!(file = %name, error = %e, "could not fingerprint file");
                    summary.failed += 1;
                    summary.failures.push((name, e.to_string()));
                    continue;
                },
            };

            if known.contains(fingerprint.as_str()) {
                info!(file = %name, hash = fingerprint.short(), "already imported, skipping");
                summary.skipped += 1;
                continue;
            }

            if dry_run {
                info!(file = %name, dataset = %file.dataset, "would import");
                summary.pending.push(file.path.clone());
                continue;
            }

            match self.import_fingerprinted(file.dataset, &file.path, fingerprint).await {
                Ok(ImportReport::Imported(_)) => summary.imported += 1,
                Ok(ImportReport::AlreadyImported { .. }) => summary.skipped += 1,
                Err(e) => {
                    error!(file = %name, error = %e, "import failed");
                    summary.failed += 1;
                    summary.failures.push((name, e.to_string()));
                },
            }
        }

        info!(
            discovered = summary.discovered,
            imported = summary.imported,
            skipped = summary.skipped,
            failed = summary.failed,
            "sync finished"
        );
        summary
    }
}
