//! Import pipeline tests against the in-memory ledger and loader
//!
//! Covers:
//! 1. A file with empty numeric fields lands with NULLs and a `complete` record
//! 2. The same content under another name is skipped
//! 3. A bad row rolls the whole file back and leaves an `error` record
//! 4. Validation errors never create a ledger record
//! 5. The pre-import gate fails closed while the sync lookup fails open
//! 6. A read error in the middle of a load marks the record `error`

use anyhow::Result;
use async_trait::async_trait;
use fedwork_common::checksum::Fingerprint;
use fedwork_common::types::{Dataset, ImportStatus, SnapshotPeriod};
use fedwork_ingest::error::{IngestError, IngestResult};
use fedwork_ingest::ledger::{
    BeginOutcome, ImportId, ImportLedger, ImportRecord, MemoryImportLedger, NewImport,
};
use fedwork_ingest::loader::{BulkLoader, LoadOutcome, LoadTarget, MemoryBulkLoader, Value};
use fedwork_ingest::notify::{CacheNotifier, NotifyError};
use fedwork_ingest::scan::scan_directory;
use fedwork_ingest::transform::ChunkSource;
use fedwork_ingest::{ImportReport, Importer};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const SCENARIO: &str = "agency|count|annualized_adjusted_basic_pay\nA1|5|\nA2||42000.50\n";

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fedwork_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct RecordingNotifier {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheNotifier for RecordingNotifier {
    async fn notify(&self) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 500,
                body: "cache unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Memory ledger whose bulk hash lookup always fails
#[derive(Default)]
struct NoHashListLedger {
    inner: MemoryImportLedger,
}

#[async_trait]
impl ImportLedger for NoHashListLedger {
    async fn has_complete(&self, hash: &Fingerprint) -> IngestResult<bool> {
        self.inner.has_complete(hash).await
    }

    async fn complete_hashes(&self) -> IngestResult<HashSet<String>> {
        Err(IngestError::Ledger("connection reset".to_string()))
    }

    async fn begin(&self, import: NewImport) -> IngestResult<BeginOutcome> {
        self.inner.begin(import).await
    }

    async fn complete(&self, id: ImportId, row_count: u64) -> IngestResult<()> {
        self.inner.complete(id, row_count).await
    }

    async fn fail(&self, id: ImportId) -> IngestResult<()> {
        self.inner.fail(id).await
    }

    async fn get(&self, id: ImportId) -> IngestResult<Option<ImportRecord>> {
        self.inner.get(id).await
    }

    async fn recent(&self, limit: u32) -> IngestResult<Vec<ImportRecord>> {
        self.inner.recent(limit).await
    }
}

/// Reads the first chunk, then loses its source
struct VanishingDiskLoader;

#[async_trait]
impl BulkLoader for VanishingDiskLoader {
    async fn load(&self, target: &LoadTarget, source: &mut dyn ChunkSource) -> IngestResult<LoadOutcome> {
        source.next_chunk(target.chunk_size).await?;
        Err(IngestError::Io(io::Error::other("disk went away")))
    }
}

type MemoryImporter = Importer<MemoryImportLedger, MemoryBulkLoader, RecordingNotifier>;

fn importer() -> MemoryImporter {
    Importer::new(
        MemoryImportLedger::new(),
        MemoryBulkLoader::new(),
        RecordingNotifier::default(),
    )
    .with_chunk_size(7)
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn ten_rows_with_bad_third() -> String {
    let mut content = String::from("agency|count|annualized_adjusted_basic_pay\n");
    for i in 1..=10 {
        if i == 3 {
            content.push_str("AG3|3|not-a-number\n");
        } else {
            content.push_str(&format!("AG{i}|{i}|{i}000.00\n"));
        }
    }
    content
}

#[tokio::test]
async fn test_empty_numeric_fields_load_as_null() -> Result<()> {
    init_tracing();
    info!("🧪 Testing empty numeric fields become NULL");

    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "accessions_202512_1_2026-02-20.txt", SCENARIO);
    let importer = importer();

    let ImportReport::Imported(summary) = importer.import(Dataset::Accessions, &path).await? else {
        panic!("expected an import");
    };
    assert_eq!(summary.rows_copied, 2);
    assert_eq!(summary.expected_rows, 2);
    assert_eq!(summary.table_total, Some(2));
    assert_eq!(summary.snapshot_period, Some(SnapshotPeriod::new("202512")));
    assert_eq!(summary.file_hash, Fingerprint::of_file(&path)?.as_str());

    let rows = importer.loader().rows(Dataset::Accessions);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["agency"], Value::Text("A1".to_string()));
    assert_eq!(rows[0]["employee_count"], Value::Numeric("5".to_string()));
    assert_eq!(rows[0]["annualized_adjusted_basic_pay"], Value::Null);
    assert_eq!(rows[1]["employee_count"], Value::Null);
    assert_eq!(
        rows[1]["annualized_adjusted_basic_pay"],
        Value::Numeric("42000.50".to_string())
    );
    assert!(!rows[0].contains_key("count"));

    let records = importer.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ImportStatus::Complete);
    assert_eq!(records[0].row_count, 2);
    assert_eq!(records[0].filename, "accessions_202512_1_2026-02-20.txt");
    assert_eq!(records[0].snapshot_period.as_ref().map(|p| p.as_str()), Some("202512"));
    assert_eq!(importer.notifier().calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_same_content_under_new_name_is_skipped() -> Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let first = write_file(dir.path(), "accessions_202512_1_2026-02-20.txt", SCENARIO);
    let renamed = write_file(dir.path(), "accessions_copy.txt", SCENARIO);
    let importer = importer();

    assert!(importer.import(Dataset::Accessions, &first).await?.is_imported());

    let report = importer.import(Dataset::Accessions, &renamed).await?;
    match report {
        ImportReport::AlreadyImported { filename, file_hash, .. } => {
            assert_eq!(filename, "accessions_copy.txt");
            assert_eq!(file_hash, Fingerprint::of_file(&first)?.as_str());
        },
        other => panic!("expected a skip, got {other:?}"),
    }

    assert_eq!(importer.loader().row_count(Dataset::Accessions), 2);
    assert_eq!(importer.ledger().records().len(), 1);
    assert_eq!(importer.notifier().calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_bad_row_rolls_back_whole_file() -> Result<()> {
    init_tracing();
    info!("🧪 Testing a rejected row leaves the table unchanged");

    let dir = tempfile::tempdir()?;
    let good = write_file(dir.path(), "separations_202511_1.txt", SCENARIO);
    let bad = write_file(dir.path(), "separations_202512_1.txt", &ten_rows_with_bad_third());
    let importer = importer();

    importer.import(Dataset::Separations, &good).await?;
    let before = importer.loader().rows(Dataset::Separations);

    let err = importer.import(Dataset::Separations, &bad).await.unwrap_err();
    assert!(matches!(err, IngestError::Load { .. }), "unexpected error: {err}");
    assert!(!err.is_validation());

    assert_eq!(importer.loader().rows(Dataset::Separations), before);
    let records = importer.ledger().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, ImportStatus::Error);
    assert_eq!(records[1].row_count, 10);
    assert_eq!(importer.notifier().calls(), 1);

    // A failed attempt never blocks a retry of the same content.
    let retry = importer.import(Dataset::Separations, &bad).await;
    assert!(retry.is_err());
    let records = importer.ledger().records();
    assert_eq!(records.len(), 3);
    assert!(records[1..].iter().all(|r| r.status == ImportStatus::Error));

    Ok(())
}

#[tokio::test]
async fn test_validation_errors_create_no_record() -> Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let importer = importer();

    let missing = importer
        .import(Dataset::Employment, &dir.path().join("employment_202512_1.txt"))
        .await
        .unwrap_err();
    assert!(matches!(missing, IngestError::FileNotFound(_)));
    assert!(missing.is_validation());

    let not_a_file = importer.import(Dataset::Employment, dir.path()).await.unwrap_err();
    assert!(matches!(not_a_file, IngestError::FileNotFound(_)));

    let empty = write_file(dir.path(), "employment_202512_2.txt", "");
    let err = importer.import(Dataset::Employment, &empty).await.unwrap_err();
    assert!(matches!(err, IngestError::Schema(_)));

    let bad_header = write_file(dir.path(), "employment_202512_3.txt", "agency||count\nA1||1\n");
    let err = importer.import(Dataset::Employment, &bad_header).await.unwrap_err();
    assert!(matches!(err, IngestError::Schema(_)));

    assert!("payroll".parse::<Dataset>().is_err());
    assert!(importer.ledger().records().is_empty());
    assert_eq!(importer.loader().row_count(Dataset::Employment), 0);

    Ok(())
}

#[tokio::test]
async fn test_header_only_file_imports_zero_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "employment_202512_1.txt", "agency|count\n");
    let importer = importer();

    let ImportReport::Imported(summary) = importer.import(Dataset::Employment, &path).await? else {
        panic!("expected an import");
    };
    assert_eq!(summary.rows_copied, 0);
    assert_eq!(importer.ledger().records()[0].status, ImportStatus::Complete);

    Ok(())
}

#[tokio::test]
async fn test_gate_fails_closed_when_ledger_is_unreachable() -> Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "accessions_202512_1.txt", SCENARIO);
    let importer = importer();
    importer.ledger().set_unavailable(true);

    let err = importer.import(Dataset::Accessions, &path).await.unwrap_err();
    assert!(matches!(err, IngestError::Ledger(_)));
    assert_eq!(importer.loader().row_count(Dataset::Accessions), 0);
    assert_eq!(importer.notifier().calls(), 0);

    importer.ledger().set_unavailable(false);
    assert!(importer.ledger().records().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_sync_lookup_fails_open() -> Result<()> {
    init_tracing();
    info!("🧪 Testing sync proceeds when the hash list cannot be loaded");

    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "accessions_202512_1.txt", SCENARIO);
    write_file(dir.path(), "separations_202512_1.txt", &SCENARIO.replace("A1", "B1"));
    let files = scan_directory(dir.path()).await?;

    let importer = Importer::new(
        NoHashListLedger::default(),
        MemoryBulkLoader::new(),
        RecordingNotifier::default(),
    );
    let summary = importer.sync(&files, false).await;
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.failed, 0);

    // Already-imported content is still caught by the per-file gate.
    let again = importer.sync(&files, false).await;
    assert_eq!(again.imported, 0);
    assert_eq!(again.skipped, 2);
    assert_eq!(importer.loader().row_count(Dataset::Accessions), 2);

    Ok(())
}

#[tokio::test]
async fn test_sync_skips_known_content_and_counts_failures() -> Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "accessions_202511_1.txt", SCENARIO);
    write_file(dir.path(), "accessions_202512_1.txt", SCENARIO);
    write_file(dir.path(), "employment_202512_1.txt", &ten_rows_with_bad_third());
    write_file(dir.path(), "separations_202512_1.txt", "agency|length_of_service_years\nA1|\n");
    let files = scan_directory(dir.path()).await?;
    assert_eq!(files.len(), 4);

    let importer = importer();

    let dry = importer.sync(&files, true).await;
    assert_eq!(dry.pending.len(), 4);
    assert_eq!(dry.imported, 0);
    assert!(importer.ledger().records().is_empty());

    let summary = importer.sync(&files, false).await;
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, "employment_202512_1.txt");

    let again = importer.sync(&files, true).await;
    assert_eq!(again.skipped, 3);
    assert_eq!(again.pending, vec![dir.path().join("employment_202512_1.txt")]);

    Ok(())
}

#[tokio::test]
async fn test_claimed_content_reports_in_progress() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "accessions_202512_1.txt", SCENARIO);
    let importer = importer();

    let outcome = importer
        .ledger()
        .begin(NewImport {
            dataset: Dataset::Accessions,
            filename: "accessions_other.txt".to_string(),
            file_hash: Fingerprint::of_file(&path)?,
            expected_rows: 2,
            snapshot_period: None,
        })
        .await?;
    let BeginOutcome::Started(held) = outcome else {
        panic!("expected to claim the content");
    };

    let err = importer.import(Dataset::Accessions, &path).await.unwrap_err();
    assert!(matches!(err, IngestError::InProgress(_)));
    assert_eq!(importer.loader().row_count(Dataset::Accessions), 0);

    importer.ledger().fail(held).await?;
    assert!(importer.import(Dataset::Accessions, &path).await?.is_imported());

    Ok(())
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_import() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "employment_202512_1.txt", SCENARIO);
    let importer = Importer::new(
        MemoryImportLedger::new(),
        MemoryBulkLoader::new(),
        RecordingNotifier::failing(),
    );

    assert!(importer.import(Dataset::Employment, &path).await?.is_imported());
    assert_eq!(importer.notifier().calls(), 1);
    assert_eq!(importer.ledger().records()[0].status, ImportStatus::Complete);

    let quiet = Importer::new(
        MemoryImportLedger::new(),
        MemoryBulkLoader::new(),
        RecordingNotifier::default(),
    )
    .with_notify(false);
    quiet.import(Dataset::Employment, &path).await?;
    assert_eq!(quiet.notifier().calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_every_chunk_size_loads_the_same_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let content = "agency|length_of_service_years|annualized_adjusted_basic_pay\r\nA1||\r\nA2|3.5|\r\n|1|2";
    let path = write_file(dir.path(), "separations_202512_1.txt", content);

    let mut reference = None;
    for chunk_size in [1, 2, 5, 13, 64, 1 << 20] {
        let importer = importer().with_chunk_size(chunk_size);
        importer.import(Dataset::Separations, &path).await?;
        let rows = importer.loader().rows(Dataset::Separations);
        assert_eq!(rows.len(), 3, "chunk size {chunk_size}");
        assert_eq!(rows[0]["length_of_service_years"], Value::Null);
        match &reference {
            None => reference = Some(rows),
            Some(expected) => assert_eq!(&rows, expected, "chunk size {chunk_size}"),
        }
    }

    Ok(())
}

#[tokio::test]
async fn test_read_error_mid_load_marks_record_error() -> Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "employment_202512_1.txt", SCENARIO);
    let importer = Importer::new(
        MemoryImportLedger::new(),
        VanishingDiskLoader,
        RecordingNotifier::default(),
    )
    .with_chunk_size(8);

    let err = importer.import(Dataset::Employment, &path).await.unwrap_err();
    assert!(matches!(err, IngestError::Io(_)), "unexpected error: {err}");
    assert!(!err.is_validation());

    let records = importer.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ImportStatus::Error);
    assert_eq!(records[0].row_count, 2);
    assert_eq!(importer.notifier().calls(), 0);
    assert!(!importer.ledger().has_complete(&Fingerprint::of_file(&path)?).await?);

    Ok(())
}

#[tokio::test]
async fn test_crlf_file_without_final_newline_imports_every_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "employment_202512_1.txt", "agency|count\r\nA1|5\r\nA2|");
    let importer = importer();

    let ImportReport::Imported(summary) = importer.import(Dataset::Employment, &path).await? else {
        panic!("expected an import");
    };
    assert_eq!(summary.rows_copied, 2);
    let rows = importer.loader().rows(Dataset::Employment);
    assert_eq!(rows[1]["employee_count"], Value::Null);

    Ok(())
}
