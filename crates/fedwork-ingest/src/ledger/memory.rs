//! In-process ledger with the same state machine as the PostgreSQL one

use async_trait::async_trait;
use chrono::Utc;
use fedwork_common::checksum::Fingerprint;
use fedwork_common::types::ImportStatus;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{row_count_to_i64, BeginOutcome, ImportId, ImportLedger, ImportRecord, NewImport};
use crate::error::{IngestError, IngestResult};

#[derive(Default)]
struct LedgerState {
    records: Vec<ImportRecord>,
    claimed: HashSet<String>,
    next_id: i64,
}

/// Ledger kept in memory, for tests and dry runs
#[derive(Default)]
pub struct MemoryImportLedger {
    state: Mutex<LedgerState>,
    unavailable: AtomicBool,
}

impl MemoryImportLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all records in insertion order
    pub fn records(&self) -> Vec<ImportRecord> {
        match self.state.lock() {
            Ok(state) => state.records.clone(),
            Err(poisoned) => poisoned.into_inner().records.clone(),
        }
    }

    fn lock(&self) -> IngestResult<MutexGuard<'_, LedgerState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IngestError::Ledger("ledger store is unavailable".to_string()));
        }
        self.state
            .lock()
            .map_err(|e| IngestError::Ledger(format!("Failed to acquire ledger lock: {}", e)))
    }

    fn transition(&self, id: ImportId, to: ImportStatus, row_count: Option<u64>) -> IngestResult<()> {
        let mut state = self.lock()?;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| IngestError::Ledger(format!("import {} not found", id)))?;

        if record.status.is_terminal() {
            return Err(IngestError::InvalidTransition {
                id,
                from: record.status,
                to,
            });
        }

        record.status = to;
        record.updated_at = Utc::now();
        if let Some(rows) = row_count {
            record.row_count = row_count_to_i64(rows);
        }
        let hash = record.file_hash.clone();
        state.claimed.remove(&hash);
        Ok(())
    }
}

#[async_trait]
impl ImportLedger for MemoryImportLedger {
    async fn has_complete(&self, hash: &Fingerprint) -> IngestResult<bool> {
        let state = self.lock()?;
        Ok(state
            .records
            .iter()
            .any(|r| r.status == ImportStatus::Complete && r.file_hash == hash.as_str()))
    }

    async fn complete_hashes(&self) -> IngestResult<HashSet<String>> {
        let state = self.lock()?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.status == ImportStatus::Complete)
            .map(|r| r.file_hash.clone())
            .collect())
    }

    async fn begin(&self, import: NewImport) -> IngestResult<BeginOutcome> {
        let mut state = self.lock()?;
        let hash = import.file_hash.as_str();

        if state.claimed.contains(hash) {
            return Ok(BeginOutcome::InProgress);
        }
        if let Some(existing) = state
            .records
            .iter()
            .find(|r| r.status == ImportStatus::Complete && r.file_hash == hash)
        {
            return Ok(BeginOutcome::AlreadyImported(existing.id));
        }

        state.next_id += 1;
        let id = ImportId(state.next_id);
        let now = Utc::now();
        state.records.push(ImportRecord {
            id,
            dataset: import.dataset,
            filename: import.filename,
            file_hash: hash.to_string(),
            row_count: row_count_to_i64(import.expected_rows),
            snapshot_period: import.snapshot_period,
            status: ImportStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        state.claimed.insert(hash.to_string());

        Ok(BeginOutcome::Started(id))
    }

    async fn complete(&self, id: ImportId, row_count: u64) -> IngestResult<()> {
        self.transition(id, ImportStatus::Complete, Some(row_count))
    }

    async fn fail(&self, id: ImportId) -> IngestResult<()> {
        self.transition(id, ImportStatus::Error, None)
    }

    async fn get(&self, id: ImportId) -> IngestResult<Option<ImportRecord>> {
        let state = self.lock()?;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn recent(&self, limit: u32) -> IngestResult<Vec<ImportRecord>> {
        let state = self.lock()?;
        Ok(state.records.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fedwork_common::types::{Dataset, SnapshotPeriod};

    fn new_import(hash: &str) -> NewImport {
        NewImport {
            dataset: Dataset::Accessions,
            filename: "accessions_202512_1_2026-02-20.txt".to_string(),
            file_hash: Fingerprint::from_hex(hash),
            expected_rows: 2,
            snapshot_period: Some(SnapshotPeriod::new("202512")),
        }
    }

    #[tokio::test]
    async fn test_pending_to_complete() {
        let ledger = MemoryImportLedger::new();
        let BeginOutcome::Started(id) = ledger.begin(new_import("aa")).await.unwrap() else {
            panic!("expected a new claim");
        };

        let record = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ImportStatus::Pending);
        assert!(!ledger.has_complete(&Fingerprint::from_hex("aa")).await.unwrap());

        ledger.complete(id, 2).await.unwrap();
        let record = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ImportStatus::Complete);
        assert_eq!(record.row_count, 2);
        assert!(ledger.has_complete(&Fingerprint::from_hex("aa")).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let ledger = MemoryImportLedger::new();
        let BeginOutcome::Started(id) = ledger.begin(new_import("bb")).await.unwrap() else {
            panic!("expected a new claim");
        };
        ledger.fail(id).await.unwrap();

        let err = ledger.complete(id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::InvalidTransition {
                from: ImportStatus::Error,
                to: ImportStatus::Complete,
                ..
            }
        ));
        assert!(ledger.fail(id).await.is_err());
    }

    #[tokio::test]
    async fn test_begin_refuses_claimed_and_completed_content() {
        let ledger = MemoryImportLedger::new();
        let BeginOutcome::Started(first) = ledger.begin(new_import("cc")).await.unwrap() else {
            panic!("expected a new claim");
        };
        assert_eq!(ledger.begin(new_import("cc")).await.unwrap(), BeginOutcome::InProgress);

        ledger.complete(first, 2).await.unwrap();
        assert_eq!(
            ledger.begin(new_import("cc")).await.unwrap(),
            BeginOutcome::AlreadyImported(first)
        );
    }

    #[tokio::test]
    async fn test_failed_attempt_can_be_retried() {
        let ledger = MemoryImportLedger::new();
        let BeginOutcome::Started(first) = ledger.begin(new_import("dd")).await.unwrap() else {
            panic!("expected a new claim");
        };
        ledger.fail(first).await.unwrap();

        let retry = ledger.begin(new_import("dd")).await.unwrap();
        assert!(matches!(retry, BeginOutcome::Started(id) if id != first));
        assert_eq!(ledger.records().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let ledger = MemoryImportLedger::new();
        ledger.set_unavailable(true);
        assert!(ledger.has_complete(&Fingerprint::from_hex("ee")).await.is_err());
        assert!(ledger.complete_hashes().await.is_err());

        ledger.set_unavailable(false);
        assert!(ledger.complete_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let ledger = MemoryImportLedger::new();
        for hash in ["01", "02", "03"] {
            ledger.begin(new_import(hash)).await.unwrap();
        }
        let recent = ledger.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].file_hash, "03");
        assert_eq!(recent[1].file_hash, "02");
    }
}
