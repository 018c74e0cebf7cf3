//! Common types used across the fedwork crates

use crate::error::CommonError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One of the OPM workforce datasets this workspace ingests.
///
/// Each dataset maps 1:1 to a target table of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Employment,
    Accessions,
    Separations,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [Dataset::Employment, Dataset::Accessions, Dataset::Separations];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Employment => "employment",
            Dataset::Accessions => "accessions",
            Dataset::Separations => "separations",
        }
    }

    /// Target table receiving rows for this dataset
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }

    /// Label OPM uses on its download page
    pub fn label(&self) -> &'static str {
        match self {
            Dataset::Employment => "Federal Employment Raw Data",
            Dataset::Accessions => "Federal Accessions Raw Data",
            Dataset::Separations => "Federal Separations Raw Data",
        }
    }

    /// Infer the dataset from a file name prefix such as
    /// `accessions_202512_1_2026-02-20.txt`.
    pub fn from_filename(filename: &str) -> Option<Dataset> {
        let lower = filename.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|dataset| lower.starts_with(dataset.as_str()))
    }
}

impl std::str::FromStr for Dataset {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employment" => Ok(Dataset::Employment),
            "accessions" => Ok(Dataset::Accessions),
            "separations" => Ok(Dataset::Separations),
            other => Err(CommonError::InvalidDataset(other.to_string())),
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Year-month reporting period (`YYYYMM`) taken from a file name.
///
/// Metadata only: it is never checked against the file contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotPeriod(String);

fn snapshot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(r"_(\d{6})_").expect("snapshot pattern is valid"))
}

impl SnapshotPeriod {
    /// Extract the first `_YYYYMM_` token from the base name of `filename`
    pub fn from_filename(filename: &str) -> Option<Self> {
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        snapshot_pattern()
            .captures(base)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
    }

    pub fn new(period: impl Into<String>) -> Self {
        Self(period.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an import record: `pending` until exactly one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Complete,
    Error,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Complete => "complete",
            ImportStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImportStatus::Pending)
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "complete" => Ok(ImportStatus::Complete),
            "error" => Ok(ImportStatus::Error),
            other => Err(CommonError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
