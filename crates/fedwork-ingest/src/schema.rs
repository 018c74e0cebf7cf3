//! Column mapping derived from a data file's header line
//!
//! The header names the source columns in order. Target column names come
//! from an explicit rename table, and columns listed as numeric are the only
//! positions the streaming transform is allowed to rewrite.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use tokio::io::AsyncBufReadExt;

use crate::error::{IngestError, IngestResult};

/// Field delimiter of the OPM export format.
pub const FIELD_DELIMITER: u8 = b'|';

/// Source columns that hold numeric values and may be empty in the export
pub const NUMERIC_COLUMNS: [&str; 3] = [
    "count",
    "annualized_adjusted_basic_pay",
    "length_of_service_years",
];

/// The generic `count` column is stored under a dataset-scoped name
pub const DEFAULT_RENAMES: [(&str, &str); 1] = [("count", "employee_count")];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Rename table and numeric column set applied to every header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRules {
    renames: Vec<(String, String)>,
    numeric: BTreeSet<String>,
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self {
            renames: DEFAULT_RENAMES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            numeric: NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl SchemaRules {
    /// Rules with no renames and no numeric columns
    pub fn empty() -> Self {
        Self {
            renames: Vec::new(),
            numeric: BTreeSet::new(),
        }
    }

    /// Add or replace the target name for `source`
    pub fn with_rename(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        self.renames.retain(|(from, _)| *from != source);
        self.renames.push((source, target.into()));
        self
    }

    pub fn with_numeric(mut self, column: impl Into<String>) -> Self {
        self.numeric.insert(column.into());
        self
    }

    pub fn target_for<'a>(&'a self, source: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(from, _)| from == source)
            .map(|(_, to)| to.as_str())
            .unwrap_or(source)
    }

    pub fn is_numeric(&self, source: &str) -> bool {
        self.numeric.contains(source)
    }
}

/// Ordered source → target column pairs plus the numeric positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: Vec<(String, String)>,
    numeric_indices: BTreeSet<usize>,
}

impl ColumnMapping {
    /// Build the mapping from the raw first line of a data file
    pub fn from_header(header: &str, rules: &SchemaRules) -> IngestResult<Self> {
        let line = header.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return Err(IngestError::schema("header line is empty"));
        }

        let mut columns = Vec::new();
        let mut numeric_indices = BTreeSet::new();
        let delimiter = FIELD_DELIMITER as char;

        for (index, source) in line.split(delimiter).enumerate() {
            if source.is_empty() {
                return Err(IngestError::schema(format!("column {} has an empty name", index + 1)));
            }
            let target = rules.target_for(source);
            for name in [source, target] {
                if !identifier_pattern().is_match(name) {
                    return Err(IngestError::schema(format!(
                        "column name '{}' is not a plain identifier",
                        name
                    )));
                }
            }
            if rules.is_numeric(source) {
                numeric_indices.insert(index);
            }
            columns.push((source.to_string(), target.to_string()));
        }

        let mut seen = BTreeSet::new();
        if let Some((_, duplicate)) = columns.iter().find(|(_, target)| !seen.insert(target.as_str())) {
            return Err(IngestError::schema(format!("duplicate target column '{}'", duplicate)));
        }

        Ok(Self {
            columns,
            numeric_indices,
        })
    }

    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(source, _)| source.as_str())
    }

    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|(_, target)| target.clone()).collect()
    }

    pub fn numeric_indices(&self) -> &BTreeSet<usize> {
        &self.numeric_indices
    }

    pub fn is_numeric(&self, index: usize) -> bool {
        self.numeric_indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Read only the first line of `path`
pub async fn read_header(path: &Path) -> IngestResult<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = tokio::io::BufReader::new(file);
    let mut header = String::new();

    let read = reader.read_line(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidData {
            IngestError::schema(format!("header of {} is not valid UTF-8", path.display()))
        } else {
            IngestError::Io(e)
        }
    })?;
    if read == 0 {
        return Err(IngestError::schema(format!("{} is empty", path.display())));
    }

    Ok(header)
}
