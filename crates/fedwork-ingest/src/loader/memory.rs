//! In-memory bulk loader mirroring the COPY semantics the pipeline relies on
//!
//! Rows are staged while the stream is consumed and appended to the table
//! only after the whole stream parsed cleanly, so a rejected row leaves the
//! table untouched. Fields are split on the delimiter without CSV quoting.

use async_trait::async_trait;
use fedwork_common::types::Dataset;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

use super::{BulkLoader, LoadOutcome, LoadTarget};
use crate::error::{IngestError, IngestResult};
use crate::schema::FIELD_DELIMITER;
use crate::transform::{ChunkSource, NULL_SENTINEL};

/// A stored field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Text(String),
    /// Numeric value kept in its source spelling
    Numeric(String),
}

pub type Row = BTreeMap<String, Value>;

/// Tables held in process memory
#[derive(Default)]
pub struct MemoryBulkLoader {
    tables: Mutex<HashMap<Dataset, Vec<Row>>>,
}

struct RowParser<'a> {
    target: &'a LoadTarget,
    numeric: HashSet<&'a str>,
    header_seen: bool,
    /// Whether the header ended in `\r\n`; every later line must match
    crlf: bool,
    line_number: u64,
    staged: Vec<Row>,
}

impl<'a> RowParser<'a> {
    fn new(target: &'a LoadTarget) -> Self {
        Self {
            target,
            numeric: target.numeric_columns.iter().map(String::as_str).collect(),
            header_seen: false,
            crlf: false,
            line_number: 0,
            staged: Vec::new(),
        }
    }

    /// `line` excludes the `\n`; `terminated` is false only for a final line
    /// that had none.
    fn push_line(&mut self, line: &[u8], terminated: bool) -> IngestResult<()> {
        self.line_number += 1;
        if !self.header_seen {
            self.header_seen = true;
            self.crlf = terminated && line.ends_with(b"\r");
            return Ok(());
        }

        let line = match line.strip_suffix(b"\r") {
            Some(body) if self.crlf => body,
            Some(_) if terminated => {
                return Err(IngestError::load(
                    self.target.table(),
                    format!("line {}: literal carriage return found in data", self.line_number),
                ))
            },
            _ if terminated && self.crlf => {
                return Err(IngestError::load(
                    self.target.table(),
                    format!("line {}: unquoted newline found in data", self.line_number),
                ))
            },
            _ => line,
        };
        let text = std::str::from_utf8(line).map_err(|_| {
            IngestError::load(
                self.target.table(),
                format!("line {}: invalid UTF-8", self.line_number),
            )
        })?;

        let fields: Vec<&str> = text.split(FIELD_DELIMITER as char).collect();
        if fields.len() != self.target.columns.len() {
            return Err(IngestError::load(
                self.target.table(),
                format!(
                    "line {}: expected {} fields, found {}",
                    self.line_number,
                    self.target.columns.len(),
                    fields.len()
                ),
            ));
        }

        let mut row = Row::new();
        for (column, field) in self.target.columns.iter().zip(fields) {
            let value = if field == NULL_SENTINEL {
                Value::Null
            } else if self.numeric.contains(column.as_str()) {
                if field.parse::<f64>().is_err() {
                    return Err(IngestError::load(
                        self.target.table(),
                        format!(
                            "line {}: invalid input syntax for type numeric: \"{}\" (column {})",
                            self.line_number, field, column
                        ),
                    ));
                }
                Value::Numeric(field.to_string())
            } else {
                Value::Text(field.to_string())
            };
            row.insert(column.clone(), value);
        }

        self.staged.push(row);
        Ok(())
    }
}

impl MemoryBulkLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of the dataset's table
    pub fn rows(&self, dataset: Dataset) -> Vec<Row> {
        let tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.get(&dataset).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, dataset: Dataset) -> usize {
        self.rows(dataset).len()
    }
}

#[async_trait]
impl BulkLoader for MemoryBulkLoader {
    async fn load(&self, target: &LoadTarget, source: &mut dyn ChunkSource) -> IngestResult<LoadOutcome> {
        let mut parser = RowParser::new(target);
        let mut partial: Vec<u8> = Vec::new();
        let mut bytes_sent = 0u64;

        loop {
            let chunk = source.next_chunk(target.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            bytes_sent += chunk.len() as u64;
            partial.extend_from_slice(&chunk);

            let mut start = 0;
            while let Some(offset) = partial[start..].iter().position(|b| *b == b'\n') {
                parser.push_line(&partial[start..start + offset], true)?;
                start += offset + 1;
            }
            partial.drain(..start);
        }
        if !partial.is_empty() {
            parser.push_line(&partial, false)?;
        }

        let rows_copied = parser.staged.len() as u64;
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| IngestError::load(target.table(), format!("table lock poisoned: {}", e)))?;
        let table = tables.entry(target.dataset).or_default();
        table.extend(parser.staged);
        let table_total = i64::try_from(table.len()).ok();

        debug!(table = target.table(), rows_copied, "memory load committed");
        Ok(LoadOutcome {
            rows_copied,
            table_total,
            bytes_sent,
        })
    }
}
