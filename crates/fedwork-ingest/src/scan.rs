//! Discovery of data files already present on local disk

use fedwork_common::types::Dataset;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// A data file found by [`scan_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDataFile {
    pub dataset: Dataset,
    pub path: PathBuf,
}

impl LocalDataFile {
    pub fn filename(&self) -> String {
        file_name(&self.path)
    }
}

/// Final path component as text, or the whole path if there is none
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `.txt` files in `dir` whose name starts with a dataset token, sorted by name
pub async fn scan_directory(dir: &Path) -> IngestResult<Vec<LocalDataFile>> {
    if !dir.is_dir() {
        return Err(IngestError::FileNotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
            continue;
        }
        let name = file_name(&path);
        match Dataset::from_filename(&name) {
            Some(dataset) => files.push(LocalDataFile { dataset, path }),
            None => debug!(file = %name, "skipping file without a dataset prefix"),
        }
    }

    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(files)
}
