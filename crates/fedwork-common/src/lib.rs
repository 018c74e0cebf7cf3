//! Fedwork Common Library
//!
//! Shared types, utilities, and error handling for the fedwork workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: content fingerprints used to deduplicate imports
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: the closed set of OPM datasets and import metadata
//!
//! # Example
//!
//! ```no_run
//! use fedwork_common::checksum::Fingerprint;
//! use fedwork_common::types::Dataset;
//!
//! fn fingerprint(path: &str) -> fedwork_common::Result<()> {
//!     let dataset: Dataset = "accessions".parse()?;
//!     let fingerprint = Fingerprint::of_file(path)?;
//!     println!("{} {}", dataset, fingerprint.short());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
