//! Fedwork Ingest Library
//!
//! Bulk import of OPM pipe-delimited workforce exports (employment,
//! accessions, separations) into PostgreSQL, exactly once per distinct file
//! content.
//!
//! # Pipeline
//!
//! - [`schema`]: header line → ordered column mapping with renames
//! - [`transform`]: pull-based rewrite of empty numeric fields to a NULL token
//! - [`ledger`]: `pending → complete | error` record of every import attempt
//! - [`loader`]: all-or-nothing `COPY FROM STDIN` inside one transaction
//! - [`notify`]: best-effort cache revalidation of the web front end
//! - [`pipeline`]: the [`Importer`] tying the above together
//!
//! # Example
//!
//! ```no_run
//! use fedwork_common::types::Dataset;
//! use fedwork_ingest::ledger::PgImportLedger;
//! use fedwork_ingest::loader::PgBulkLoader;
//! use fedwork_ingest::notify::NoopNotifier;
//! use fedwork_ingest::{config::IngestConfig, db, Importer};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let importer = Importer::new(
//!         PgImportLedger::new(pool.clone()),
//!         PgBulkLoader::new(pool),
//!         NoopNotifier,
//!     );
//!     importer
//!         .import(Dataset::Accessions, Path::new("./data/accessions_202512_1.txt"))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod notify;
pub mod pipeline;
pub mod scan;
pub mod schema;
pub mod transform;

pub use error::{IngestError, IngestResult};
pub use pipeline::{ImportReport, ImportSummary, Importer, SyncSummary};
