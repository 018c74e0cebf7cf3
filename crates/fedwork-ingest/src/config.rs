//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, IngestResult};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5433/fedwork";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default cache revalidation endpoint of the web front end.
pub const DEFAULT_REVALIDATE_URL: &str = "http://localhost:3000/api/revalidate";

/// Default shared token for the revalidation endpoint (development only).
pub const DEFAULT_REVALIDATE_TOKEN: &str = "fedwork-dev-token-2024";

/// Default revalidation request timeout in seconds.
pub const DEFAULT_REVALIDATE_TIMEOUT_SECS: u64 = 5;

/// Default directory scanned by `sync`.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default size of each chunk pulled from the transform and sent to COPY.
pub const DEFAULT_COPY_CHUNK_BYTES: usize = crate::loader::DEFAULT_CHUNK_SIZE;

/// Importer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub revalidate: RevalidateConfig,
    pub data_dir: PathBuf,
    pub copy_chunk_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Cache revalidation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalidateConfig {
    pub url: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl RevalidateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parsed("DB_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: env_parsed("DB_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            revalidate: RevalidateConfig {
                url: std::env::var("REVALIDATE_URL")
                    .unwrap_or_else(|_| DEFAULT_REVALIDATE_URL.to_string()),
                token: std::env::var("REVALIDATE_TOKEN")
                    .unwrap_or_else(|_| DEFAULT_REVALIDATE_TOKEN.to_string()),
                timeout_secs: env_parsed("REVALIDATE_TIMEOUT")
                    .unwrap_or(DEFAULT_REVALIDATE_TIMEOUT_SECS),
            },
            data_dir: std::env::var("FEDWORK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            copy_chunk_bytes: env_parsed("FEDWORK_COPY_CHUNK_BYTES")
                .unwrap_or(DEFAULT_COPY_CHUNK_BYTES),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.revalidate.url.is_empty() {
            return Err(IngestError::Config("Revalidation URL cannot be empty".to_string()));
        }

        if self.copy_chunk_bytes == 0 {
            return Err(IngestError::Config(
                "Copy chunk size must be greater than 0".to_string(),
            ));
        }

        if self.revalidate.token == DEFAULT_REVALIDATE_TOKEN {
            tracing::warn!("REVALIDATE_TOKEN not set - using the development token");
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            revalidate: RevalidateConfig {
                url: DEFAULT_REVALIDATE_URL.to_string(),
                token: DEFAULT_REVALIDATE_TOKEN.to_string(),
                timeout_secs: DEFAULT_REVALIDATE_TIMEOUT_SECS,
            },
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            copy_chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
        }
    }
}
