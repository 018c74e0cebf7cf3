//! Best-effort cache revalidation after a successful import
//!
//! The web front end caches filter options and summary stats. After new rows
//! land, the importer POSTs a shared token to its revalidation endpoint. A
//! failure here never changes the outcome of the import.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Why a revalidation call did not succeed
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("could not reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("revalidation returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[async_trait]
pub trait CacheNotifier: Send + Sync {
    async fn notify(&self) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct RevalidateRequest<'a> {
    token: &'a str,
}

/// Notifier calling the front end's revalidation endpoint
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CacheNotifier for HttpNotifier {
    async fn notify(&self) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RevalidateRequest { token: &self.token })
            .send()
            .await
            .map_err(|source| NotifyError::Unreachable {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(url = %self.url, "cache revalidated");
        Ok(())
    }
}

/// Notifier that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl CacheNotifier for NoopNotifier {
    async fn notify(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[async_trait]
impl<T: CacheNotifier + ?Sized> CacheNotifier for Box<T> {
    async fn notify(&self) -> Result<(), NotifyError> {
        (**self).notify().await
    }
}
