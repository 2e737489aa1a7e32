//! Metadata Store - fetches agenda metadata documents
//!
//! A 404 means the agenda simply has no metadata yet and resolves to
//! `Ok(None)`. Only transport failures and 5xx responses are errors, and
//! those are logged and skipped by [`MetadataSource::fetch_all`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::document::AgendaMetadataDocument;
use super::MetadataError;
use crate::agenda::DescriptiveFields;

/// Default number of concurrent metadata fetches in `fetch_all`
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Source of agenda metadata content
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch metadata for `id`; `Ok(None)` when none exists
    async fn fetch(&self, id: u64) -> Result<Option<DescriptiveFields>, MetadataError>;

    /// Maximum in-flight fetches for `fetch_all`
    fn fetch_concurrency(&self) -> usize {
        DEFAULT_FETCH_CONCURRENCY
    }

    /// Fetch many ids concurrently. Only ids that resolved to a document are
    /// present in the result; absences and failures are left out.
    async fn fetch_all(&self, ids: &[u64]) -> HashMap<u64, DescriptiveFields> {
        stream::iter(ids.iter().copied())
            .map(|id| async move { (id, self.fetch(id).await) })
            .buffer_unordered(self.fetch_concurrency().max(1))
            .filter_map(|(id, result)| async move {
                match result {
                    Ok(Some(fields)) => Some((id, fields)),
                    Ok(None) => {
                        debug!(id, "No metadata for agenda");
                        None
                    }
                    Err(e) => {
                        warn!(id, error = %e, "Metadata fetch failed");
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct MetadataStoreConfig {
    /// Base URL of the metadata host
    pub base_url: String,
    /// Network path segment (e.g. "mainnet", "sepolia")
    pub network: String,
    /// File name prefix, `{record_type}-{id}.json`
    pub record_type: String,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for MetadataStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/data/agendas".to_string(),
            network: "mainnet".to_string(),
            record_type: "agenda".to_string(),
            timeout: Duration::from_secs(10),
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// HTTP implementation of [`MetadataSource`]
pub struct HttpMetadataStore {
    client: Client,
    config: MetadataStoreConfig,
}

impl HttpMetadataStore {
    pub fn new(config: MetadataStoreConfig) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MetadataError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Document URL for `id`
    pub fn document_url(&self, id: u64) -> String {
        format!(
            "{}/{}/{}-{}.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.network,
            self.config.record_type,
            id
        )
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataStore {
    async fn fetch(&self, id: u64) -> Result<Option<DescriptiveFields>, MetadataError> {
        let url = self.document_url(id);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(MetadataError::Server {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let doc: AgendaMetadataDocument = response
            .json()
            .await
            .map_err(|e| MetadataError::InvalidDocument(format!("{}: {}", url, e)))?;

        if doc.id != id {
            return Err(MetadataError::InvalidDocument(format!(
                "{} declares id {}",
                url, doc.id
            )));
        }

        Ok(Some(doc.into_descriptive()))
    }

    fn fetch_concurrency(&self) -> usize {
        self.config.concurrency
    }
}
