//! Where registry documents come from.

use crate::error::Result;
use crate::network::HttpClient;
use async_trait::async_trait;
use tracing::debug;

/// Supplies the raw bytes of the registry document.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Fetch the current registry document.
    async fn fetch(&self) -> Result<Vec<u8>>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// Registry served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistrySource {
    http: HttpClient,
    url: String,
}

impl HttpRegistrySource {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let response = self.http.get(&self.url).await?;
        let body = response.bytes().await?;
        debug!("Fetched {} byte registry from {}", body.len(), self.url);
        Ok(body.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
