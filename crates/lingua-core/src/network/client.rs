//! HTTP client wrapper shared by the registry and model file fetchers.
//!
//! Two reqwest clients are kept: one with a total request timeout for small
//! JSON documents, and one with only a connect timeout for model files, whose
//! total duration is bounded by the fetcher's per-file timeout instead.

use crate::config::{AppConfig, FetchConfig, RegistryConfig};
use crate::error::{LinguaError, Result};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// HTTP client used for registry and model file requests.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    download_client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_timeout(RegistryConfig::ATTEMPT_TIMEOUT)
    }

    /// Create a new HTTP client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| LinguaError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        let download_client = Client::builder()
            .connect_timeout(FetchConfig::CONNECT_TIMEOUT)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| LinguaError::Network {
                message: format!("Failed to create download HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            download_client,
        })
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET a small document; non-success statuses become `Network` errors.
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LinguaError::Timeout(RegistryConfig::ATTEMPT_TIMEOUT)
            } else {
                LinguaError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    source: Some(e),
                }
            }
        })?;
        Self::check_status(response, url)
    }

    /// GET a model file without a total timeout.
    pub async fn get_download(&self, url: &str) -> Result<Response> {
        debug!("GET (download) {}", url);
        let response = self.download_client.get(url).send().await.map_err(|e| {
            LinguaError::ModelFileFetchFailed {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinguaError::ModelFileFetchFailed {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        Ok(response)
    }

    fn check_status(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(LinguaError::Network {
            message: format!(
                "GET {} returned {}{}",
                url,
                status,
                if Self::is_retryable_status(status) {
                    " (transient)"
                } else {
                    ""
                }
            ),
            source: None,
        })
    }

    /// Check if an HTTP status is worth retrying.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
    }
}
