//! Cached, retrying access to the model registry.

use crate::error::{LinguaError, Result};
use crate::network::{retry_async, RetryConfig};
use crate::registry::parser::RegistryParser;
use crate::registry::source::RegistrySource;
use crate::registry::types::{ModelCatalog, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;

/// Fetches the registry once and serves the parsed catalog until invalidated.
///
/// The cache slot is guarded by an async mutex held across the fetch, so
/// concurrent first callers share a single in-flight request rather than
/// each hitting the network.
pub struct RegistryResolver {
    source: Arc<dyn RegistrySource>,
    parser: Arc<dyn RegistryParser>,
    retry: RetryConfig,
    attempt_timeout: Duration,
    cached: Mutex<Option<Arc<ModelCatalog>>>,
}

impl RegistryResolver {
    pub fn new(source: Arc<dyn RegistrySource>, parser: Arc<dyn RegistryParser>) -> Self {
        Self {
            source,
            parser,
            retry: RetryConfig::registry(),
            attempt_timeout: RegistryConfig::ATTEMPT_TIMEOUT,
            cached: Mutex::new(None),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn parser(&self) -> &Arc<dyn RegistryParser> {
        &self.parser
    }

    /// Parsed catalog, fetching it if nothing is cached.
    ///
    /// Never fails: when every attempt fails an empty catalog is returned and
    /// nothing is cached, so the next call tries again.
    pub async fn get_catalog(&self) -> Arc<ModelCatalog> {
        let mut slot = self.cached.lock().await;
        if let Some(catalog) = slot.as_ref() {
            return catalog.clone();
        }

        match self.fetch_with_retry().await {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                *slot = Some(catalog.clone());
                catalog
            }
            Err(e) => {
                warn!(
                    "Registry unavailable from {}, reporting no pairs: {}",
                    self.source.describe(),
                    e
                );
                Arc::new(ModelCatalog::empty())
            }
        }
    }

    /// Pair adjacency from the current catalog.
    pub async fn get_pairs(&self) -> Registry {
        self.get_catalog().await.registry().clone()
    }

    /// Drop the cached catalog; the next call fetches again.
    pub async fn clear_cache(&self) {
        let mut slot = self.cached.lock().await;
        if slot.take().is_some() {
            info!("Registry cache cleared");
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.lock().await.is_some()
    }

    async fn fetch_with_retry(&self) -> Result<ModelCatalog> {
        let (result, stats) = retry_async(
            &self.retry,
            |attempt| async move {
                debug!(
                    "Registry fetch attempt {}/{} from {}",
                    attempt + 1,
                    self.retry.max_attempts,
                    self.source.describe()
                );
                self.fetch_once().await
            },
            |e: &LinguaError| !matches!(e, LinguaError::Timeout(_)),
        )
        .await;

        match &result {
            Ok(catalog) => info!(
                "Registry loaded: {} pairs after {} attempt(s)",
                catalog.registry().pair_count(),
                stats.attempts
            ),
            Err(_) => warn!("Registry fetch gave up after {} attempt(s)", stats.attempts),
        }

        result.map_err(|e| match e {
            LinguaError::Timeout(d) => LinguaError::RegistryUnavailable {
                message: format!("timed out after {:?}", d),
            },
            other => LinguaError::RegistryUnavailable {
                message: other.to_string(),
            },
        })
    }

    async fn fetch_once(&self) -> Result<ModelCatalog> {
        let body = tokio::time::timeout(self.attempt_timeout, self.source.fetch())
            .await
            .map_err(|_| LinguaError::Timeout(self.attempt_timeout))??;
        self.parser.parse_catalog(&body)
    }
}
