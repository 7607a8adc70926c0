//! Builder for configuring LinguaApi initialization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LoaderConfig, WorkerConfig};
use crate::error::{LinguaError, Result};
use crate::fetch::{FileFetcher, HttpFileFetcher, ModelCache, ModelFetcher};
use crate::loader::LoaderCoordinator;
use crate::network::{HttpClient, RetryConfig};
use crate::registry::{
    HttpRegistrySource, ModelsJsonParser, PathResolver, RegistryParser, RegistryResolver,
    RegistrySource,
};
use crate::rpc::{ProcessSpawner, WorkerSpawner};
use crate::LinguaApi;

/// Builder for configuring LinguaApi initialization.
///
/// The registry location and the storage base URL are required unless a
/// custom [`RegistrySource`] and [`RegistryParser`] are supplied.
///
/// # Example
///
/// ```rust,ignore
/// use lingua_core::LinguaApi;
///
/// let api = LinguaApi::builder()
///     .registry_url("https://models.example.org/models.json")
///     .storage_base_url("https://models.example.org/files/")
///     .cache_dir("/var/cache/lingua")
///     .worker_command("/opt/lingua/bin/lingua-worker")
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct LinguaApiBuilder {
    registry_url: Option<String>,
    storage_base_url: Option<String>,
    cache_dir: Option<PathBuf>,
    hub_language: Option<String>,
    proxy: Option<String>,
    worker_command: Option<PathBuf>,
    worker_args: Vec<String>,
    registry_source: Option<Arc<dyn RegistrySource>>,
    registry_parser: Option<Arc<dyn RegistryParser>>,
    file_fetcher: Option<Arc<dyn FileFetcher>>,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    registry_retry: Option<RetryConfig>,
    file_timeout: Option<Duration>,
    init_timeout: Option<Duration>,
}

impl LinguaApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL of the registry document.
    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    /// Base URL that registry file paths are joined onto.
    pub fn storage_base_url(mut self, url: impl Into<String>) -> Self {
        self.storage_base_url = Some(url.into());
        self
    }

    /// Directory for downloaded model files.
    ///
    /// Default: `<user cache dir>/lingua`
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Intermediate language for pivot routes.
    ///
    /// Default: `en`
    pub fn hub_language(mut self, language: impl Into<String>) -> Self {
        self.hub_language = Some(language.into());
        self
    }

    /// Fetch model files through a proxy (`{proxy}?url=<file url>`).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Executable started once per loaded pair.
    ///
    /// Default: `lingua-worker` on PATH
    pub fn worker_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.worker_command = Some(command.into());
        self
    }

    pub fn worker_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replace where the registry document comes from.
    pub fn registry_source(mut self, source: Arc<dyn RegistrySource>) -> Self {
        self.registry_source = Some(source);
        self
    }

    /// Replace how the registry document is interpreted.
    pub fn registry_parser(mut self, parser: Arc<dyn RegistryParser>) -> Self {
        self.registry_parser = Some(parser);
        self
    }

    /// Replace how model file bytes are retrieved.
    pub fn file_fetcher(mut self, fetcher: Arc<dyn FileFetcher>) -> Self {
        self.file_fetcher = Some(fetcher);
        self
    }

    /// Replace how workers are started.
    pub fn worker_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn registry_retry(mut self, retry: RetryConfig) -> Self {
        self.registry_retry = Some(retry);
        self
    }

    pub fn file_timeout(mut self, timeout: Duration) -> Self {
        self.file_timeout = Some(timeout);
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    fn resolve_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join(AppConfig::CACHE_DIR_NAME))
            .ok_or_else(|| LinguaError::Config {
                message: "No user cache directory on this platform; set cache_dir".to_string(),
            })
    }

    /// Build the LinguaApi instance.
    pub async fn build(self) -> Result<LinguaApi> {
        let cache_dir = self.resolve_cache_dir()?;
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| LinguaError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(cache_dir.clone()),
                source: Some(e),
            })?;

        let hub = self
            .hub_language
            .unwrap_or_else(|| LoaderConfig::DEFAULT_HUB_LANGUAGE.to_string());
        if hub.trim().is_empty() {
            return Err(LinguaError::Config {
                message: "hub language must not be empty".to_string(),
            });
        }

        let mut http = None;

        let source: Arc<dyn RegistrySource> = match self.registry_source {
            Some(source) => source,
            None => {
                let url = self.registry_url.ok_or_else(|| LinguaError::Config {
                    message: "registry_url is required unless a registry source is supplied"
                        .to_string(),
                })?;
                Arc::new(HttpRegistrySource::new(shared_http(&mut http)?, url))
            }
        };

        let parser: Arc<dyn RegistryParser> = match self.registry_parser {
            Some(parser) => parser,
            None => {
                let base = self.storage_base_url.ok_or_else(|| LinguaError::Config {
                    message: "storage_base_url is required unless a registry parser is supplied"
                        .to_string(),
                })?;
                Arc::new(ModelsJsonParser::new(&base)?)
            }
        };

        let fetcher: Arc<dyn FileFetcher> = match self.file_fetcher {
            Some(fetcher) => fetcher,
            None => {
                let fetcher = HttpFileFetcher::new(shared_http(&mut http)?);
                Arc::new(match self.proxy {
                    Some(proxy) => fetcher.with_proxy(proxy),
                    None => fetcher,
                })
            }
        };

        let spawner: Arc<dyn WorkerSpawner> = match self.spawner {
            Some(spawner) => spawner,
            None => {
                let spawner = match self.worker_command {
                    Some(command) => ProcessSpawner::new(command),
                    None => ProcessSpawner::default(),
                };
                Arc::new(spawner.with_args(self.worker_args))
            }
        };

        let mut resolver = RegistryResolver::new(source, parser);
        if let Some(retry) = self.registry_retry {
            resolver = resolver.with_retry(retry);
        }
        let registry = Arc::new(resolver);

        let model_cache = ModelCache::new(&cache_dir);
        let mut model_fetcher = ModelFetcher::new(fetcher, model_cache.clone());
        if let Some(timeout) = self.file_timeout {
            model_fetcher = model_fetcher.with_file_timeout(timeout);
        }

        let paths = PathResolver::new(hub.trim());
        let loader = LoaderCoordinator::new(
            registry.clone(),
            paths.clone(),
            model_fetcher,
            spawner,
            self.init_timeout.unwrap_or(WorkerConfig::INIT_TIMEOUT),
        );

        tracing::info!(
            "Lingua ready (cache: {}, hub: {})",
            cache_dir.display(),
            paths.hub()
        );

        Ok(LinguaApi {
            cache_dir,
            registry,
            paths,
            model_cache,
            loader,
        })
    }
}

/// One HTTP client shared by the default registry source and file fetcher.
fn shared_http(slot: &mut Option<HttpClient>) -> Result<HttpClient> {
    if let Some(client) = slot {
        return Ok(client.clone());
    }
    let client = HttpClient::new()?;
    *slot = Some(client.clone());
    Ok(client)
}
