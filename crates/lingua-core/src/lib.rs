//! Lingua Core - orchestration for local, model-based translation.
//!
//! Discovers which language pairs a model registry can serve, routes pairs
//! without a direct model through a hub language, downloads and caches the
//! model files, and keeps one worker per pair ready to translate. Concurrent
//! requests for the same pair share a single load; loads can be cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use lingua_core::LinguaApi;
//!
//! #[tokio::main]
//! async fn main() -> lingua_core::Result<()> {
//!     let api = LinguaApi::builder()
//!         .registry_url("https://models.example.org/models.json")
//!         .storage_base_url("https://models.example.org/files/")
//!         .build()
//!         .await?;
//!
//!     let info = api.resolve_pair("ja", "fr").await;
//!     println!("ja → fr: {:?}", info);
//!
//!     let text = api.translate("ja", "fr", "こんにちは", false, None).await?;
//!     println!("{}", text);
//!
//!     api.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod network;
pub mod pair;
pub mod registry;
pub mod rpc;

mod api;

pub use api::LinguaApiBuilder;
pub use cancel::{CancellationToken, CancelledError};
pub use error::{LinguaError, LoadStage, Result};
pub use fetch::{
    FetchedBody, FileFetcher, FileRole, HttpFileFetcher, LoadPhase, LoadProgress, LocalModel,
    ModelFileDescriptor, ProgressCallback,
};
pub use loader::{LoaderCoordinator, TranslatorHandle};
pub use pair::LanguagePair;
pub use registry::{
    HttpRegistrySource, ModelsJsonParser, Registry, RegistryParser, RegistrySource,
    TranslationPairInfo,
};
pub use rpc::{
    InProcessSpawner, ProcessSpawner, TranslateRequest, TranslateResponse, TranslationEngine,
    WorkerSpawner,
};

use fetch::ModelCache;
use registry::{PathResolver, RegistryResolver};
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point to the orchestrator.
///
/// Owns the registry cache, the translator cache and the in-flight load
/// table. Build one with [`LinguaApi::builder`] and call
/// [`shutdown`](LinguaApi::shutdown) when done.
pub struct LinguaApi {
    cache_dir: PathBuf,
    registry: Arc<RegistryResolver>,
    paths: PathResolver,
    model_cache: ModelCache,
    loader: LoaderCoordinator,
}

impl LinguaApi {
    /// Create a builder for LinguaApi.
    pub fn builder() -> LinguaApiBuilder {
        LinguaApiBuilder::new()
    }

    /// Directory holding downloaded model files.
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Language used as the intermediate for pivot routes.
    pub fn hub_language(&self) -> &str {
        self.paths.hub()
    }

    /// The loader, for callers that manage handles directly.
    pub fn loader(&self) -> &LoaderCoordinator {
        &self.loader
    }
}
