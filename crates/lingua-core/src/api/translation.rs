//! Loading translators and translating text.

use crate::cancel::CancellationToken;
use crate::error::{LinguaError, Result};
use crate::fetch::ProgressCallback;
use crate::loader::TranslatorHandle;
use crate::pair::LanguagePair;
use crate::LinguaApi;
use tracing::{debug, info};

impl LinguaApi {
    fn pair(source: &str, target: &str) -> Result<LanguagePair> {
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return Err(LinguaError::InvalidParams {
                message: "source and target languages are required".to_string(),
            });
        }
        let pair = LanguagePair::new(source, target);
        if pair.is_same_language() {
            return Err(LinguaError::PairUnavailable { pair: pair.key() });
        }
        Ok(pair)
    }

    /// Make sure a translator for the pair is loaded.
    ///
    /// `cancel` aborts the load if this call starts it; [`cancel`](Self::cancel)
    /// aborts it regardless of who started it.
    pub async fn load(
        &self,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TranslatorHandle> {
        let pair = Self::pair(source, target)?;
        self.loader.get_or_load(&pair, cancel, on_progress).await
    }

    /// Translate `text`, loading the pair's translator first if needed.
    pub async fn translate(
        &self,
        source: &str,
        target: &str,
        text: &str,
        html: bool,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String> {
        let pair = Self::pair(source, target)?;
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let handle = self
            .loader
            .get_or_load(&pair, &CancellationToken::new(), on_progress)
            .await?;

        match handle.translate(text, html).await {
            Ok(translated) => Ok(translated),
            Err(e @ LinguaError::WorkerLost { .. }) => {
                self.loader.discard(&handle).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Abort any load for the pair and drop its translator. Idempotent.
    pub async fn cancel(&self, source: &str, target: &str) -> bool {
        let pair = LanguagePair::new(source.trim(), target.trim());
        self.loader.cancel(&pair).await
    }

    /// Dispose the pair's translator, keeping its model files.
    pub async fn unload(&self, source: &str, target: &str) -> bool {
        let pair = LanguagePair::new(source.trim(), target.trim());
        self.loader.unload(&pair).await
    }

    /// Dispose the pair's translator and delete its downloaded files.
    ///
    /// Files are stored per direct hop, so a pivot pair removes both hop
    /// directories. Hops still used by another loaded or loading translator
    /// are kept. Returns the hops whose files were deleted.
    pub async fn remove_model_files(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Vec<LanguagePair>> {
        let pair = Self::pair(source, target)?;
        self.loader.unload(&pair).await;

        let catalog = self.registry.get_catalog().await;
        let registry = catalog.registry();
        // Without a route only the pair's own directory can hold files.
        let hops = self
            .paths
            .hops(registry, &pair)
            .unwrap_or_else(|| vec![pair.clone()]);

        let mut in_use = self.loader.translators().hops_in_use();
        for key in self.loader.loading_pairs() {
            if let Some(loading_hops) = key
                .parse::<LanguagePair>()
                .ok()
                .and_then(|loading| self.paths.hops(registry, &loading))
            {
                in_use.extend(loading_hops.iter().map(LanguagePair::key));
            }
        }

        let mut removed = Vec::new();
        for hop in hops {
            if in_use.contains(&hop.key()) {
                debug!("Keeping model files for {}, still in use", hop);
                continue;
            }
            if self.model_cache.remove_pair(&hop).await? {
                removed.push(hop);
            }
        }
        Ok(removed)
    }

    pub fn is_loaded(&self, source: &str, target: &str) -> bool {
        self.loader
            .is_loaded(&LanguagePair::new(source.trim(), target.trim()))
    }

    /// Pairs with a ready translator.
    pub fn loaded_pairs(&self) -> Vec<LanguagePair> {
        self.loader.translators().pairs()
    }

    /// Cancel all loads and dispose all translators.
    pub async fn shutdown(&self) {
        info!("Shutting down Lingua");
        self.loader.shutdown().await;
        debug!("Lingua shut down");
    }
}
