//! Registry queries: which pairs exist and how they route.

use crate::registry::{Registry, TranslationPairInfo};
use crate::LinguaApi;
use std::collections::{BTreeMap, BTreeSet};

impl LinguaApi {
    /// Directly served pairs. Empty when the registry cannot be reached.
    pub async fn language_pairs(&self) -> Registry {
        self.registry.get_pairs().await
    }

    /// Whether `source → target` can be served, directly or through the hub.
    pub async fn resolve_pair(&self, source: &str, target: &str) -> TranslationPairInfo {
        let registry = self.registry.get_pairs().await;
        self.paths.resolve(&registry, source, target)
    }

    /// For every source, the targets reachable only through the hub.
    pub async fn pivot_targets(&self) -> BTreeMap<String, BTreeSet<String>> {
        let registry = self.registry.get_pairs().await;
        self.paths.pivot_only_targets(&registry)
    }

    /// Forget the cached registry; the next query fetches it again.
    pub async fn clear_registry_cache(&self) {
        self.registry.clear_cache().await;
    }
}
