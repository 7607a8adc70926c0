//! Direct versus pivot routing between two languages.

use crate::pair::LanguagePair;
use crate::registry::types::Registry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether and how a language pair can be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPairInfo {
    pub available: bool,
    pub is_direct: bool,
    pub is_pivot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pivot_path: Option<String>,
    pub model_count: u8,
}

impl TranslationPairInfo {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            is_direct: false,
            is_pivot: false,
            pivot_path: None,
            model_count: 0,
        }
    }

    fn direct() -> Self {
        Self {
            available: true,
            is_direct: true,
            is_pivot: false,
            pivot_path: None,
            model_count: 1,
        }
    }

    fn pivot(source: &str, hub: &str, target: &str) -> Self {
        Self {
            available: true,
            is_direct: false,
            is_pivot: true,
            pivot_path: Some(format!("{} → {} → {}", source, hub, target)),
            model_count: 2,
        }
    }
}

/// Decides how to route a pair through the registry.
#[derive(Debug, Clone)]
pub struct PathResolver {
    hub: String,
}

impl PathResolver {
    pub fn new(hub: impl Into<String>) -> Self {
        Self { hub: hub.into() }
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn resolve(&self, registry: &Registry, source: &str, target: &str) -> TranslationPairInfo {
        if source == target {
            return TranslationPairInfo::unavailable();
        }
        if registry.has_direct(source, target) {
            return TranslationPairInfo::direct();
        }
        if self.pivot_allowed(source, target)
            && registry.has_direct(source, &self.hub)
            && registry.has_direct(&self.hub, target)
        {
            return TranslationPairInfo::pivot(source, &self.hub, target);
        }
        TranslationPairInfo::unavailable()
    }

    /// Direct hops to load for a pair, in translation order.
    ///
    /// `None` when the pair cannot be served.
    pub fn hops(&self, registry: &Registry, pair: &LanguagePair) -> Option<Vec<LanguagePair>> {
        let info = self.resolve(registry, &pair.source, &pair.target);
        if info.is_direct {
            Some(vec![pair.clone()])
        } else if info.is_pivot {
            Some(vec![
                LanguagePair::new(pair.source.clone(), self.hub.clone()),
                LanguagePair::new(self.hub.clone(), pair.target.clone()),
            ])
        } else {
            None
        }
    }

    /// For every source, the targets reachable only through the hub.
    ///
    /// Sources with no pivot-only target are omitted.
    pub fn pivot_only_targets(&self, registry: &Registry) -> BTreeMap<String, BTreeSet<String>> {
        let hub_targets = match registry.targets(&self.hub) {
            Some(targets) => targets,
            None => return BTreeMap::new(),
        };

        let mut result = BTreeMap::new();
        for source in registry.sources() {
            if source == self.hub || !registry.has_direct(source, &self.hub) {
                continue;
            }
            let pivot_targets: BTreeSet<String> = hub_targets
                .iter()
                .filter(|target| {
                    target.as_str() != source
                        && target.as_str() != self.hub
                        && !registry.has_direct(source, target)
                })
                .cloned()
                .collect();
            if !pivot_targets.is_empty() {
                result.insert(source.to_string(), pivot_targets);
            }
        }
        result
    }

    // Requests that already start or end at the hub are direct-only.
    fn pivot_allowed(&self, source: &str, target: &str) -> bool {
        source != self.hub && target != self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_pairs([
            LanguagePair::new("ja", "en"),
            LanguagePair::new("en", "fr"),
        ])
    }

    #[test]
    fn test_pivot_route() {
        let info = PathResolver::new("en").resolve(&registry(), "ja", "fr");
        assert!(info.available);
        assert!(info.is_pivot);
        assert!(!info.is_direct);
        assert_eq!(info.model_count, 2);
        assert_eq!(info.pivot_path.as_deref(), Some("ja → en → fr"));
    }

    #[test]
    fn test_direct_route() {
        let info = PathResolver::new("en").resolve(&registry(), "ja", "en");
        assert!(info.available);
        assert!(info.is_direct);
        assert_eq!(info.model_count, 1);
        assert!(info.pivot_path.is_none());
    }

    #[test]
    fn test_same_language_unavailable() {
        let info = PathResolver::new("en").resolve(&registry(), "ja", "ja");
        assert_eq!(info, TranslationPairInfo::unavailable());
    }

    #[test]
    fn test_hub_endpoints_never_pivot() {
        let hub_registry = Registry::from_pairs([
            LanguagePair::new("en", "de"),
            LanguagePair::new("de", "fr"),
        ]);
        // Would be en → de → fr with hub "de", but the source is the hub.
        let info = PathResolver::new("de").resolve(&hub_registry, "en", "fr");
        assert!(!info.available);

        let info = PathResolver::new("en").resolve(&registry(), "fr", "en");
        assert!(!info.available);
    }

    #[test]
    fn test_hops() {
        let resolver = PathResolver::new("en");
        let hops = resolver
            .hops(&registry(), &LanguagePair::new("ja", "fr"))
            .unwrap();
        assert_eq!(
            hops,
            vec![LanguagePair::new("ja", "en"), LanguagePair::new("en", "fr")]
        );
        assert_eq!(
            resolver.hops(&registry(), &LanguagePair::new("ja", "en")),
            Some(vec![LanguagePair::new("ja", "en")])
        );
        assert!(resolver
            .hops(&registry(), &LanguagePair::new("fr", "ja"))
            .is_none());
    }

    #[test]
    fn test_pivot_only_targets() {
        let registry = Registry::from_pairs([
            LanguagePair::new("ja", "en"),
            LanguagePair::new("ja", "de"),
            LanguagePair::new("en", "fr"),
            LanguagePair::new("en", "de"),
            LanguagePair::new("en", "ja"),
        ]);
        let targets = PathResolver::new("en").pivot_only_targets(&registry);

        assert_eq!(targets.len(), 1);
        let ja: Vec<&str> = targets["ja"].iter().map(String::as_str).collect();
        assert_eq!(ja, vec!["fr"]);
    }
}
