//! Registry data types: the pair adjacency map and the parsed model catalog.

use crate::pair::LanguagePair;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Adjacency map from source language to the targets it reaches directly.
///
/// Rebuilt wholesale from every successful registry fetch and never mutated
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from direct pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = LanguagePair>,
    {
        let mut registry = Self::new();
        for pair in pairs {
            registry.insert(pair);
        }
        registry
    }

    pub(crate) fn insert(&mut self, pair: LanguagePair) {
        self.edges.entry(pair.source).or_default().insert(pair.target);
    }

    /// Targets directly reachable from `source`.
    pub fn targets(&self, source: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(source)
    }

    pub fn has_direct(&self, source: &str, target: &str) -> bool {
        self.edges
            .get(source)
            .map(|targets| targets.contains(target))
            .unwrap_or(false)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Every direct pair in the registry.
    pub fn pairs(&self) -> impl Iterator<Item = LanguagePair> + '_ {
        self.edges.iter().flat_map(|(source, targets)| {
            targets
                .iter()
                .map(move |target| LanguagePair::new(source.clone(), target.clone()))
        })
    }

    pub fn pair_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.edges
    }
}

/// A parsed registry document: adjacency plus the raw per-pair model entries.
///
/// The raw entries stay unparsed until a load needs them; the registry parser
/// turns them into file descriptors at that point.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    registry: Registry,
    entries: HashMap<String, Vec<serde_json::Value>>,
}

impl ModelCatalog {
    pub fn new(registry: Registry, entries: HashMap<String, Vec<serde_json::Value>>) -> Self {
        Self { registry, entries }
    }

    /// Catalog with no pairs; what callers see when the registry is unreachable.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Raw model entries listed for a direct pair.
    pub fn entries_for(&self, pair: &LanguagePair) -> Option<&[serde_json::Value]> {
        self.entries.get(&pair.key()).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
