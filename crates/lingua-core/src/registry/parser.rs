//! Registry parsing strategy.
//!
//! The default [`ModelsJsonParser`] understands the `models.json` layout:
//!
//! ```text
//! { "models": { "en-ja": [ { "releaseStatus": "Release",
//!                            "files": { "model": {"path", "hash"},
//!                                       "vocab" | "srcVocab" + "trgVocab": {"path"},
//!                                       "lexicalShortlist"?: {"path"} } } ] } }
//! ```
//!
//! Other layouts plug in by implementing [`RegistryParser`].

use crate::config::RegistryConfig;
use crate::error::{LinguaError, Result};
use crate::fetch::descriptor::{FileRole, ModelFileDescriptor};
use crate::pair::LanguagePair;
use crate::registry::types::{ModelCatalog, Registry};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Turns registry bytes into a catalog and raw entries into file descriptors.
pub trait RegistryParser: Send + Sync {
    /// Validate and parse a registry document.
    fn parse_catalog(&self, body: &[u8]) -> Result<ModelCatalog>;

    /// Pick one model among a pair's raw entries and list its files.
    fn model_files(
        &self,
        pair: &LanguagePair,
        entries: &[serde_json::Value],
    ) -> Result<Vec<ModelFileDescriptor>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModelEntry {
    #[serde(default)]
    release_status: Option<String>,
    files: RawModelFiles,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModelFiles {
    model: RawFileRef,
    #[serde(default)]
    vocab: Option<RawFileRef>,
    #[serde(default)]
    src_vocab: Option<RawFileRef>,
    #[serde(default)]
    trg_vocab: Option<RawFileRef>,
    #[serde(default)]
    lexical_shortlist: Option<RawFileRef>,
}

#[derive(Debug, Deserialize)]
struct RawFileRef {
    path: String,
    #[serde(default)]
    hash: Option<String>,
}

/// Parser for the `models.json` registry layout.
#[derive(Debug, Clone)]
pub struct ModelsJsonParser {
    storage_base: Url,
}

impl ModelsJsonParser {
    /// Create a parser that joins file paths onto `storage_base_url`.
    pub fn new(storage_base_url: &str) -> Result<Self> {
        let mut base = storage_base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let storage_base = Url::parse(&base).map_err(|e| LinguaError::Config {
            message: format!("Invalid storage base URL {:?}: {}", storage_base_url, e),
        })?;
        Ok(Self { storage_base })
    }

    pub fn storage_base(&self) -> &Url {
        &self.storage_base
    }

    fn file_url(&self, path: &str) -> Result<String> {
        self.storage_base
            .join(path.trim_start_matches('/'))
            .map(String::from)
            .map_err(|e| LinguaError::InvalidRegistryFormat {
                message: format!("Invalid model file path {:?}: {}", path, e),
            })
    }

    fn descriptor(
        &self,
        pair: &LanguagePair,
        role: FileRole,
        file: &RawFileRef,
    ) -> Result<ModelFileDescriptor> {
        Ok(ModelFileDescriptor {
            pair: pair.clone(),
            role,
            url: self.file_url(&file.path)?,
            hash: file.hash.as_ref().map(|h| h.to_ascii_lowercase()),
        })
    }
}

impl RegistryParser for ModelsJsonParser {
    fn parse_catalog(&self, body: &[u8]) -> Result<ModelCatalog> {
        let document: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| LinguaError::InvalidRegistryFormat {
                message: format!("registry is not valid JSON: {}", e),
            })?;

        let models = document
            .get("models")
            .and_then(|m| m.as_object())
            .ok_or_else(|| LinguaError::InvalidRegistryFormat {
                message: "missing \"models\" mapping".to_string(),
            })?;

        let mut registry = Registry::new();
        let mut entries = HashMap::with_capacity(models.len());

        for (key, value) in models {
            let list = match value.as_array() {
                Some(list) if !list.is_empty() => list,
                _ => {
                    return Err(LinguaError::InvalidRegistryFormat {
                        message: format!("models[{:?}] must be a non-empty list", key),
                    });
                }
            };

            let pair: LanguagePair = match key.parse() {
                Ok(pair) => pair,
                Err(_) => {
                    warn!("Skipping registry entry with unparseable key {:?}", key);
                    continue;
                }
            };

            entries.insert(pair.key(), list.clone());
            registry.insert(pair);
        }

        debug!(
            "Parsed registry with {} pairs from {} sources",
            registry.pair_count(),
            registry.sources().count()
        );
        Ok(ModelCatalog::new(registry, entries))
    }

    fn model_files(
        &self,
        pair: &LanguagePair,
        entries: &[serde_json::Value],
    ) -> Result<Vec<ModelFileDescriptor>> {
        let parsed: Vec<RawModelEntry> = entries
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Ignoring malformed model entry for {}: {}", pair, e);
                    None
                }
            })
            .collect();

        let chosen = parsed
            .iter()
            .find(|entry| {
                entry
                    .release_status
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(RegistryConfig::PREFERRED_RELEASE_STATUS))
                    .unwrap_or(false)
            })
            .or_else(|| parsed.first())
            .ok_or_else(|| LinguaError::InvalidRegistryFormat {
                message: format!("no usable model entry for {}", pair),
            })?;

        let files = &chosen.files;
        let mut descriptors = vec![self.descriptor(pair, FileRole::Model, &files.model)?];

        match (&files.vocab, &files.src_vocab, &files.trg_vocab) {
            (Some(vocab), _, _) => {
                descriptors.push(self.descriptor(pair, FileRole::Vocab, vocab)?);
            }
            (None, Some(src), Some(trg)) => {
                descriptors.push(self.descriptor(pair, FileRole::SrcVocab, src)?);
                descriptors.push(self.descriptor(pair, FileRole::TrgVocab, trg)?);
            }
            _ => {
                return Err(LinguaError::InvalidRegistryFormat {
                    message: format!("model for {} lists no vocabulary", pair),
                });
            }
        }

        if let Some(lex) = &files.lexical_shortlist {
            descriptors.push(self.descriptor(pair, FileRole::LexicalShortlist, lex)?);
        }

        Ok(descriptors)
    }
}
