//! Role-tagged descriptors for the files that make up one translation model.

use crate::config::ProgressConfig;
use crate::fetch::decompress::Compression;
use crate::pair::LanguagePair;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a model file is used for by the translation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileRole {
    Model,
    Vocab,
    SrcVocab,
    TrgVocab,
    LexicalShortlist,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Model => "model",
            FileRole::Vocab => "vocab",
            FileRole::SrcVocab => "srcVocab",
            FileRole::TrgVocab => "trgVocab",
            FileRole::LexicalShortlist => "lexicalShortlist",
        }
    }

    /// Share of one model's download slot taken by a file of this role.
    ///
    /// Split vocabularies share the single-vocabulary weight.
    pub fn slot_weight(&self) -> f64 {
        match self {
            FileRole::Model => ProgressConfig::MODEL_WEIGHT,
            FileRole::Vocab => ProgressConfig::VOCAB_WEIGHT,
            FileRole::SrcVocab | FileRole::TrgVocab => ProgressConfig::VOCAB_WEIGHT / 2.0,
            FileRole::LexicalShortlist => ProgressConfig::LEXICAL_SHORTLIST_WEIGHT,
        }
    }
}

/// One file to retrieve for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFileDescriptor {
    /// Direct pair the file belongs to (a pivot hop, not the requested pair).
    pub pair: LanguagePair,
    pub role: FileRole,
    pub url: String,
    /// Expected sha256 of the downloaded bytes, lowercase hex.
    pub hash: Option<String>,
}

impl ModelFileDescriptor {
    /// Last path segment of the source URL.
    pub fn file_name(&self) -> &str {
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        path.rsplit('/').next().unwrap_or(path)
    }

    /// File name on disk once decompressed.
    pub fn local_name(&self) -> String {
        let name = self.file_name();
        Compression::from_name(name)
            .suffix()
            .and_then(|suffix| name.strip_suffix(suffix))
            .unwrap_or(name)
            .to_string()
    }
}

/// All files needed for one direct hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFileSet {
    pub pair: LanguagePair,
    pub files: Vec<ModelFileDescriptor>,
}

/// A file that has been fetched and decompressed into the local model cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedFile {
    pub role: FileRole,
    pub path: PathBuf,
    pub from_cache: bool,
}

/// Local files for one direct hop, in the shape the worker's `initialize` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModel {
    pub from: String,
    pub to: String,
    pub files: Vec<FetchedFile>,
}
