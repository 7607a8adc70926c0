//! Language pair key used for routing, caching and load deduplication.

use crate::error::{LinguaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered (source, target) pair of language codes.
///
/// The canonical string form is `"{source}-{target}"`; it is the only key used
/// by the translator cache and the in-flight load table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Canonical `"{source}-{target}"` key.
    pub fn key(&self) -> String {
        format!("{}-{}", self.source, self.target)
    }

    pub fn is_same_language(&self) -> bool {
        self.source == self.target
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = LinguaError;

    /// Parse a registry key such as `"en-ja"`. Exactly one `-` separator is accepted.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(target), None) if !source.is_empty() && !target.is_empty() => {
                Ok(Self::new(source, target))
            }
            _ => Err(LinguaError::InvalidParams {
                message: format!("Invalid language pair key: {:?}", s),
            }),
        }
    }
}
