//! Error types for the translation orchestrator.
//!
//! Every failure that reaches a caller carries enough context (language pair,
//! load stage) for a front end to render a specific message. Cancellation is a
//! distinct kind so it can be told apart from real failures.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Stage of a model load at which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    Resolve,
    Download,
    Initialize,
    Trial,
}

impl LoadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStage::Resolve => "resolve",
            LoadStage::Download => "download",
            LoadStage::Initialize => "initialize",
            LoadStage::Trial => "trial",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the Lingua library.
#[derive(Debug, Error)]
pub enum LinguaError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Registry errors
    #[error("Model registry unavailable: {message}")]
    RegistryUnavailable { message: String },

    #[error("Invalid registry format: {message}")]
    InvalidRegistryFormat { message: String },

    #[error("No model route for {pair}")]
    PairUnavailable { pair: String },

    // Model file errors
    #[error("Failed to fetch model file {url}: {message}")]
    ModelFileFetchFailed { url: String, message: String },

    #[error("Cannot decompress {file}: {format} decompression is not supported by this build")]
    DecompressionUnsupported { file: String, format: String },

    #[error("Hash mismatch for {file}: expected {expected}, got {actual}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    // Cancellation
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Model load for {pair} was aborted")]
    LoadAborted { pair: String },

    // Load lifecycle errors
    #[error("Trial translation for {pair} failed: {message}")]
    TrialTranslationFailed { pair: String, message: String },

    #[error("Translation worker failed to initialize: {message}. {hint}")]
    WorkerInitializationFailed { message: String, hint: String },

    #[error("Loading {pair} failed during {stage}: {source}")]
    LoadFailed {
        pair: String,
        stage: LoadStage,
        #[source]
        source: Arc<LinguaError>,
    },

    // Worker protocol errors
    #[error("{message}")]
    Rpc {
        message: String,
        stack: Option<String>,
        call: String,
    },

    #[error("Translation worker for {label} is no longer running")]
    WorkerLost { label: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Lingua operations.
pub type Result<T> = std::result::Result<T, LinguaError>;

impl From<std::io::Error> for LinguaError {
    fn from(err: std::io::Error) -> Self {
        LinguaError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LinguaError {
    fn from(err: serde_json::Error) -> Self {
        LinguaError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for LinguaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinguaError::Timeout(std::time::Duration::from_secs(0))
        } else {
            LinguaError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl LinguaError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LinguaError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for cancellation kinds, which callers should not surface as errors.
    pub fn is_cancellation(&self) -> bool {
        match self {
            LinguaError::Cancelled | LinguaError::LoadAborted { .. } => true,
            LinguaError::LoadFailed { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinguaError::Network { .. }
                | LinguaError::InvalidRegistryFormat { .. }
                | LinguaError::RegistryUnavailable { .. }
        )
    }

    /// Stage of the load this error came from, if it was raised by a load.
    pub fn load_stage(&self) -> Option<LoadStage> {
        match self {
            LinguaError::LoadFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error, looking through load wrappers.
    pub fn root(&self) -> &LinguaError {
        match self {
            LinguaError::LoadFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32002: Language pair not available
    /// - -32003: Model load failed
    /// - -32004: Cancelled by user
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self.root() {
            LinguaError::Network { .. }
            | LinguaError::Timeout(_)
            | LinguaError::RegistryUnavailable { .. } => -32000,

            LinguaError::PairUnavailable { .. } => -32002,

            LinguaError::ModelFileFetchFailed { .. }
            | LinguaError::DecompressionUnsupported { .. }
            | LinguaError::TrialTranslationFailed { .. }
            | LinguaError::WorkerInitializationFailed { .. }
            | LinguaError::WorkerLost { .. }
            | LinguaError::HashMismatch { .. } => -32003,

            LinguaError::Cancelled | LinguaError::LoadAborted { .. } => -32004,

            LinguaError::InvalidParams { .. } | LinguaError::InvalidRegistryFormat { .. } => {
                -32005
            }

            _ => -32603,
        }
    }
}
