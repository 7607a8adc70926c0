//! Centralized configuration for the translation orchestrator.
//!
//! Constants for registry access, model file fetching, progress reporting and
//! the worker protocol. Runtime choices (URLs, cache directory, worker
//! command) are made through [`crate::LinguaApiBuilder`].

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const USER_AGENT: &'static str = "lingua/0.1";
    pub const CACHE_DIR_NAME: &'static str = "lingua";
    pub const MODELS_DIR_NAME: &'static str = "models";
}

/// Registry fetch configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const BASE_DELAY: Duration = Duration::from_secs(1);
    pub const MAX_DELAY: Duration = Duration::from_secs(5);
    /// Release channel preferred when a pair lists several models.
    pub const PREFERRED_RELEASE_STATUS: &'static str = "release";
}

/// Model file fetch configuration.
pub struct FetchConfig;

impl FetchConfig {
    pub const FILE_TIMEOUT: Duration = Duration::from_secs(120);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const TEMP_SUFFIX: &'static str = ".part";
    /// Byte granularity for progress updates when the length is known.
    pub const PROGRESS_CHUNK_BYTES: u64 = 50 * 1024;
    /// Fractional granularity for progress updates when the length is known.
    pub const PROGRESS_STEP_FRACTION: f64 = 0.05;
    /// Scripted per-file steps used when the length is unknown or cached.
    pub const SYNTHETIC_STEPS: [f64; 4] = [0.10, 0.50, 0.80, 1.00];
}

/// Progress model configuration.
pub struct ProgressConfig;

impl ProgressConfig {
    pub const PRELUDE_END: f64 = 5.0;
    pub const BODY_END: f64 = 90.0;
    pub const INITIALIZED: f64 = 95.0;
    pub const COMPLETE: f64 = 100.0;
    pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(100);
    pub const FILES_PER_MODEL: usize = 3;
    /// Share of one model's download slot per file role.
    pub const MODEL_WEIGHT: f64 = 0.70;
    pub const VOCAB_WEIGHT: f64 = 0.20;
    pub const LEXICAL_SHORTLIST_WEIGHT: f64 = 0.10;
}

/// Worker protocol configuration.
pub struct WorkerConfig;

impl WorkerConfig {
    pub const DEFAULT_COMMAND: &'static str = "lingua-worker";
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
    pub const INIT_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DUPLEX_BUFFER: usize = 64 * 1024;
    /// Longest argument dump kept in a pending call's description.
    pub const DESCRIPTION_MAX_CHARS: usize = 200;
}

/// Loader configuration.
pub struct LoaderConfig;

impl LoaderConfig {
    pub const DEFAULT_HUB_LANGUAGE: &'static str = "en";
    pub const TRIAL_TEXT: &'static str = "test";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_weights_fill_a_slot() {
        let total = ProgressConfig::MODEL_WEIGHT
            + ProgressConfig::VOCAB_WEIGHT
            + ProgressConfig::LEXICAL_SHORTLIST_WEIGHT;
        assert!((total - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_bounds_are_reasonable() {
        assert!(RegistryConfig::BASE_DELAY < RegistryConfig::MAX_DELAY);
        assert!(RegistryConfig::ATTEMPT_TIMEOUT > Duration::ZERO);
        assert!(FetchConfig::FILE_TIMEOUT > RegistryConfig::ATTEMPT_TIMEOUT);
    }
}
