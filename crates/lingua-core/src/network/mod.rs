//! Network utilities for registry and model file requests.
//!
//! This module provides:
//! - HTTP client with separate document and download timeouts
//! - Retry logic with exponential backoff

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{retry_async, RetryConfig, RetryStats};
