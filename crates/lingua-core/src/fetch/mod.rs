//! Model file fetching.
//!
//! - [`descriptor`] - role-tagged file descriptors
//! - [`fetcher`] - byte retrieval strategy and the per-route driver
//! - [`decompress`] - gzip/zstd decoding
//! - [`cache`] - decompressed files on disk
//! - [`progress`] - weighted, throttled progress

pub mod cache;
pub mod decompress;
pub mod descriptor;
pub mod fetcher;
pub mod progress;

pub use cache::ModelCache;
pub use decompress::Compression;
pub use descriptor::{FetchedFile, FileRole, LocalModel, ModelFileDescriptor, ModelFileSet};
pub use fetcher::{FetchedBody, FileFetcher, HttpFileFetcher, ModelFetcher};
pub use progress::{LoadPhase, LoadProgress, ProgressCallback, ProgressReporter, ProgressState};
