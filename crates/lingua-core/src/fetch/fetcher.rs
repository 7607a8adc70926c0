//! Model file retrieval.
//!
//! [`FileFetcher`] is the injected byte source (HTTP by default, optionally
//! through a re-serving proxy). [`ModelFetcher`] drives it for every file of
//! a route: local cache lookup, streaming download with hash verification,
//! decompression into the cache, and progress reporting.

use crate::cancel::CancellationToken;
use crate::config::FetchConfig;
use crate::error::{LinguaError, Result};
use crate::fetch::cache::ModelCache;
use crate::fetch::decompress::Compression;
use crate::fetch::descriptor::{FetchedFile, LocalModel, ModelFileDescriptor, ModelFileSet};
use crate::fetch::progress::ProgressReporter;
use crate::network::HttpClient;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// A response body being streamed.
pub struct FetchedBody {
    /// Declared length, if the server sent one.
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl FetchedBody {
    /// Body served from a single in-memory buffer.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            content_length: Some(bytes.len() as u64),
            stream: futures::stream::once(async move { Ok(bytes) }).boxed(),
        }
    }
}

/// Byte retrieval by URL.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBody>;
}

/// Fetches files over HTTP, optionally through a proxy.
///
/// With a proxy configured, `https://host/file` is requested as
/// `{proxy}?url=https%3A%2F%2Fhost%2Ffile`.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    http: HttpClient,
    proxy: Option<String>,
}

impl HttpFileFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http, proxy: None }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn request_url(&self, url: &str) -> String {
        match &self.proxy {
            Some(proxy) => format!("{}?url={}", proxy, urlencoding::encode(url)),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        let request_url = self.request_url(url);
        let response = self.http.get_download(&request_url).await?;
        let content_length = response.content_length();
        let source_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| LinguaError::ModelFileFetchFailed {
                    url: source_url.clone(),
                    message: format!("Error reading download stream: {}", e),
                })
            })
            .boxed();
        Ok(FetchedBody {
            content_length,
            stream,
        })
    }
}

type StoreLocks = HashMap<PathBuf, Arc<AsyncMutex<()>>>;

/// Retrieves every file of a route into the local model cache.
///
/// Loads that need the same file (pairs sharing a hop) take turns on a
/// per-path lock; the one that waited finds the file cached.
pub struct ModelFetcher {
    fetcher: Arc<dyn FileFetcher>,
    cache: ModelCache,
    file_timeout: Duration,
    store_locks: Mutex<StoreLocks>,
}

impl ModelFetcher {
    pub fn new(fetcher: Arc<dyn FileFetcher>, cache: ModelCache) -> Self {
        Self {
            fetcher,
            cache,
            file_timeout: FetchConfig::FILE_TIMEOUT,
            store_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_file_timeout(mut self, timeout: Duration) -> Self {
        self.file_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Fetch every hop's files, in order.
    pub async fn fetch_all(
        &self,
        sets: &[ModelFileSet],
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<LocalModel>> {
        let mut models = Vec::with_capacity(sets.len());
        for set in sets {
            let files = self.fetch_set(set, progress, cancel).await?;
            models.push(LocalModel {
                from: set.pair.source.clone(),
                to: set.pair.target.clone(),
                files,
            });
        }
        progress.body_done();
        Ok(models)
    }

    /// Fetch the files of one hop.
    pub async fn fetch_set(
        &self,
        set: &ModelFileSet,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedFile>> {
        let mut files = Vec::with_capacity(set.files.len());
        for descriptor in &set.files {
            files.push(self.fetch_file(descriptor, progress, cancel).await?);
        }
        info!("Model files for {} ready ({} files)", set.pair, files.len());
        Ok(files)
    }

    fn lock_store_locks(&self) -> MutexGuard<'_, StoreLocks> {
        self.store_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_lock(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        self.lock_store_locks()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Drop the path's lock entry once nobody else holds or awaits it.
    fn release_store_lock(&self, path: &Path, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.lock_store_locks();
        drop(lock);
        if locks
            .get(path)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(path);
        }
    }

    fn cache_hit(
        &self,
        descriptor: &ModelFileDescriptor,
        path: PathBuf,
        progress: &ProgressReporter,
    ) -> FetchedFile {
        debug!("Cache hit for {} at {}", descriptor.url, path.display());
        for step in FetchConfig::SYNTHETIC_STEPS {
            progress.file_progress(step);
        }
        progress.file_done();
        FetchedFile {
            role: descriptor.role,
            path,
            from_cache: true,
        }
    }

    async fn fetch_file(
        &self,
        descriptor: &ModelFileDescriptor,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile> {
        cancel.check()?;
        progress.begin_file(descriptor.role);
        let path = self.cache.path_for(descriptor);

        if self.cache.contains(&path).await {
            return Ok(self.cache_hit(descriptor, path, progress));
        }

        let lock_path = path.clone();
        let lock = self.store_lock(&lock_path);
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = lock.clone().lock_owned() => Some(guard),
        };
        let result = match guard {
            None => Err(LinguaError::Cancelled),
            Some(_guard) => {
                // Another load may have stored the file while this one waited.
                if self.cache.contains(&path).await {
                    Ok(self.cache_hit(descriptor, path, progress))
                } else {
                    self.download_and_store(descriptor, path, progress, cancel)
                        .await
                }
            }
        };
        self.release_store_lock(&lock_path, lock);
        result
    }

    async fn download_and_store(
        &self,
        descriptor: &ModelFileDescriptor,
        path: PathBuf,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile> {
        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LinguaError::Cancelled),
            result = tokio::time::timeout(self.file_timeout, self.download(descriptor, progress, cancel)) => {
                result.map_err(|_| LinguaError::ModelFileFetchFailed {
                    url: descriptor.url.clone(),
                    message: format!("timed out after {:?}", self.file_timeout),
                })??
            }
        };

        cancel.check()?;
        let head = &data[..data.len().min(4)];
        let compression = Compression::detect(descriptor.file_name(), head);
        let written = self
            .cache
            .store(
                path.clone(),
                compression,
                data,
                descriptor.file_name().to_string(),
            )
            .await?;
        cancel.check()?;

        debug!(
            "Fetched {} for {} ({:?}, {} bytes on disk)",
            descriptor.role.as_str(),
            descriptor.pair,
            compression,
            written
        );
        progress.file_progress(1.0);
        progress.file_done();
        Ok(FetchedFile {
            role: descriptor.role,
            path,
            from_cache: false,
        })
    }

    async fn download(
        &self,
        descriptor: &ModelFileDescriptor,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let body = self.fetcher.fetch(&descriptor.url).await?;
        cancel.check()?;

        let total = body.content_length.filter(|len| *len > 0);
        let report_every = total.map(|len| {
            let by_fraction = (len as f64 * FetchConfig::PROGRESS_STEP_FRACTION) as u64;
            by_fraction.min(FetchConfig::PROGRESS_CHUNK_BYTES).max(1)
        });
        if total.is_none() {
            progress.file_progress(FetchConfig::SYNTHETIC_STEPS[0]);
        }

        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0) as usize);
        let mut hasher = Sha256::new();
        let mut last_reported: u64 = 0;
        let mut stream = body.stream;

        while let Some(chunk) = stream.next().await {
            cancel.check()?;
            let chunk = chunk?;
            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);

            if let (Some(total), Some(step)) = (total, report_every) {
                let received = buffer.len() as u64;
                if received - last_reported >= step {
                    last_reported = received;
                    // The last step belongs to decompression.
                    progress.file_progress((received as f64 / total as f64).min(0.99));
                }
            }
        }

        if total.is_none() {
            progress.file_progress(FetchConfig::SYNTHETIC_STEPS[1]);
        }

        if let Some(expected) = &descriptor.hash {
            let actual = hex::encode(hasher.finalize());
            if &actual != expected {
                return Err(LinguaError::HashMismatch {
                    file: descriptor.file_name().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        if total.is_none() {
            progress.file_progress(FetchConfig::SYNTHETIC_STEPS[2]);
        }
        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::descriptor::FileRole;
    use crate::fetch::progress::LoadProgress;
    use crate::pair::LanguagePair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MapFetcher {
        files: HashMap<String, Bytes>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &'static [u8]) -> Self {
            self.files.insert(url.to_string(), Bytes::from_static(body));
            self
        }
    }

    #[async_trait]
    impl FileFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedBody> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(url)
                .cloned()
                .map(FetchedBody::from_bytes)
                .ok_or_else(|| LinguaError::ModelFileFetchFailed {
                    url: url.to_string(),
                    message: "HTTP 404 Not Found".into(),
                })
        }
    }

    struct HangingFetcher;

    #[async_trait]
    impl FileFetcher for HangingFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedBody> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn descriptor(role: FileRole, url: &str, hash: Option<&str>) -> ModelFileDescriptor {
        ModelFileDescriptor {
            pair: LanguagePair::new("en", "fr"),
            role,
            url: url.to_string(),
            hash: hash.map(String::from),
        }
    }

    fn file_set(files: Vec<ModelFileDescriptor>) -> ModelFileSet {
        ModelFileSet {
            pair: LanguagePair::new("en", "fr"),
            files,
        }
    }

    fn recorder() -> (ProgressReporter, Arc<Mutex<Vec<LoadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(
            "en-fr",
            1,
            Arc::new(move |p| sink.lock().unwrap().push(p)),
        )
        .with_throttle(Duration::ZERO);
        (reporter, seen)
    }

    #[test]
    fn test_proxy_url_rewrite() {
        let fetcher = HttpFileFetcher::new(HttpClient::new().unwrap())
            .with_proxy("http://127.0.0.1:9000/proxy");
        assert_eq!(
            fetcher.request_url("https://models.example/en fr/model.bin"),
            "http://127.0.0.1:9000/proxy?url=https%3A%2F%2Fmodels.example%2Fen%20fr%2Fmodel.bin"
        );
        let direct = HttpFileFetcher::new(HttpClient::new().unwrap());
        assert_eq!(direct.request_url("https://a/b"), "https://a/b");
    }

    #[tokio::test]
    async fn test_fetch_then_cache_hit() {
        let temp = TempDir::new().unwrap();
        let source = Arc::new(
            MapFetcher::default()
                .with("https://m/model.bin", b"weights")
                .with("https://m/vocab.spm", b"vocab"),
        );
        let fetcher = ModelFetcher::new(source.clone(), ModelCache::new(temp.path()));
        let set = file_set(vec![
            descriptor(FileRole::Model, "https://m/model.bin", None),
            descriptor(FileRole::Vocab, "https://m/vocab.spm", None),
        ]);
        let cancel = CancellationToken::new();

        let (progress, _) = recorder();
        let first = fetcher.fetch_set(&set, &progress, &cancel).await.unwrap();
        assert!(first.iter().all(|f| !f.from_cache));
        assert_eq!(std::fs::read(&first[0].path).unwrap(), b"weights");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let (progress, seen) = recorder();
        let second = fetcher.fetch_set(&set, &progress, &cancel).await.unwrap();
        assert!(second.iter().all(|f| f.from_cache));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        let percents: Vec<f64> = seen.lock().unwrap().iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(!percents.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_fetches_of_one_file_download_once() {
        let temp = TempDir::new().unwrap();
        let source = Arc::new(
            MapFetcher::default()
                .with("https://m/model.bin", b"weights")
                .with("https://m/vocab.spm", b"vocab"),
        );
        let fetcher = ModelFetcher::new(source.clone(), ModelCache::new(temp.path()));
        let set = file_set(vec![
            descriptor(FileRole::Model, "https://m/model.bin", None),
            descriptor(FileRole::Vocab, "https://m/vocab.spm", None),
        ]);
        let cancel = CancellationToken::new();
        let (first_progress, _) = recorder();
        let (second_progress, _) = recorder();

        let (first, second) = tokio::join!(
            fetcher.fetch_set(&set, &first_progress, &cancel),
            fetcher.fetch_set(&set, &second_progress, &cancel),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first[0].path, second[0].path);
        assert_eq!(std::fs::read(&first[0].path).unwrap(), b"weights");
        assert_eq!(std::fs::read(&second[1].path).unwrap(), b"vocab");
        assert!(fetcher.lock_store_locks().is_empty());
    }

    #[tokio::test]
    async fn test_hash_verified() {
        let temp = TempDir::new().unwrap();
        let source = Arc::new(MapFetcher::default().with("https://m/model.bin", b"weights"));
        let fetcher = ModelFetcher::new(source, ModelCache::new(temp.path()));
        let good = hex::encode(Sha256::digest(b"weights"));

        let (progress, _) = recorder();
        let ok = file_set(vec![descriptor(FileRole::Model, "https://m/model.bin", Some(&good))]);
        assert!(fetcher
            .fetch_set(&ok, &progress, &CancellationToken::new())
            .await
            .is_ok());

        let temp = TempDir::new().unwrap();
        let source = Arc::new(MapFetcher::default().with("https://m/model.bin", b"tampered"));
        let fetcher = ModelFetcher::new(source, ModelCache::new(temp.path()));
        let result = fetcher
            .fetch_set(&ok, &progress, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LinguaError::HashMismatch { .. })));
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let temp = TempDir::new().unwrap();
        let fetcher = ModelFetcher::new(
            Arc::new(MapFetcher::default()),
            ModelCache::new(temp.path()),
        );
        let (progress, _) = recorder();
        let set = file_set(vec![descriptor(FileRole::Model, "https://m/model.bin", None)]);
        let result = fetcher
            .fetch_set(&set, &progress, &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(LinguaError::ModelFileFetchFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_hanging_download() {
        let temp = TempDir::new().unwrap();
        let fetcher = ModelFetcher::new(Arc::new(HangingFetcher), ModelCache::new(temp.path()));
        let (progress, _) = recorder();
        let set = file_set(vec![descriptor(FileRole::Model, "https://m/model.bin", None)]);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = fetcher.fetch_set(&set, &progress, &cancel).await;
        assert!(matches!(result, Err(LinguaError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_file_timeout() {
        let temp = TempDir::new().unwrap();
        let fetcher = ModelFetcher::new(Arc::new(HangingFetcher), ModelCache::new(temp.path()));
        let (progress, _) = recorder();
        let set = file_set(vec![descriptor(FileRole::Model, "https://m/model.bin", None)]);

        let result = fetcher
            .fetch_set(&set, &progress, &CancellationToken::new())
            .await;
        match result {
            Err(LinguaError::ModelFileFetchFailed { message, .. }) => {
                assert!(message.contains("timed out"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
