//! Shared fixtures for the integration tests.
//!
//! Everything runs in memory: the registry comes from a static document, model
//! files from a URL map, and workers are in-process engines.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use futures::StreamExt;
use lingua_core::network::RetryConfig;
use lingua_core::rpc::Worker;
use lingua_core::{
    FetchedBody, FileFetcher, InProcessSpawner, LinguaApi, LinguaError, LoadProgress, LocalModel,
    ModelsJsonParser, ProgressCallback, RegistrySource, Result, TranslateRequest,
    TranslateResponse, TranslationEngine, WorkerSpawner,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const STORAGE_BASE: &str = "https://models.test/";

/// Directly served pairs in the default fixture. `en` is the hub.
pub const DIRECT_PAIRS: &[(&str, &str)] = &[
    ("en", "fr"),
    ("fr", "en"),
    ("en", "de"),
    ("ja", "en"),
    ("en", "ja"),
];

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Registry document plus the file bytes it points at.
pub struct Fixture {
    pub registry: Vec<u8>,
    pub files: HashMap<String, Bytes>,
}

impl Fixture {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut models = serde_json::Map::new();
        let mut files = HashMap::new();

        for (from, to) in pairs {
            let tag = format!("{}{}", from, to);
            let model = Bytes::from(gzip(format!("model weights {}", tag).as_bytes()));
            let vocab = Bytes::from(format!("vocab {}", tag).into_bytes());
            let lex = Bytes::from(vec![7u8; 64 * 1024]);

            let model_path = format!("{}/model.{}.intgemm.alphas.bin.gz", tag, tag);
            let vocab_path = format!("{}/vocab.{}.spm", tag, tag);
            let lex_path = format!("{}/lex.50.50.{}.s2t.bin", tag, tag);

            models.insert(
                format!("{}-{}", from, to),
                json!([{
                    "releaseStatus": "Release",
                    "files": {
                        "model": {
                            "path": model_path,
                            "hash": hex::encode(Sha256::digest(&model)),
                        },
                        "vocab": { "path": vocab_path },
                        "lexicalShortlist": { "path": lex_path },
                    }
                }]),
            );

            files.insert(format!("{}{}", STORAGE_BASE, model_path), model);
            files.insert(format!("{}{}", STORAGE_BASE, vocab_path), vocab);
            files.insert(format!("{}{}", STORAGE_BASE, lex_path), lex);
        }

        let registry = serde_json::to_vec(&json!({ "models": models })).unwrap();
        Self { registry, files }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new(DIRECT_PAIRS)
    }
}

/// Registry source serving a fixed document, or failing on demand.
///
/// With `hanging` set, fetches never answer; `fetching` is notified when one
/// starts.
pub struct StaticRegistry {
    body: Vec<u8>,
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
    pub fetching: Notify,
}

impl StaticRegistry {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            fetching: Notify::new(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrySource for StaticRegistry {
    async fn fetch(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fetching.notify_one();
        if self.hanging.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinguaError::Network {
                message: "connection refused".to_string(),
                source: None,
            });
        }
        Ok(self.body.clone())
    }

    fn describe(&self) -> String {
        "static registry".to_string()
    }
}

/// File fetcher backed by a URL map.
///
/// With the gate closed, every fetch parks until [`open_gate`](Self::open_gate)
/// is called. `started` is notified each time a fetch begins.
pub struct MemoryFetcher {
    files: HashMap<String, Bytes>,
    counts: Mutex<HashMap<String, usize>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub started: Notify,
}

impl MemoryFetcher {
    pub fn new(files: HashMap<String, Bytes>) -> Self {
        Self {
            files,
            counts: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            started: Notify::new(),
        }
    }

    /// Park all subsequent fetches.
    pub fn close_gate(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Release parked fetches and stop gating.
    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    /// Fetches started for `url`.
    pub fn count(&self, url: &str) -> usize {
        self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FileFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        self.started.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|e| LinguaError::Other(e.to_string()))?;
        }

        let data = self
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| LinguaError::ModelFileFetchFailed {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })?;

        // Several chunks so byte progress has something to report.
        let chunks: Vec<Result<Bytes>> = data
            .chunks(8 * 1024)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(FetchedBody {
            content_length: Some(data.len() as u64),
            stream: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// How a [`FakeEngine`] misbehaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFaults {
    pub fail_initialize: bool,
    pub fail_translate: bool,
    pub hang_initialize: bool,
}

/// Engine that tags its input with the language pair.
pub struct FakeEngine {
    faults: EngineFaults,
    initialized: Arc<Mutex<Vec<Vec<LocalModel>>>>,
}

#[async_trait]
impl TranslationEngine for FakeEngine {
    async fn initialize(&mut self, models: Vec<LocalModel>) -> Result<()> {
        if self.faults.hang_initialize {
            futures::future::pending::<()>().await;
        }
        if self.faults.fail_initialize {
            return Err(LinguaError::Other("model file is corrupt".to_string()));
        }
        self.initialized.lock().unwrap().push(models);
        Ok(())
    }

    async fn translate(&mut self, request: TranslateRequest) -> Result<TranslateResponse> {
        if self.faults.fail_translate {
            return Err(LinguaError::Other("engine produced no output".to_string()));
        }
        Ok(TranslateResponse::new(format!(
            "[{}>{}] {}",
            request.from, request.to, request.text
        )))
    }
}

/// In-process spawner that counts workers and records what they loaded.
pub struct CountingSpawner {
    inner: InProcessSpawner,
    spawned: AtomicUsize,
    pub initialized: Arc<Mutex<Vec<Vec<LocalModel>>>>,
}

impl CountingSpawner {
    pub fn new(faults: EngineFaults) -> Self {
        let initialized = Arc::new(Mutex::new(Vec::new()));
        let recorded = initialized.clone();
        Self {
            inner: InProcessSpawner::new(move || {
                Box::new(FakeEngine {
                    faults,
                    initialized: recorded.clone(),
                })
            }),
            spawned: AtomicUsize::new(0),
            initialized,
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSpawner for CountingSpawner {
    async fn spawn(&self, label: &str) -> Result<Worker> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn(label).await
    }
}

/// A built API and the fakes behind it.
pub struct TestEnv {
    pub api: LinguaApi,
    pub registry: Arc<StaticRegistry>,
    pub fetcher: Arc<MemoryFetcher>,
    pub spawner: Arc<CountingSpawner>,
    pub temp: TempDir,
}

pub async fn build_env(faults: EngineFaults) -> TestEnv {
    build_env_with(Fixture::default(), faults, |builder| builder).await
}

pub async fn build_env_with(
    fixture: Fixture,
    faults: EngineFaults,
    customize: impl FnOnce(lingua_core::LinguaApiBuilder) -> lingua_core::LinguaApiBuilder,
) -> TestEnv {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(StaticRegistry::new(fixture.registry));
    let fetcher = Arc::new(MemoryFetcher::new(fixture.files));
    let spawner = Arc::new(CountingSpawner::new(faults));

    let builder = LinguaApi::builder()
        .cache_dir(temp.path())
        .registry_source(registry.clone())
        .registry_parser(Arc::new(ModelsJsonParser::new(STORAGE_BASE).unwrap()))
        .file_fetcher(fetcher.clone())
        .worker_spawner(spawner.clone())
        .registry_retry(
            RetryConfig::registry()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2)),
        );

    let api = customize(builder).build().await.unwrap();
    TestEnv {
        api,
        registry,
        fetcher,
        spawner,
        temp,
    }
}

/// Callback collecting every progress event.
pub fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<LoadProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressCallback = Arc::new(move |progress: LoadProgress| {
        sink.lock().unwrap().push(progress);
    });
    (callback, events)
}

/// Assert percentages never go down and the last one is 100.
pub fn assert_monotonic_to_complete(events: &[LoadProgress]) {
    assert!(!events.is_empty(), "no progress reported");
    for window in events.windows(2) {
        assert!(
            window[1].percent >= window[0].percent,
            "progress went backwards: {} then {}",
            window[0].percent,
            window[1].percent
        );
    }
    let last = events.last().unwrap();
    assert!((last.percent - 100.0).abs() < f64::EPSILON, "ended at {}", last.percent);
}
