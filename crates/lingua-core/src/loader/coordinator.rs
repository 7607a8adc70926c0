//! Loader coordinator: one load per language pair, shared by every caller.
//!
//! The first caller for a pair registers a [`LoadRecord`] and spawns the load
//! task; later callers subscribe to the record's outcome channel. The record
//! check and insert happen under one lock, so at most one load per pair is
//! ever in flight.
//!
//! A load walks these stages, observing the pair's cancellation token at
//! each boundary and around every long await:
//!
//! 1. registry catalog (cached)
//! 2. route resolution (direct or through the hub)
//! 3. model file fetch
//! 4. worker spawn + `initialize`
//! 5. trial translation
//!
//! Only after the trial succeeds is the handle put in the translator cache.

use crate::cancel::CancellationToken;
use crate::config::LoaderConfig;
use crate::error::{LinguaError, LoadStage, Result};
use crate::fetch::descriptor::ModelFileSet;
use crate::fetch::fetcher::ModelFetcher;
use crate::fetch::progress::{LoadProgress, ProgressCallback, ProgressReporter};
use crate::loader::handle::{TranslatorCache, TranslatorHandle};
use crate::pair::LanguagePair;
use crate::registry::path::PathResolver;
use crate::registry::resolver::RegistryResolver;
use crate::rpc::spawner::WorkerSpawner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

type SharedOutcome = std::result::Result<TranslatorHandle, Arc<LinguaError>>;

/// What a load has published so far.
#[derive(Clone, Default)]
struct LoadState {
    progress: Option<LoadProgress>,
    outcome: Option<SharedOutcome>,
}

/// Bookkeeping for one in-flight load.
struct LoadRecord {
    token: CancellationToken,
    state: watch::Receiver<LoadState>,
}

struct LoaderInner {
    registry: Arc<RegistryResolver>,
    paths: PathResolver,
    fetcher: ModelFetcher,
    spawner: Arc<dyn WorkerSpawner>,
    translators: TranslatorCache,
    loads: Mutex<HashMap<String, LoadRecord>>,
    init_timeout: Duration,
}

impl LoaderInner {
    fn lock_loads(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoadRecord>> {
        self.loads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deduplicates loads and owns the translator cache.
#[derive(Clone)]
pub struct LoaderCoordinator {
    inner: Arc<LoaderInner>,
}

impl LoaderCoordinator {
    pub fn new(
        registry: Arc<RegistryResolver>,
        paths: PathResolver,
        fetcher: ModelFetcher,
        spawner: Arc<dyn WorkerSpawner>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                registry,
                paths,
                fetcher,
                spawner,
                translators: TranslatorCache::new(),
                loads: Mutex::new(HashMap::new()),
                init_timeout,
            }),
        }
    }

    pub fn translators(&self) -> &TranslatorCache {
        &self.inner.translators
    }

    pub fn is_loaded(&self, pair: &LanguagePair) -> bool {
        self.inner.translators.contains(pair)
    }

    pub fn is_loading(&self, pair: &LanguagePair) -> bool {
        self.inner.lock_loads().contains_key(&pair.key())
    }

    /// Pairs with a load in flight.
    pub fn loading_pairs(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock_loads().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Return the ready translator for `pair`, loading it if needed.
    ///
    /// If a load for the pair is already running this call joins it instead
    /// of starting another. `cancel` becomes the load's token when this call
    /// starts the load; a joining caller's token only ends its own wait.
    pub async fn get_or_load(
        &self,
        pair: &LanguagePair,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TranslatorHandle> {
        let key = pair.key();
        if cancel.is_cancelled() {
            return Err(LinguaError::LoadAborted { pair: key });
        }

        if let Some(handle) = self.inner.translators.get(pair) {
            report_complete(&key, on_progress.as_ref());
            return Ok(handle);
        }

        let (state, joined) = {
            let mut loads = self.inner.lock_loads();
            // A load may have landed between the cache check and the lock.
            if let Some(handle) = self.inner.translators.get(pair) {
                drop(loads);
                report_complete(&key, on_progress.as_ref());
                return Ok(handle);
            }

            match loads.get(&key) {
                Some(record) => (record.state.clone(), true),
                None => {
                    let (tx, rx) = watch::channel(LoadState::default());
                    loads.insert(
                        key.clone(),
                        LoadRecord {
                            token: cancel.clone(),
                            state: rx.clone(),
                        },
                    );
                    tokio::spawn(run_load(
                        self.inner.clone(),
                        pair.clone(),
                        cancel.clone(),
                        tx,
                    ));
                    (rx, false)
                }
            }
        };

        if joined {
            debug!("Joining in-flight load for {}", key);
            wait_for_outcome(&key, state, Some(cancel), on_progress.as_ref()).await
        } else {
            info!("Loading translator for {}", key);
            wait_for_outcome(&key, state, None, on_progress.as_ref()).await
        }
    }

    /// Abort any load for `pair` and drop its cached translator.
    ///
    /// Returns true if there was anything to cancel. Idempotent.
    pub async fn cancel(&self, pair: &LanguagePair) -> bool {
        let key = pair.key();
        let (record, evicted) = {
            let mut loads = self.inner.lock_loads();
            let record = loads.remove(&key);
            if let Some(record) = &record {
                record.token.cancel();
            }
            (record, self.inner.translators.remove(pair))
        };

        if record.is_some() {
            info!("Cancelled load for {}", key);
        }
        let had_translator = evicted.is_some();
        if let Some(handle) = evicted {
            handle.dispose().await;
            info!("Dropped translator for {} on cancel", key);
        }
        record.is_some() || had_translator
    }

    /// Dispose the cached translator for `pair`, leaving in-flight loads alone.
    pub async fn unload(&self, pair: &LanguagePair) -> bool {
        match self.inner.translators.remove(pair) {
            Some(handle) => {
                handle.dispose().await;
                info!("Unloaded translator for {}", pair);
                true
            }
            None => false,
        }
    }

    /// Forget a translator whose worker has gone away.
    pub async fn discard(&self, handle: &TranslatorHandle) {
        if self.inner.translators.remove_if_same(handle) {
            warn!("Discarding translator for {}", handle.pair());
        }
        handle.dispose().await;
    }

    /// Cancel every load and dispose every cached translator.
    pub async fn shutdown(&self) {
        let records: Vec<LoadRecord> = {
            let mut loads = self.inner.lock_loads();
            loads.drain().map(|(_, record)| record).collect()
        };
        for record in &records {
            record.token.cancel();
        }

        let handles = self.inner.translators.drain();
        info!(
            "Shutting down loader: {} load(s) cancelled, {} translator(s) disposed",
            records.len(),
            handles.len()
        );
        for handle in handles {
            handle.dispose().await;
        }
    }
}

fn report_complete(key: &str, on_progress: Option<&ProgressCallback>) {
    if let Some(callback) = on_progress {
        callback(LoadProgress::complete(key));
    }
}

/// Forward progress from a load until it publishes an outcome.
///
/// `cancel` is the caller's own token when joining someone else's load.
async fn wait_for_outcome(
    key: &str,
    mut state: watch::Receiver<LoadState>,
    cancel: Option<&CancellationToken>,
    on_progress: Option<&ProgressCallback>,
) -> Result<TranslatorHandle> {
    let mut last_percent = -1.0_f64;
    loop {
        {
            let current = state.borrow_and_update();
            if let (Some(progress), Some(callback)) = (&current.progress, on_progress) {
                if progress.percent > last_percent {
                    last_percent = progress.percent;
                    callback(progress.clone());
                }
            }
            if let Some(outcome) = &current.outcome {
                return outcome.clone().map_err(|e| unshare(key, &e));
            }
        }

        let changed = match cancel {
            Some(token) => tokio::select! {
                changed = state.changed() => changed,
                _ = token.cancelled() => {
                    return Err(LinguaError::LoadAborted { pair: key.to_string() });
                }
            },
            None => state.changed().await,
        };

        if changed.is_err() {
            let current = state.borrow();
            return match &current.outcome {
                Some(outcome) => outcome.clone().map_err(|e| unshare(key, &e)),
                None => Err(LinguaError::Other(format!(
                    "load for {} ended without an outcome",
                    key
                ))),
            };
        }
    }
}

/// Rebuild an owned error from a broadcast one.
fn unshare(key: &str, error: &Arc<LinguaError>) -> LinguaError {
    match error.as_ref() {
        LinguaError::LoadAborted { pair } => LinguaError::LoadAborted { pair: pair.clone() },
        LinguaError::LoadFailed {
            pair,
            stage,
            source,
        } => LinguaError::LoadFailed {
            pair: pair.clone(),
            stage: *stage,
            source: source.clone(),
        },
        other => LinguaError::Other(format!("loading {} failed: {}", key, other)),
    }
}

fn at_stage<T>(pair: &LanguagePair, stage: LoadStage, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.is_cancellation() {
            e
        } else {
            LinguaError::LoadFailed {
                pair: pair.key(),
                stage,
                source: Arc::new(e),
            }
        }
    })
}

async fn run_load(
    inner: Arc<LoaderInner>,
    pair: LanguagePair,
    token: CancellationToken,
    tx: watch::Sender<LoadState>,
) {
    let key = pair.key();
    let tx = Arc::new(tx);
    let progress_tx = tx.clone();
    let reporter = ProgressReporter::new(
        key.clone(),
        1,
        Arc::new(move |progress| {
            progress_tx.send_modify(|state| state.progress = Some(progress));
        }),
    );

    let result = load(&inner, &pair, &token, &reporter).await;

    // Only the load that owns the record may finalize it; after a cancel the
    // slot may already belong to a newer load.
    let (outcome, orphan) = {
        let mut loads = inner.lock_loads();
        let owns_record = loads
            .get(&key)
            .map(|record| record.token.same_as(&token))
            .unwrap_or(false);
        if owns_record {
            loads.remove(&key);
        }

        match result {
            Ok(handle) if owns_record && !token.is_cancelled() => {
                inner.translators.insert(handle.clone());
                (Ok(handle), None)
            }
            Ok(handle) => (
                Err(LinguaError::LoadAborted { pair: key.clone() }),
                Some(handle),
            ),
            Err(e) if e.is_cancellation() || token.is_cancelled() => {
                (Err(LinguaError::LoadAborted { pair: key.clone() }), None)
            }
            Err(e) => (Err(e), None),
        }
    };

    if let Some(handle) = orphan {
        handle.dispose().await;
    }

    match &outcome {
        Ok(_) => {
            reporter.finish();
            info!("Translator for {} ready", key);
        }
        Err(e) if e.is_cancellation() => info!("Load for {} aborted", key),
        Err(e) => error!("{}", e),
    }

    let shared = outcome.map_err(Arc::new);
    tx.send_modify(|state| state.outcome = Some(shared));
}

async fn load(
    inner: &LoaderInner,
    pair: &LanguagePair,
    token: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<TranslatorHandle> {
    token.check()?;
    // Cancel ends this load's wait; other callers keep resolving the registry.
    let catalog = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(LinguaError::Cancelled),
        catalog = inner.registry.get_catalog() => catalog,
    };

    let hops = at_stage(
        pair,
        LoadStage::Resolve,
        inner
            .paths
            .hops(catalog.registry(), pair)
            .ok_or_else(|| LinguaError::PairUnavailable { pair: pair.key() }),
    )?;
    reporter.set_model_count(hops.len());

    let sets = at_stage(
        pair,
        LoadStage::Resolve,
        hops.iter()
            .map(|hop| -> Result<ModelFileSet> {
                let entries = catalog
                    .entries_for(hop)
                    .ok_or_else(|| LinguaError::PairUnavailable { pair: hop.key() })?;
                let files = inner.registry.parser().model_files(hop, entries)?;
                Ok(ModelFileSet {
                    pair: hop.clone(),
                    files,
                })
            })
            .collect::<Result<Vec<_>>>(),
    )?;
    reporter.prelude_done();
    debug!(
        "Route for {}: {}",
        pair,
        hops.iter().map(|h| h.key()).collect::<Vec<_>>().join(" → ")
    );

    token.check()?;
    let models = at_stage(
        pair,
        LoadStage::Download,
        inner.fetcher.fetch_all(&sets, reporter, token).await,
    )?;

    token.check()?;
    let pair_key = pair.key();
    let spawned = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(LinguaError::Cancelled),
        spawned = inner.spawner.spawn(&pair_key) => spawned,
    };
    let worker = at_stage(pair, LoadStage::Initialize, spawned)?;
    let handle = TranslatorHandle::new(pair.clone(), hops, models, worker);

    match bring_up(inner, pair, &handle, token, reporter).await {
        Ok(()) => Ok(handle),
        Err(e) => {
            handle.dispose().await;
            Err(e)
        }
    }
}

/// Initialize the worker and run the trial translation.
async fn bring_up(
    inner: &LoaderInner,
    pair: &LanguagePair,
    handle: &TranslatorHandle,
    token: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<()> {
    let models_dir = inner.fetcher.cache().models_dir().display().to_string();
    let initialized = tokio::select! {
        biased;
        _ = token.cancelled() => Err(LinguaError::Cancelled),
        result = tokio::time::timeout(inner.init_timeout, handle.initialize()) => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinguaError::WorkerInitializationFailed {
                message: e.to_string(),
                hint: format!("The worker must be able to read the model files under {}", models_dir),
            }),
            Err(_) => Err(LinguaError::WorkerInitializationFailed {
                message: format!("no reply to initialize within {:?}", inner.init_timeout),
                hint: format!("The worker must be able to read the model files under {}", models_dir),
            }),
        },
    };
    at_stage(pair, LoadStage::Initialize, initialized)?;
    reporter.initialized();

    token.check()?;
    let trial = tokio::select! {
        biased;
        _ = token.cancelled() => Err(LinguaError::Cancelled),
        result = handle.translate(LoaderConfig::TRIAL_TEXT, false) => {
            result.map_err(|e| LinguaError::TrialTranslationFailed {
                pair: pair.key(),
                message: e.to_string(),
            })
        }
    };
    at_stage(pair, LoadStage::Trial, trial)?;
    token.check()?;
    Ok(())
}
