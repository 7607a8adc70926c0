//! Ready translators and the cache that holds them.

use crate::config::WorkerConfig;
use crate::error::{LinguaError, Result};
use crate::fetch::descriptor::LocalModel;
use crate::pair::LanguagePair;
use crate::rpc::protocol::TranslateRequest;
use crate::rpc::spawner::{Worker, WorkerLifetime};
use crate::rpc::transport::RpcTransport;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct HandleInner {
    pair: LanguagePair,
    hops: Vec<LanguagePair>,
    models: Vec<LocalModel>,
    transport: RpcTransport,
    lifetime: Mutex<Option<WorkerLifetime>>,
    disposed: AtomicBool,
}

/// A worker with models loaded for one language pair.
///
/// Clones share the same worker.
#[derive(Clone)]
pub struct TranslatorHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for TranslatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorHandle")
            .field("pair", &self.inner.pair)
            .field("hops", &self.inner.hops)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl TranslatorHandle {
    pub fn new(
        pair: LanguagePair,
        hops: Vec<LanguagePair>,
        models: Vec<LocalModel>,
        worker: Worker,
    ) -> Self {
        let Worker {
            transport,
            lifetime,
        } = worker;
        Self {
            inner: Arc::new(HandleInner {
                pair,
                hops,
                models,
                transport,
                lifetime: Mutex::new(Some(lifetime)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn pair(&self) -> &LanguagePair {
        &self.inner.pair
    }

    /// Direct hops this translator chains, in order.
    pub fn hops(&self) -> &[LanguagePair] {
        &self.inner.hops
    }

    pub fn is_pivot(&self) -> bool {
        self.inner.hops.len() > 1
    }

    pub fn models(&self) -> &[LocalModel] {
        &self.inner.models
    }

    /// True if both handles share one worker.
    pub fn same_as(&self, other: &TranslatorHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Send the models to the worker.
    pub async fn initialize(&self) -> Result<()> {
        self.inner
            .transport
            .initialize(self.inner.models.clone())
            .await
    }

    pub async fn translate(&self, text: &str, html: bool) -> Result<String> {
        if self.is_disposed() {
            return Err(LinguaError::WorkerLost {
                label: self.inner.pair.key(),
            });
        }
        let response = self
            .inner
            .transport
            .translate(TranslateRequest {
                from: self.inner.pair.source.clone(),
                to: self.inner.pair.target.clone(),
                text: text.to_string(),
                html,
            })
            .await?;
        Ok(response.target.text)
    }

    /// Ask the worker to release its models, then stop it. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.inner.transport.is_open() {
            match tokio::time::timeout(WorkerConfig::DISPOSE_TIMEOUT, self.inner.transport.dispose())
                .await
            {
                Ok(Ok(())) => debug!("Disposed translator for {}", self.inner.pair),
                Ok(Err(e)) => debug!("Worker for {} failed to dispose: {}", self.inner.pair, e),
                Err(_) => warn!(
                    "Worker for {} did not acknowledge dispose within {:?}",
                    self.inner.pair,
                    WorkerConfig::DISPOSE_TIMEOUT
                ),
            }
        }

        let lifetime = self
            .inner
            .lifetime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(lifetime);
    }
}

/// Ready translators keyed by `"{source}-{target}"`.
///
/// Only the loader inserts; a handle is present only after its worker
/// initialized and passed the trial translation.
#[derive(Default)]
pub struct TranslatorCache {
    entries: Mutex<HashMap<String, TranslatorHandle>>,
}

impl TranslatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TranslatorHandle>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, pair: &LanguagePair) -> Option<TranslatorHandle> {
        self.lock().get(&pair.key()).cloned()
    }

    pub fn contains(&self, pair: &LanguagePair) -> bool {
        self.lock().contains_key(&pair.key())
    }

    pub(crate) fn insert(&self, handle: TranslatorHandle) -> Option<TranslatorHandle> {
        self.lock().insert(handle.pair().key(), handle)
    }

    pub(crate) fn remove(&self, pair: &LanguagePair) -> Option<TranslatorHandle> {
        self.lock().remove(&pair.key())
    }

    /// Remove `handle` only if it is still the cached entry for its pair.
    pub(crate) fn remove_if_same(&self, handle: &TranslatorHandle) -> bool {
        let mut entries = self.lock();
        let key = handle.pair().key();
        match entries.get(&key) {
            Some(current) if current.same_as(handle) => {
                entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn drain(&self) -> Vec<TranslatorHandle> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }

    pub fn pairs(&self) -> Vec<LanguagePair> {
        let mut pairs: Vec<LanguagePair> =
            self.lock().values().map(|h| h.pair().clone()).collect();
        pairs.sort();
        pairs
    }

    /// Keys of the direct hops behind every cached translator.
    pub fn hops_in_use(&self) -> HashSet<String> {
        self.lock()
            .values()
            .flat_map(|handle| handle.hops().iter().map(LanguagePair::key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
