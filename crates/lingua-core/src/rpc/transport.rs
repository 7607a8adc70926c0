//! Id-correlated request/response channel to one worker.
//!
//! Calls may be issued concurrently. Each gets a strictly increasing id and
//! an entry in the pending table; a single reader task matches responses to
//! entries by id. When the channel closes, every pending call fails with
//! [`LinguaError::WorkerLost`] and further calls are refused.

use super::protocol::{
    read_frame, write_frame, RemoteError, TranslateRequest, TranslateResponse, WorkerCall,
    WorkerRequest, WorkerResponse,
};
use crate::error::{LinguaError, Result};
use crate::fetch::descriptor::LocalModel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Outcome = std::result::Result<serde_json::Value, RemoteError>;

struct PendingCall {
    description: String,
    reply: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    closed: bool,
}

type SharedPending = Arc<Mutex<PendingTable>>;

fn lock(pending: &SharedPending) -> std::sync::MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending entry if the caller stops waiting before a reply.
struct PendingGuard<'a> {
    pending: &'a SharedPending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

/// Client side of the worker protocol.
pub struct RpcTransport {
    label: String,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: SharedPending,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
}

impl RpcTransport {
    /// Start a transport over a reader/writer pair.
    ///
    /// `label` names the worker in logs and errors.
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let pending: SharedPending = Arc::new(Mutex::new(PendingTable::default()));
        let reader_task = tokio::spawn(read_loop(label.clone(), reader, pending.clone()));

        Self {
            label,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader_task,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once the worker's channel has closed.
    pub fn is_open(&self) -> bool {
        !lock(&self.pending).closed
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).calls.len()
    }

    /// Issue a call and wait for its reply.
    pub async fn call(&self, call: WorkerCall) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let description = call.describe();
        let frame = WorkerRequest { id, call }.to_bytes()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut table = lock(&self.pending);
            if table.closed {
                return Err(self.lost());
            }
            table.calls.insert(
                id,
                PendingCall {
                    description: description.clone(),
                    reply: reply_tx,
                },
            );
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!("[{}] -> #{} {}", self.label, id, description);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &frame).await {
                warn!("[{}] Failed to send {}: {}", self.label, description, e);
                return Err(match e {
                    LinguaError::Protocol { .. } => e,
                    _ => self.lost(),
                });
            }
        }

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(augment(remote, &description)),
            Err(_) => Err(self.lost()),
        }
    }

    pub async fn initialize(&self, models: Vec<LocalModel>) -> Result<()> {
        self.call(WorkerCall::Initialize { models }).await?;
        Ok(())
    }

    pub async fn translate(&self, request: TranslateRequest) -> Result<TranslateResponse> {
        let value = self.call(WorkerCall::Translate(request)).await?;
        serde_json::from_value(value).map_err(|e| LinguaError::Protocol {
            message: format!("malformed translate result from {}: {}", self.label, e),
        })
    }

    pub async fn dispose(&self) -> Result<()> {
        self.call(WorkerCall::Dispose).await?;
        Ok(())
    }

    fn lost(&self) -> LinguaError {
        LinguaError::WorkerLost {
            label: self.label.clone(),
        }
    }
}

impl Drop for RpcTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Attach the originating call to a remote error.
fn augment(remote: RemoteError, description: &str) -> LinguaError {
    let stack = match remote.stack {
        Some(stack) if !stack.is_empty() => format!("{}\n    at {}", stack, description),
        _ => format!("    at {}", description),
    };
    LinguaError::Rpc {
        message: format!("{} (while calling {})", remote.message, description),
        stack: Some(stack),
        call: description.to_string(),
    }
}

async fn read_loop<R: AsyncRead + Unpin>(label: String, mut reader: R, pending: SharedPending) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => dispatch(&label, &frame, &pending),
            Ok(None) => {
                debug!("[{}] Worker channel closed", label);
                break;
            }
            Err(e) => {
                warn!("[{}] Worker channel failed: {}", label, e);
                break;
            }
        }
    }

    // Dropping the reply senders wakes every waiter with `WorkerLost`.
    let orphaned = {
        let mut table = lock(&pending);
        table.closed = true;
        std::mem::take(&mut table.calls)
    };
    if !orphaned.is_empty() {
        warn!(
            "[{}] Worker lost with {} call(s) in flight: {}",
            label,
            orphaned.len(),
            orphaned
                .values()
                .map(|call| call.description.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

fn dispatch(label: &str, frame: &[u8], pending: &SharedPending) {
    let response: WorkerResponse = match serde_json::from_slice(frame) {
        Ok(response) => response,
        Err(e) => {
            warn!("[{}] Dropping malformed response: {}", label, e);
            return;
        }
    };

    let id = response.id;
    let entry = lock(pending).calls.remove(&id);
    match entry {
        Some(call) => {
            debug!("[{}] <- #{} {}", label, id, call.description);
            let _ = call.reply.send(response.into_outcome());
        }
        None => warn!("[{}] Dropping response for unknown call id {}", label, id),
    }
}
