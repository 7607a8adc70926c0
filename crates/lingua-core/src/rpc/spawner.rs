//! Starting computation units.
//!
//! One worker is started per loaded language pair. [`ProcessSpawner`] runs an
//! external executable speaking the protocol over stdin/stdout;
//! [`InProcessSpawner`] runs a [`TranslationEngine`] on a tokio task.

use super::transport::RpcTransport;
use super::worker::{serve, TranslationEngine};
use crate::config::WorkerConfig;
use crate::error::{LinguaError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps a worker alive; dropping it stops the worker.
pub enum WorkerLifetime {
    Process(Child),
    Task(JoinHandle<()>),
}

impl Drop for WorkerLifetime {
    fn drop(&mut self) {
        match self {
            // `kill_on_drop` reaps the process.
            WorkerLifetime::Process(_) => {}
            WorkerLifetime::Task(task) => task.abort(),
        }
    }
}

/// A started worker and the channel to it.
pub struct Worker {
    pub transport: RpcTransport,
    pub lifetime: WorkerLifetime,
}

/// Starts a computation unit for a language pair.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, label: &str) -> Result<Worker>;
}

/// Runs the worker as a child process speaking the protocol on stdio.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    command: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn command(&self) -> &PathBuf {
        &self.command
    }

    fn hint(&self) -> String {
        format!(
            "The translation worker {:?} must be installed and reachable on PATH, \
             or configured with LinguaApiBuilder::worker_command",
            self.command
        )
    }
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new(WorkerConfig::DEFAULT_COMMAND)
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, label: &str) -> Result<Worker> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("LINGUA_WORKER_LABEL", label)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LinguaError::WorkerInitializationFailed {
                message: format!("failed to start {}: {}", self.command.display(), e),
                hint: self.hint(),
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(LinguaError::WorkerInitializationFailed {
                    message: "worker stdio was not captured".to_string(),
                    hint: self.hint(),
                });
            }
        };

        info!(
            "Started worker {} for {} (pid {:?})",
            self.command.display(),
            label,
            child.id()
        );
        Ok(Worker {
            transport: RpcTransport::new(label, stdout, stdin),
            lifetime: WorkerLifetime::Process(child),
        })
    }
}

type EngineFactory = dyn Fn() -> Box<dyn TranslationEngine> + Send + Sync;

/// Runs each worker as a task over an in-memory duplex channel.
#[derive(Clone)]
pub struct InProcessSpawner {
    factory: Arc<EngineFactory>,
}

impl InProcessSpawner {
    /// `factory` builds a fresh engine for every spawned worker.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn TranslationEngine> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self, label: &str) -> Result<Worker> {
        let (client, worker) = tokio::io::duplex(WorkerConfig::DUPLEX_BUFFER);
        let (client_read, client_write) = tokio::io::split(client);
        let (worker_read, worker_write) = tokio::io::split(worker);

        let engine = (self.factory)();
        let worker_label = label.to_string();
        let task = tokio::spawn(async move {
            match serve(worker_read, worker_write, engine).await {
                Ok(()) => debug!("In-process worker for {} exited", worker_label),
                Err(e) => warn!("In-process worker for {} failed: {}", worker_label, e),
            }
        });

        debug!("Started in-process worker for {}", label);
        Ok(Worker {
            transport: RpcTransport::new(label, client_read, client_write),
            lifetime: WorkerLifetime::Task(task),
        })
    }
}
