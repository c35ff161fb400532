//! Submission workers.
//!
//! A `BackgroundWorker<R>` drives a `BackgroundRunnable` from a bounded mpsc
//! channel on its own tokio task. `BuildRunnable` is the runnable used for
//! submissions: it owns one `BuilderContext`, so every builder it caches is
//! only ever touched from that worker's task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quorate_core::{BuilderContext, BuilderFactory, ContextStats};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::submission::{LogIndex, Submission, SubmitError};
use crate::traits::SubmissionPath;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Runs a `BackgroundRunnable` on a dedicated tokio task.
///
/// The task processes queued tasks in order, calls `on_tick` every
/// `tick_interval_ms`, and calls `shutdown` once when stopped or when every
/// sender is dropped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker. `capacity` bounds the task queue; zero is treated as one.
    pub fn start(mut runnable: R, tick_interval_ms: u64, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
            // The first tick completes immediately; consume it so on_tick waits a full period.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queue a task, waiting for capacity if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker and wait for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// BuildTask / BuildRunnable
// ---------------------------------------------------------------------------

/// Closure that arms builders from the worker's context and produces a submission.
pub type BuildFn =
    Box<dyn FnOnce(&mut BuilderContext) -> Result<Submission, SubmitError> + Send>;

/// Work accepted by a submission worker.
pub enum BuildTask {
    /// Build an operation in the worker's context and hand it to the submission path.
    Submit {
        build: BuildFn,
        reply: oneshot::Sender<Result<LogIndex, SubmitError>>,
    },
    /// Report the worker's builder cache counters.
    Stats { reply: oneshot::Sender<ContextStats> },
}

impl std::fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { .. } => f.write_str("BuildTask::Submit"),
            Self::Stats { .. } => f.write_str("BuildTask::Stats"),
        }
    }
}

/// Runnable that owns one builder context and forwards what it builds.
pub struct BuildRunnable {
    worker: usize,
    context: BuilderContext,
    path: Arc<dyn SubmissionPath>,
}

impl BuildRunnable {
    #[must_use]
    pub fn new(
        worker: usize,
        factory: Arc<BuilderFactory>,
        path: Arc<dyn SubmissionPath>,
    ) -> Self {
        Self {
            worker,
            context: BuilderContext::new(factory),
            path,
        }
    }
}

#[async_trait]
impl BackgroundRunnable for BuildRunnable {
    type Task = BuildTask;

    async fn run(&mut self, task: BuildTask) {
        match task {
            BuildTask::Submit { build, reply } => {
                let result = match build(&mut self.context) {
                    Ok(submission) => {
                        trace!(worker = self.worker, name = %submission.name, "submitting");
                        self.path.submit(submission).await
                    }
                    Err(err) => Err(err),
                };
                // The caller may have stopped waiting; the outcome is still recorded by the path.
                let _ = reply.send(result);
            }
            BuildTask::Stats { reply } => {
                let _ = reply.send(self.context.stats());
            }
        }
    }

    async fn on_tick(&mut self) {
        let stats = self.context.stats();
        debug!(
            worker = self.worker,
            context = self.context.id(),
            cached = stats.cached,
            constructions = stats.constructions,
            arms = stats.arms,
            failures = stats.failures,
            "builder cache stats"
        );
    }

    async fn shutdown(&mut self) {
        debug!(worker = self.worker, context = self.context.id(), "submission worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
