//! Pool of submission workers, one builder context each.
//!
//! Callers never touch a builder directly. They send a build closure to a worker;
//! the closure runs on that worker's task against the worker's own
//! `BuilderContext`, and the resulting `Submission` goes to the submission path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quorate_core::{
    BuilderContext, BuilderFactory, Command, ContextStats, OperationBuilder, Query,
};
use tokio::sync::oneshot;
use tracing::info;

use super::config::ServerConfig;
use super::submission::{LogIndex, Submission, SubmitError};
use super::worker::{BackgroundWorker, BuildRunnable, BuildTask};
use crate::traits::SubmissionPath;

/// Build closure accepted by [`SubmitPool::submit`].
pub trait BuildOp:
    FnOnce(&mut BuilderContext) -> Result<Submission, SubmitError> + Send + 'static
{
}

impl<F> BuildOp for F where
    F: FnOnce(&mut BuilderContext) -> Result<Submission, SubmitError> + Send + 'static
{
}

/// Build closure that arms `B`, applies `configure`, and encodes the result as a command.
pub fn command<B>(configure: impl FnOnce(&mut B) + Send + 'static) -> impl BuildOp
where
    B: OperationBuilder,
    B::Operation: Command,
{
    move |ctx: &mut BuilderContext| -> Result<Submission, SubmitError> {
        let builder = ctx.builder::<B>()?;
        configure(&mut *builder);
        Submission::command(builder.build())
    }
}

/// Build closure that arms `B`, applies `configure`, and encodes the result as a query.
pub fn query<B>(configure: impl FnOnce(&mut B) + Send + 'static) -> impl BuildOp
where
    B: OperationBuilder,
    B::Operation: Query,
{
    move |ctx: &mut BuilderContext| -> Result<Submission, SubmitError> {
        let builder = ctx.builder::<B>()?;
        configure(&mut *builder);
        Submission::query(builder.build())
    }
}

/// Fixed set of submission workers.
///
/// `submit` spreads work round-robin; `submit_to` pins work to one worker, for
/// callers that want a client's operations handled by the same context.
pub struct SubmitPool {
    workers: Vec<BackgroundWorker<BuildRunnable>>,
    next: AtomicUsize,
}

impl SubmitPool {
    /// Spawns `config.worker_count` workers (at least one). Must be called inside a
    /// tokio runtime.
    #[must_use]
    pub fn start(
        config: &ServerConfig,
        factory: Arc<BuilderFactory>,
        path: Arc<dyn SubmissionPath>,
    ) -> Self {
        let count = config.worker_count.max(1);
        let workers = (0..count)
            .map(|index| {
                let runnable = BuildRunnable::new(index, factory.clone(), path.clone());
                BackgroundWorker::start(runnable, config.stats_interval_ms, config.queue_capacity)
            })
            .collect();
        info!(
            node_id = %config.node_id,
            workers = count,
            variants = factory.len(),
            "submission pool started"
        );
        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs `build` on the next worker in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns the builder, encoding, or submission-path error produced on the
    /// worker, or [`SubmitError::WorkerUnavailable`] after [`stop`](Self::stop).
    pub async fn submit(&self, build: impl BuildOp) -> Result<LogIndex, SubmitError> {
        let worker = self.next.fetch_add(1, Ordering::Relaxed);
        self.submit_to(worker, build).await
    }

    /// Runs `build` on worker `worker % worker_count`.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub async fn submit_to(
        &self,
        worker: usize,
        build: impl BuildOp,
    ) -> Result<LogIndex, SubmitError> {
        let worker = self
            .workers
            .get(worker % self.workers.len().max(1))
            .ok_or(SubmitError::WorkerUnavailable)?;
        let (reply, rx) = oneshot::channel();
        worker
            .submit(BuildTask::Submit {
                build: Box::new(build),
                reply,
            })
            .await
            .map_err(|_| SubmitError::WorkerUnavailable)?;
        rx.await.map_err(|_| SubmitError::WorkerUnavailable)?
    }

    /// Cache counters from every worker, in worker order.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::WorkerUnavailable`] after [`stop`](Self::stop).
    pub async fn stats(&self) -> Result<Vec<ContextStats>, SubmitError> {
        let mut all = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (reply, rx) = oneshot::channel();
            worker
                .submit(BuildTask::Stats { reply })
                .await
                .map_err(|_| SubmitError::WorkerUnavailable)?;
            all.push(rx.await.map_err(|_| SubmitError::WorkerUnavailable)?);
        }
        Ok(all)
    }

    /// Stops every worker and waits for them to exit.
    pub async fn stop(&mut self) {
        for worker in &mut self.workers {
            worker.stop().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use quorate_core::{BuilderError, Consistency, Operation, OperationKind, OperationSlot};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::service::log::InMemoryLog;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Put {
        key: String,
        value: String,
    }

    impl Operation for Put {
        type Output = Option<String>;
        const NAME: &'static str = "put";
    }

    impl Command for Put {}

    #[derive(Default)]
    struct PutBuilder {
        slot: OperationSlot<Put>,
    }

    impl PutBuilder {
        fn key(&mut self, key: &str) -> &mut Self {
            self.operation_mut().key = key.to_string();
            self
        }

        fn value(&mut self, value: &str) -> &mut Self {
            self.operation_mut().value = value.to_string();
            self
        }
    }

    impl OperationBuilder for PutBuilder {
        type Operation = Put;

        fn create(&self) -> Put {
            Put::default()
        }

        fn slot(&self) -> &OperationSlot<Put> {
            &self.slot
        }

        fn slot_mut(&mut self) -> &mut OperationSlot<Put> {
            &mut self.slot
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Get {
        key: String,
        consistency: Consistency,
    }

    impl Operation for Get {
        type Output = Option<String>;
        const NAME: &'static str = "get";
    }

    impl Query for Get {
        fn consistency(&self) -> Consistency {
            self.consistency
        }
    }

    #[derive(Default)]
    struct GetBuilder {
        slot: OperationSlot<Get>,
    }

    impl OperationBuilder for GetBuilder {
        type Operation = Get;

        fn create(&self) -> Get {
            Get::default()
        }

        fn slot(&self) -> &OperationSlot<Get> {
            &self.slot
        }

        fn slot_mut(&mut self) -> &mut OperationSlot<Get> {
            &mut self.slot
        }
    }

    fn config(workers: usize) -> ServerConfig {
        ServerConfig {
            node_id: "node-test".to_string(),
            worker_count: workers,
            ..ServerConfig::default()
        }
    }

    fn factory(put_constructions: &Arc<AtomicU32>) -> Arc<BuilderFactory> {
        let counter = put_constructions.clone();
        let mut factory = BuilderFactory::new();
        factory
            .register::<PutBuilder, _>(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(PutBuilder::default())
            })
            .unwrap();
        factory.register_default::<GetBuilder>().unwrap();
        Arc::new(factory)
    }

    #[tokio::test]
    async fn commands_and_queries_reach_the_log_in_order() {
        let constructions = Arc::new(AtomicU32::new(0));
        let log = Arc::new(InMemoryLog::new());
        let mut pool = SubmitPool::start(&config(1), factory(&constructions), log.clone());

        let put_index = pool
            .submit(command::<PutBuilder>(|b| {
                b.key("k").value("v");
            }))
            .await
            .unwrap();
        let get_index = pool
            .submit(query::<GetBuilder>(|b| {
                let op = b.operation_mut();
                op.key = "k".to_string();
                op.consistency = Consistency::Sequential;
            }))
            .await
            .unwrap();
        assert_eq!((put_index, get_index), (1, 2));

        let put: Put = log.get(1).unwrap().decode_command().unwrap();
        assert_eq!(put, Put { key: "k".to_string(), value: "v".to_string() });

        let get_entry = log.get(2).unwrap();
        assert_eq!(get_entry.kind, OperationKind::Query);
        assert_eq!(get_entry.consistency, Some(Consistency::Sequential));

        pool.stop().await;
    }

    #[tokio::test]
    async fn each_worker_constructs_its_builder_once() {
        let constructions = Arc::new(AtomicU32::new(0));
        let log = Arc::new(InMemoryLog::new());
        let mut pool = SubmitPool::start(&config(3), factory(&constructions), log.clone());
        assert_eq!(pool.worker_count(), 3);

        for i in 0..12 {
            pool.submit(command::<PutBuilder>(move |b| {
                b.key(&format!("k{i}"));
            }))
            .await
            .unwrap();
        }

        assert_eq!(constructions.load(Ordering::SeqCst), 3);
        let stats = pool.stats().await.unwrap();
        assert!(stats.iter().all(|s| s.constructions == 1 && s.arms == 4));
        assert_eq!(log.len(), 12);

        pool.stop().await;
    }

    #[tokio::test]
    async fn rearmed_builders_never_leak_previous_fields() {
        let constructions = Arc::new(AtomicU32::new(0));
        let log = Arc::new(InMemoryLog::new());
        let mut pool = SubmitPool::start(&config(1), factory(&constructions), log.clone());

        pool.submit_to(0, command::<PutBuilder>(|b| {
            b.key("a").value("secret");
        }))
        .await
        .unwrap();
        pool.submit_to(0, command::<PutBuilder>(|b| {
            b.key("b");
        }))
        .await
        .unwrap();

        let second: Put = log.get(2).unwrap().decode().unwrap();
        assert_eq!(second.key, "b");
        assert_eq!(second.value, "", "value from the previous build must not carry over");

        pool.stop().await;
    }

    #[tokio::test]
    async fn configuration_errors_reach_the_submitter() {
        let log = Arc::new(InMemoryLog::new());
        let mut pool =
            SubmitPool::start(&config(2), Arc::new(BuilderFactory::new()), log.clone());

        for _ in 0..2 {
            let err = pool
                .submit(command::<PutBuilder>(|_| {}))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                SubmitError::Builder(BuilderError::Unregistered { .. })
            ));
        }
        assert!(log.is_empty());

        pool.stop().await;
    }

    #[tokio::test]
    async fn submit_after_stop_reports_worker_unavailable() {
        let constructions = Arc::new(AtomicU32::new(0));
        let log = Arc::new(InMemoryLog::new());
        let mut pool = SubmitPool::start(&config(0), factory(&constructions), log);
        assert_eq!(pool.worker_count(), 1);

        pool.stop().await;
        let err = pool
            .submit(command::<PutBuilder>(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::WorkerUnavailable));
    }
}
