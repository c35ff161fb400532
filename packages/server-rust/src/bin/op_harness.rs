//! Drives a `SubmitPool` with a stream of demo commands and queries and reports
//! how many builders each worker had to construct.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use quorate_core::{
    BuilderFactory, Command, Consistency, Operation, OperationBuilder, OperationSlot, Query,
};
use quorate_server::{command, query, InMemoryLog, ServerConfig, SubmissionPath, SubmitPool};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "op-harness", about = "Exercise the per-worker operation builder cache")]
struct Args {
    /// Identifier reported in logs.
    #[arg(long, env = "QUORATE_NODE_ID", default_value = "node-1")]
    node_id: String,
    /// Number of submission workers.
    #[arg(long, env = "QUORATE_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Task queue capacity per worker.
    #[arg(long, env = "QUORATE_QUEUE_CAPACITY", default_value_t = 256)]
    queue_capacity: usize,
    /// Cache stats reporting interval in milliseconds.
    #[arg(long, env = "QUORATE_STATS_INTERVAL_MS", default_value_t = 1_000)]
    stats_interval_ms: u64,
    /// Operations to submit. Every fourth one is a query.
    #[arg(long, default_value_t = 10_000)]
    operations: u64,
    /// Emit logs as JSON lines.
    #[arg(long, env = "QUORATE_LOG_JSON")]
    json: bool,
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            node_id: args.node_id.clone(),
            worker_count: args.workers,
            queue_capacity: args.queue_capacity,
            stats_interval_ms: args.stats_interval_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Demo variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Put {
    key: String,
    value: u64,
}

impl Operation for Put {
    type Output = Option<u64>;
    const NAME: &'static str = "put";
}

impl Command for Put {}

#[derive(Default)]
struct PutBuilder {
    slot: OperationSlot<Put>,
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Get {
    key: String,
}

impl Operation for Get {
    type Output = Option<u64>;
    const NAME: &'static str = "get";
}

impl Query for Get {
    fn consistency(&self) -> Consistency {
        Consistency::Sequential
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

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut factory = BuilderFactory::new();
    factory.register_default::<PutBuilder>()?;
    factory.register_default::<GetBuilder>()?;
    let factory = Arc::new(factory);
    info!(variants = ?factory.variants(), "registered builders");

    let log = Arc::new(InMemoryLog::new());
    let mut pool = SubmitPool::start(&ServerConfig::from(&args), factory, log.clone());

    let started = Instant::now();
    for i in 0..args.operations {
        let key = format!("key-{}", i % 64);
        if i % 4 == 3 {
            pool.submit(query::<GetBuilder>(move |b| {
                b.operation_mut().key = key;
            }))
            .await?;
        } else {
            pool.submit(command::<PutBuilder>(move |b| {
                let op = b.operation_mut();
                op.key = key;
                op.value = i;
            }))
            .await?;
        }
    }
    let elapsed = started.elapsed();

    for (worker, stats) in pool.stats().await?.iter().enumerate() {
        info!(
            worker,
            constructions = stats.constructions,
            arms = stats.arms,
            cached = stats.cached,
            "worker builder cache"
        );
    }
    info!(
        submitted = log.len(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "harness finished"
    );

    pool.stop().await;
    Ok(())
}
