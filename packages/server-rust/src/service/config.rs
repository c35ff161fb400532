/// Server-level configuration for the submission workers.
///
/// Controls how many builder contexts exist (one per worker), how much work may
/// queue in front of each worker, and how often workers report cache stats.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node.
    pub node_id: String,
    /// Number of submission workers. Each owns one builder context.
    pub worker_count: usize,
    /// Bounded task queue capacity per worker.
    pub queue_capacity: usize,
    /// Interval between cache stats reports in milliseconds.
    pub stats_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            worker_count: 4,
            queue_capacity: 256,
            stats_interval_ms: 60_000,
        }
    }
}
