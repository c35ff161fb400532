//! Submission-side service framework.
//!
//! 1. **Building** (`pool`, `worker`): build closures run on a worker that owns
//!    one `BuilderContext`
//! 2. **Handoff** (`submission`): built operations are encoded into a `Submission`
//! 3. **Submission path** (`log`, `crate::traits`): the envelope is handed to the
//!    consensus submission boundary

pub mod config;
pub mod log;
pub mod pool;
pub mod submission;
pub mod worker;

pub use config::ServerConfig;
pub use log::InMemoryLog;
pub use pool::{command, query, BuildOp, SubmitPool};
pub use submission::{LogIndex, Submission, SubmitError};
pub use worker::{BackgroundRunnable, BackgroundWorker, BuildFn, BuildRunnable, BuildTask};
