//! Quorate Server: per-worker builder contexts and the handoff to the consensus
//! submission path.

pub mod service;
pub mod traits;

pub use service::{
    command, query, InMemoryLog, ServerConfig, Submission, SubmitError, SubmitPool,
};
pub use traits::SubmissionPath;
