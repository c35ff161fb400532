//! Append-only in-memory [`SubmissionPath`] for tests and the harness binary.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::service::submission::{LogIndex, Submission, SubmitError};
use crate::traits::SubmissionPath;

/// Accepts every submission and appends it to a vector.
///
/// Indices start at 1, matching how consensus logs number their entries.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    entries: Mutex<Vec<Submission>>,
}

impl InMemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry at `index`, if one has been appended.
    #[must_use]
    pub fn get(&self, index: LogIndex) -> Option<Submission> {
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        self.entries.lock().get(position).cloned()
    }

    /// Snapshot of every entry in index order.
    #[must_use]
    pub fn entries(&self) -> Vec<Submission> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl SubmissionPath for InMemoryLog {
    async fn submit(&self, submission: Submission) -> Result<LogIndex, SubmitError> {
        let mut entries = self.entries.lock();
        entries.push(submission);
        let index = entries.len() as LogIndex;
        trace!(index, "appended submission");
        Ok(index)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
