use async_trait::async_trait;

use crate::service::submission::{LogIndex, Submission, SubmitError};

/// Boundary to the consensus submission path.
///
/// Implementations take a finished, encoded operation and are responsible for
/// ordering and replicating it. Implementations: in-memory log (tests and the
/// harness); a real consensus module lives outside this crate.
#[async_trait]
pub trait SubmissionPath: Send + Sync {
    /// Hand off a submission. Returns the index it was assigned.
    async fn submit(&self, submission: Submission) -> Result<LogIndex, SubmitError>;

    /// Number of submissions accepted so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
