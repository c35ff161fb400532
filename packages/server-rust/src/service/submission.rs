//! Handoff envelope between built operations and the submission path.
//!
//! A [`Submission`] is what leaves a worker: the operation's variant name, whether
//! it reads or writes, the consistency a query asked for, and the operation body
//! encoded as named `MsgPack` via `rmp_serde::to_vec_named()`. Encoding at this
//! point is the last check that the operation is transportable.

use quorate_core::{BuilderError, Command, Consistency, Operation, OperationKind, Query};
use serde::{Deserialize, Serialize};

/// Position assigned to a submission by the submission path. Starts at 1.
pub type LogIndex = u64;

/// An encoded operation ready for the consensus submission path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// `Operation::NAME` of the encoded variant.
    pub name: String,
    pub kind: OperationKind,
    /// Requested read consistency. `None` for commands.
    pub consistency: Option<Consistency>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Submission {
    /// Encodes a command.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Encode`] if the operation fails to serialize.
    pub fn command<O: Command>(op: &O) -> Result<Self, SubmitError> {
        Ok(Self {
            name: O::NAME.to_string(),
            kind: OperationKind::Command,
            consistency: None,
            payload: rmp_serde::to_vec_named(op)?,
        })
    }

    /// Encodes a query together with its consistency level.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Encode`] if the operation fails to serialize.
    pub fn query<O: Query>(op: &O) -> Result<Self, SubmitError> {
        Ok(Self {
            name: O::NAME.to_string(),
            kind: OperationKind::Query,
            consistency: Some(op.consistency()),
            payload: rmp_serde::to_vec_named(op)?,
        })
    }

    /// Decodes the payload as operation `O`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::VariantMismatch`] if the envelope carries a different
    /// variant, or [`SubmitError::Decode`] if the payload is malformed.
    pub fn decode<O: Operation>(&self) -> Result<O, SubmitError> {
        if self.name != O::NAME {
            return Err(SubmitError::VariantMismatch {
                expected: O::NAME,
                found: self.name.clone(),
            });
        }
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    /// Decodes the payload as command `O`, rejecting query envelopes.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode), plus [`SubmitError::KindMismatch`].
    pub fn decode_command<O: Command>(&self) -> Result<O, SubmitError> {
        self.expect_kind(OperationKind::Command)?;
        self.decode()
    }

    /// Decodes the payload as query `O`, rejecting command envelopes.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode), plus [`SubmitError::KindMismatch`].
    pub fn decode_query<O: Query>(&self) -> Result<O, SubmitError> {
        self.expect_kind(OperationKind::Query)?;
        self.decode()
    }

    fn expect_kind(&self, expected: OperationKind) -> Result<(), SubmitError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(SubmitError::KindMismatch {
                expected,
                found: self.kind,
            })
        }
    }
}

/// Errors on the path from builder to submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error("failed to encode operation: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode operation: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("expected operation {expected}, found {found}")]
    VariantMismatch { expected: &'static str, found: String },
    #[error("expected {expected:?} envelope, found {found:?}")]
    KindMismatch {
        expected: OperationKind,
        found: OperationKind,
    },
    #[error("submission worker unavailable")]
    WorkerUnavailable,
}
