//! The operation contract: what it means for a type to be a unit of replicated work.
//!
//! Every command or query submitted to the consensus log implements [`Operation`].
//! The serde supertraits make transportability a compile-time property: a variant
//! holding a socket, a file handle, or any other non-serializable resource simply
//! does not satisfy the contract.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A typed, transportable unit of work destined for a replicated state machine.
///
/// `Output` is the result type the state-machine layer produces once the operation
/// is committed and applied. This crate never interprets it; it only carries the
/// association from operation type to result type.
pub trait Operation: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Value produced by applying this operation after commit.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Stable variant name. Used in logs and to check handoff envelopes on decode.
    const NAME: &'static str;
}

/// Result type declared by operation `O`.
pub type OutputOf<O> = <O as Operation>::Output;

/// An operation that mutates replicated state.
pub trait Command: Operation {}

/// An operation that reads replicated state without mutating it.
pub trait Query: Operation {
    /// Consistency level this query must be served at.
    fn consistency(&self) -> Consistency {
        Consistency::Linearizable
    }
}

// ---------------------------------------------------------------------------
// Consistency / OperationKind
// ---------------------------------------------------------------------------

/// Read consistency levels, weakest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Consistency {
    /// Served from any member's local state, possibly stale.
    Serializable,
    /// Served in log order relative to the same client's earlier operations.
    Sequential,
    /// Served by the leader while its lease is believed valid.
    LinearizableLease,
    /// Served by the leader after confirming leadership with a quorum.
    #[default]
    Linearizable,
}

/// Discriminates writes from reads at the submission boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Command,
    Query,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
