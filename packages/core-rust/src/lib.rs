//! Quorate Core: the operation contract and the per-context builder cache.
//!
//! Commands and queries bound for a replicated state machine implement
//! [`Operation`]. Each variant ships with an [`OperationBuilder`]; hosts register
//! builder constructors once in a [`BuilderFactory`] and obtain armed builders
//! from a [`BuilderContext`] owned by the calling thread or worker.

pub mod builder;
pub mod error;
pub mod local;
pub mod operation;
pub mod registry;

pub use builder::{OperationBuilder, OperationSlot};
pub use error::BuilderError;
pub use operation::{Command, Consistency, Operation, OperationKind, OutputOf, Query};
pub use registry::{BuilderContext, BuilderFactory, ContextStats};
