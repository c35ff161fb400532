//! Builder base: the construction protocol every operation variant follows.
//!
//! A builder is reused across many build cycles. Each cycle begins when the
//! owning [`BuilderContext`](crate::BuilderContext) arms it: [`OperationBuilder::create`]
//! produces a zero-value operation and [`OperationBuilder::init`] installs it,
//! dropping whatever the previous cycle left behind. Variant setters then mutate
//! the armed instance and [`OperationBuilder::build`] exposes it.
//!
//! `build` hands out a shared borrow of the slot, so a built operation cannot be
//! held across the next arm; take an owned copy with [`OperationBuilder::finish`]
//! before handing it to the submission path.

use crate::operation::Operation;

// ---------------------------------------------------------------------------
// OperationSlot
// ---------------------------------------------------------------------------

/// The single in-progress operation a builder holds.
///
/// `generation` counts arms. A slot at generation 0 has never been armed by a
/// context and still holds whatever value the builder was constructed with.
#[derive(Debug, Clone)]
pub struct OperationSlot<O> {
    operation: O,
    generation: u64,
}

impl<O: Operation> OperationSlot<O> {
    /// Creates an unarmed slot holding `operation`.
    #[must_use]
    pub fn new(operation: O) -> Self {
        Self {
            operation,
            generation: 0,
        }
    }

    /// Replaces the held operation and advances the arm generation.
    pub fn install(&mut self, operation: O) {
        self.operation = operation;
        self.generation += 1;
    }

    #[must_use]
    pub fn current(&self) -> &O {
        &self.operation
    }

    pub fn current_mut(&mut self) -> &mut O {
        &mut self.operation
    }

    /// Number of times this slot has been armed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a context has armed this slot at least once.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.generation > 0
    }
}

impl<O: Operation + Default> Default for OperationSlot<O> {
    fn default() -> Self {
        Self::new(O::default())
    }
}

// ---------------------------------------------------------------------------
// OperationBuilder
// ---------------------------------------------------------------------------

/// Reusable constructor for one operation variant.
///
/// Implementors embed an [`OperationSlot`] and supply [`create`](Self::create).
/// A builder lives inside exactly one context and is never shared, so it needs
/// no interior synchronization. `Send` lets a context move to a worker thread.
pub trait OperationBuilder: Send + 'static {
    /// The operation variant this builder produces.
    type Operation: Operation;

    /// Produces a new zero-value operation.
    fn create(&self) -> Self::Operation;

    fn slot(&self) -> &OperationSlot<Self::Operation>;

    fn slot_mut(&mut self) -> &mut OperationSlot<Self::Operation>;

    /// Installs `operation` as the in-progress instance, discarding the previous one.
    fn init(&mut self, operation: Self::Operation) {
        self.slot_mut().install(operation);
    }

    /// Returns the in-progress operation. Calling this repeatedly before the next
    /// arm yields the same instance.
    fn build(&self) -> &Self::Operation {
        self.slot().current()
    }

    /// Mutable access to the armed operation for variant-specific setters.
    fn operation_mut(&mut self) -> &mut Self::Operation {
        self.slot_mut().current_mut()
    }

    /// Owned copy of the built operation, ready for handoff.
    fn finish(&self) -> Self::Operation {
        self.build().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
