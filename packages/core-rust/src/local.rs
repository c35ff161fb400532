//! Thread-confined builder contexts.
//!
//! For hosts that submit operations straight from their own threads, this module
//! keeps one [`BuilderContext`] per (thread, factory) pair in thread-local storage.
//! Nothing here is shared between threads, so builders stay confined to the thread
//! that created them.
//!
//! A context keeps its factory alive. Contexts whose factory is no longer held by
//! anyone else are dropped the next time this thread creates a context; call
//! [`release`] or [`clear`] to drop them sooner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::builder::OperationBuilder;
use crate::error::BuilderError;
use crate::registry::{BuilderContext, BuilderFactory};

type SharedContext = Rc<RefCell<BuilderContext>>;

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, SharedContext>> = RefCell::new(HashMap::new());
}

/// Runs `f` with this thread's context for `factory`, creating it on first use.
///
/// Calls for other factories may nest inside `f`.
///
/// # Errors
///
/// Returns [`BuilderError::ContextBusy`] when `f` is already running for the
/// same factory further up this thread's stack.
pub fn with_context<R>(
    factory: &Arc<BuilderFactory>,
    f: impl FnOnce(&mut BuilderContext) -> R,
) -> Result<R, BuilderError> {
    let shared = context_for(factory)?;
    let mut ctx = shared
        .try_borrow_mut()
        .map_err(|_| BuilderError::ContextBusy)?;
    Ok(f(&mut ctx))
}

/// Arms this thread's builder for `B` and passes it to `f`.
///
/// # Errors
///
/// Returns the configuration error from [`BuilderContext::builder`], or
/// [`BuilderError::ContextBusy`] on reentrant use of the same factory.
pub fn with_builder<B, R>(
    factory: &Arc<BuilderFactory>,
    f: impl FnOnce(&mut B) -> R,
) -> Result<R, BuilderError>
where
    B: OperationBuilder,
{
    with_context(factory, |ctx| ctx.builder::<B>().map(f))?
}

/// Drops this thread's context for `factory`. Returns true if one existed.
///
/// # Errors
///
/// Returns [`BuilderError::ContextBusy`] if that context is in use.
pub fn release(factory: &BuilderFactory) -> Result<bool, BuilderError> {
    let removed = CONTEXTS.with(|contexts| {
        let mut contexts = contexts
            .try_borrow_mut()
            .map_err(|_| BuilderError::ContextBusy)?;
        let busy = contexts
            .get(&factory.id())
            .is_some_and(|ctx| ctx.try_borrow_mut().is_err());
        if busy {
            return Err(BuilderError::ContextBusy);
        }
        Ok(contexts.remove(&factory.id()))
    })?;
    Ok(removed.is_some())
}

/// Drops every context owned by the calling thread.
///
/// # Errors
///
/// Returns [`BuilderError::ContextBusy`], dropping nothing, if any of this
/// thread's contexts is in use.
pub fn clear() -> Result<(), BuilderError> {
    let drained = CONTEXTS.with(|contexts| {
        let mut contexts = contexts
            .try_borrow_mut()
            .map_err(|_| BuilderError::ContextBusy)?;
        if contexts.values().any(|ctx| ctx.try_borrow_mut().is_err()) {
            return Err(BuilderError::ContextBusy);
        }
        Ok(std::mem::take(&mut *contexts))
    })?;
    // Builders are dropped outside the map borrow.
    drop(drained);
    Ok(())
}

/// Number of contexts held by the calling thread.
#[must_use]
pub fn context_count() -> usize {
    CONTEXTS.with(|contexts| contexts.try_borrow().map_or(0, |contexts| contexts.len()))
}

/// Looks up or creates this thread's context for `factory`. The map borrow ends
/// before the caller touches the context.
fn context_for(factory: &Arc<BuilderFactory>) -> Result<SharedContext, BuilderError> {
    let mut released = Vec::new();
    let shared = CONTEXTS.with(|contexts| {
        let mut contexts = contexts
            .try_borrow_mut()
            .map_err(|_| BuilderError::ContextBusy)?;
        if let Some(ctx) = contexts.get(&factory.id()) {
            return Ok(ctx.clone());
        }
        prune_orphaned(&mut contexts, &mut released);
        let ctx = Rc::new(RefCell::new(BuilderContext::new(factory.clone())));
        contexts.insert(factory.id(), ctx.clone());
        Ok(ctx)
    });
    drop(released);
    shared
}

/// Moves idle contexts whose factory has no holder besides the context into `released`.
fn prune_orphaned(contexts: &mut HashMap<u64, SharedContext>, released: &mut Vec<SharedContext>) {
    let orphaned: Vec<u64> = contexts
        .iter()
        .filter(|(_, ctx)| {
            ctx.try_borrow()
                .is_ok_and(|ctx| Arc::strong_count(ctx.factory()) == 1)
        })
        .map(|(id, _)| *id)
        .collect();
    for id in orphaned {
        if let Some(ctx) = contexts.remove(&id) {
            released.push(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::builder::OperationSlot;
    use crate::operation::{Operation, Query};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Lookup {
        key: String,
    }

    impl Operation for Lookup {
        type Output = Option<String>;
        const NAME: &'static str = "lookup";
    }

    impl Query for Lookup {}

    #[derive(Default)]
    struct LookupBuilder {
        slot: OperationSlot<Lookup>,
    }

    impl OperationBuilder for LookupBuilder {
        type Operation = Lookup;

        fn create(&self) -> Lookup {
            Lookup::default()
        }

        fn slot(&self) -> &OperationSlot<Lookup> {
            &self.slot
        }

        fn slot_mut(&mut self) -> &mut OperationSlot<Lookup> {
            &mut self.slot
        }
    }

    fn counting_factory(calls: &Arc<AtomicU32>) -> Arc<BuilderFactory> {
        let counter = calls.clone();
        let mut factory = BuilderFactory::new();
        factory
            .register::<LookupBuilder, _>(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(LookupBuilder::default())
            })
            .unwrap();
        Arc::new(factory)
    }

    #[test]
    fn builder_is_cached_per_thread() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);

        let first = with_builder::<LookupBuilder, _>(&factory, |b| {
            b.operation_mut().key = "k1".to_string();
            b.finish()
        })
        .unwrap();
        let second = with_builder::<LookupBuilder, _>(&factory, |b| b.finish()).unwrap();

        assert_eq!(first.key, "k1");
        assert_eq!(second.key, "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        clear().unwrap();
    }

    #[test]
    fn threads_construct_their_own_builders() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let factory = factory.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        with_builder::<LookupBuilder, _>(&factory, |b| {
                            assert_eq!(b.build().key, "");
                            b.operation_mut().key = format!("thread-{i}");
                        })
                        .unwrap();
                    }
                    with_context(&factory, |ctx| ctx.stats()).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let stats = handle.join().unwrap();
            assert_eq!(stats.constructions, 1);
            assert_eq!(stats.arms, 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn distinct_factories_get_distinct_contexts() {
        let calls = Arc::new(AtomicU32::new(0));
        let a = counting_factory(&calls);
        let b = counting_factory(&calls);

        with_builder::<LookupBuilder, _>(&a, |_| ()).unwrap();
        with_builder::<LookupBuilder, _>(&b, |_| ()).unwrap();
        with_builder::<LookupBuilder, _>(&a, |_| ()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clear().unwrap();
    }

    #[test]
    fn contexts_for_other_factories_nest() {
        let calls = Arc::new(AtomicU32::new(0));
        let a = counting_factory(&calls);
        let b = counting_factory(&calls);

        let (outer, inner) = with_context(&a, |outer| {
            let inner = with_context(&b, |ctx| ctx.id()).unwrap();
            (outer.id(), inner)
        })
        .unwrap();
        assert_ne!(outer, inner);

        let key = with_builder::<LookupBuilder, _>(&a, |outer| {
            outer.operation_mut().key = "outer".to_string();
            with_builder::<LookupBuilder, _>(&b, |inner| inner.build().key.clone()).unwrap()
        })
        .unwrap();
        assert_eq!(key, "");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clear().unwrap();
    }

    #[test]
    fn reentrant_access_reports_context_busy() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);

        let nested = with_context(&factory, |_| {
            with_builder::<LookupBuilder, _>(&factory, |b| b.finish())
        })
        .unwrap();

        assert!(matches!(nested, Err(BuilderError::ContextBusy)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        clear().unwrap();
    }

    #[test]
    fn clear_drops_thread_contexts() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);

        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();
        clear().unwrap();
        assert_eq!(context_count(), 0);
        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clear().unwrap();
    }

    #[test]
    fn clear_inside_a_context_reports_busy_and_keeps_it() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);
        clear().unwrap();

        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();
        let nested = with_context(&factory, |_| clear()).unwrap();
        assert!(matches!(nested, Err(BuilderError::ContextBusy)));
        assert_eq!(context_count(), 1);

        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "context must survive the failed clear");
        clear().unwrap();
    }

    #[test]
    fn release_drops_one_factory_context() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(&calls);

        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();
        let busy = with_context(&factory, |_| release(&factory)).unwrap();
        assert!(matches!(busy, Err(BuilderError::ContextBusy)));

        assert!(release(&factory).unwrap());
        assert!(!release(&factory).unwrap());
        with_builder::<LookupBuilder, _>(&factory, |_| ()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clear().unwrap();
    }

    #[test]
    fn dropped_factories_are_released_on_next_insert() {
        let calls = Arc::new(AtomicU32::new(0));
        clear().unwrap();

        let first = counting_factory(&calls);
        with_builder::<LookupBuilder, _>(&first, |_| ()).unwrap();
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_some(), "context still holds the factory");

        for _ in 0..100 {
            let short_lived = counting_factory(&calls);
            with_builder::<LookupBuilder, _>(&short_lived, |_| ()).unwrap();
        }

        assert!(weak.upgrade().is_none());
        assert_eq!(context_count(), 1);
        clear().unwrap();
    }

    #[test]
    fn factories_in_use_are_never_pruned() {
        let calls = Arc::new(AtomicU32::new(0));
        let kept = counting_factory(&calls);
        with_builder::<LookupBuilder, _>(&kept, |_| ()).unwrap();

        let other = counting_factory(&calls);
        with_builder::<LookupBuilder, _>(&other, |_| ()).unwrap();
        with_builder::<LookupBuilder, _>(&kept, |_| ()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        clear().unwrap();
    }
}
