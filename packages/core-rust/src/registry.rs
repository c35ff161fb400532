use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::builder::OperationBuilder;
use crate::error::BuilderError;

/// Type-erased builder as stored in a context's cache.
type BoxedBuilder = Box<dyn Any + Send>;

/// Type-erased construction closure registered for one builder variant.
type Constructor = Box<dyn Fn() -> anyhow::Result<BoxedBuilder> + Send + Sync>;

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// BuilderFactory
// ---------------------------------------------------------------------------

struct Registration {
    name: &'static str,
    construct: Constructor,
}

/// Startup-time table of builder constructors, keyed by builder type.
///
/// A factory is filled once (usually while the host wires itself up), then
/// wrapped in an `Arc` and shared by every [`BuilderContext`]. It never holds a
/// live builder itself, so sharing it needs no locking.
pub struct BuilderFactory {
    id: u64,
    constructors: HashMap<TypeId, Registration>,
}

impl BuilderFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            constructors: HashMap::new(),
        }
    }

    /// Process-unique identifier for this factory.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers the construction path for builder `B`.
    ///
    /// `construct` runs at most once per context, the first time that context
    /// asks for `B`. An error it returns surfaces to the caller as
    /// [`BuilderError::Instantiation`].
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::DuplicateRegistration`] if `B` already has a constructor.
    pub fn register<B, F>(&mut self, construct: F) -> Result<(), BuilderError>
    where
        B: OperationBuilder,
        F: Fn() -> anyhow::Result<B> + Send + Sync + 'static,
    {
        let name = type_name::<B>();
        match self.constructors.entry(TypeId::of::<B>()) {
            Entry::Occupied(_) => Err(BuilderError::DuplicateRegistration { variant: name }),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    name,
                    construct: Box::new(move || {
                        construct().map(|builder| Box::new(builder) as BoxedBuilder)
                    }),
                });
                Ok(())
            }
        }
    }

    /// Registers `B::default` as the construction path for `B`.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::DuplicateRegistration`] if `B` already has a constructor.
    pub fn register_default<B>(&mut self) -> Result<(), BuilderError>
    where
        B: OperationBuilder + Default,
    {
        self.register::<B, _>(|| Ok(B::default()))
    }

    #[must_use]
    pub fn is_registered<B: OperationBuilder>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<B>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Registered builder type names, sorted.
    #[must_use]
    pub fn variants(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.values().map(|r| r.name).collect();
        names.sort_unstable();
        names
    }

    /// Runs the registered constructor for `B`.
    fn instantiate<B: OperationBuilder>(&self) -> Result<B, BuilderError> {
        let variant = type_name::<B>();
        let registration = self
            .constructors
            .get(&TypeId::of::<B>())
            .ok_or(BuilderError::Unregistered { variant })?;

        let boxed = (registration.construct)()
            .map_err(|source| BuilderError::Instantiation { variant, source })?;

        boxed
            .downcast::<B>()
            .map(|builder| *builder)
            .map_err(|_| BuilderError::Instantiation {
                variant,
                source: anyhow::anyhow!("constructor produced a different builder type"),
            })
    }
}

impl Default for BuilderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuilderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderFactory")
            .field("id", &self.id)
            .field("variants", &self.variants())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BuilderContext
// ---------------------------------------------------------------------------

/// Counters describing one context's cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Builders constructed through the factory.
    pub constructions: u64,
    /// Successful `builder()` calls (each one arms a fresh operation).
    pub arms: u64,
    /// `builder()` calls that failed with a configuration error.
    pub failures: u64,
    /// Builders currently cached.
    pub cached: usize,
}

/// Per-calling-context builder cache.
///
/// Holds at most one live builder per builder type. Builders are created lazily
/// through the shared [`BuilderFactory`] and then reused for the lifetime of the
/// context. All access goes through `&mut self`, so a context and the builders
/// inside it are only ever visible to the one caller that owns it.
pub struct BuilderContext {
    id: u64,
    factory: Arc<BuilderFactory>,
    builders: HashMap<TypeId, BoxedBuilder>,
    stats: ContextStats,
}

impl BuilderContext {
    #[must_use]
    pub fn new(factory: Arc<BuilderFactory>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            factory,
            builders: HashMap::new(),
            stats: ContextStats::default(),
        }
    }

    /// Process-unique identifier for this context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<BuilderFactory> {
        &self.factory
    }

    /// Returns this context's builder for `B`, armed with a fresh operation.
    ///
    /// The first request constructs the builder through the factory and caches
    /// it. Every request, first or not, replaces the builder's in-progress
    /// operation with a new zero value from [`OperationBuilder::create`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `B` is not registered or its constructor
    /// fails. Nothing is cached for a failed attempt, so each later request runs
    /// the constructor again and fails the same way.
    pub fn builder<B: OperationBuilder>(&mut self) -> Result<&mut B, BuilderError> {
        let variant = type_name::<B>();
        let entry = match self.builders.entry(TypeId::of::<B>()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.factory.instantiate::<B>() {
                Ok(builder) => {
                    self.stats.constructions += 1;
                    debug!(context = self.id, variant, "constructed builder");
                    entry.insert(Box::new(builder))
                }
                Err(err) => {
                    self.stats.failures += 1;
                    error!(context = self.id, variant, error = %err, "builder construction failed");
                    return Err(err);
                }
            },
        };

        let Some(builder) = entry.downcast_mut::<B>() else {
            self.stats.failures += 1;
            return Err(BuilderError::Instantiation {
                variant,
                source: anyhow::anyhow!("cached builder has a different type"),
            });
        };

        let operation = builder.create();
        builder.init(operation);
        self.stats.arms += 1;
        trace!(
            context = self.id,
            variant,
            generation = builder.slot().generation(),
            "armed builder"
        );
        Ok(builder)
    }

    /// Whether a builder for `B` is cached in this context.
    #[must_use]
    pub fn contains<B: OperationBuilder>(&self) -> bool {
        self.builders.contains_key(&TypeId::of::<B>())
    }

    /// Number of cached builders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            cached: self.builders.len(),
            ..self.stats
        }
    }

    /// Drops the cached builder for `B`. Returns true if one was cached.
    ///
    /// The next request for `B` constructs a new builder.
    pub fn evict<B: OperationBuilder>(&mut self) -> bool {
        self.builders.remove(&TypeId::of::<B>()).is_some()
    }

    /// Drops every cached builder.
    pub fn clear(&mut self) {
        self.builders.clear();
    }
}

impl std::fmt::Debug for BuilderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderContext")
            .field("id", &self.id)
            .field("factory", &self.factory.id())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
