//! Registry of the diff-sync stacks living in this process.
//!
//! The fan-out step of a topic subscription asks the registry for every local
//! stack tracking an entity. The distribution layer only reads the registry;
//! whoever creates and destroys stacks owns the writes.
//!
//! # Implementations
//!
//! - [`MemoryStackRegistry`] - Lock-protected map, the default

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    channel::Channel,
    message::{EntityRef, OriginId},
};

/// A local stack as seen by the fan-out step.
#[derive(Clone)]
pub struct LocalStack {
    /// Origin identifier of the stack.
    pub origin: OriginId,
    /// Channel that feeds the stack.
    pub channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for LocalStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStack")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Lookup of local stacks by entity.
///
/// Implementations must be thread-safe: lookups happen on broker delivery
/// tasks, concurrently with stacks being added and removed.
#[auto_impl::auto_impl(Box, Arc)]
pub trait StackRegistry: Send + Sync + 'static {
    /// Every local stack currently tracking `entity`, in no particular order.
    ///
    /// Returns a snapshot; callers may invoke the channels without holding
    /// any registry lock.
    fn stacks_for_entity(&self, entity: &EntityRef) -> Vec<LocalStack>;
}

/// In-memory stack registry.
#[derive(Default)]
pub struct MemoryStackRegistry {
    inner: RwLock<HashMap<EntityRef, HashMap<OriginId, Arc<dyn Channel>>>>,
}

impl MemoryStackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stack for an entity.
    ///
    /// Returns `false` (and keeps the existing channel) if a stack with the
    /// same origin is already registered for the entity.
    pub fn register(&self, entity: EntityRef, origin: OriginId, channel: Arc<dyn Channel>) -> bool {
        let mut inner = self.inner.write();
        let stacks = inner.entry(entity).or_default();
        if stacks.contains_key(&origin) {
            return false;
        }
        stacks.insert(origin, channel);
        true
    }

    /// Remove a stack. Returns `true` if it was registered.
    pub fn deregister(&self, entity: &EntityRef, origin: &OriginId) -> bool {
        let mut inner = self.inner.write();
        let Some(stacks) = inner.get_mut(entity) else {
            return false;
        };
        let removed = stacks.remove(origin).is_some();
        if stacks.is_empty() {
            inner.remove(entity);
        }
        removed
    }

    /// Number of stacks registered for an entity.
    pub fn stack_count(&self, entity: &EntityRef) -> usize {
        self.inner.read().get(entity).map(|s| s.len()).unwrap_or(0)
    }

    /// Total number of registered stacks.
    pub fn len(&self) -> usize {
        self.inner.read().values().map(|s| s.len()).sum()
    }

    /// Check if no stack is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Entities with at least one registered stack.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.inner.read().keys().cloned().collect()
    }
}

impl StackRegistry for MemoryStackRegistry {
    fn stacks_for_entity(&self, entity: &EntityRef) -> Vec<LocalStack> {
        self.inner
            .read()
            .get(entity)
            .map(|stacks| {
                stacks
                    .iter()
                    .map(|(origin, channel)| LocalStack {
                        origin: *origin,
                        channel: channel.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
