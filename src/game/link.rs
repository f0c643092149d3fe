//! Predicted projectile IDs and the fake-projectile link table
//!
//! Both live on the controlling client and are only touched from its own
//! simulation step.

use std::collections::HashMap;

use tracing::trace;

use super::projectile::{ProjectileHandle, ProjectileId};

/// Hands out per-controller projectile IDs: 1, 2, ... u32::MAX, 1, ...
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start the counter at `next` (non-zero)
    pub fn starting_at(next: u32) -> Self {
        assert!(next != 0, "projectile id 0 is reserved for plain projectiles");
        Self { next }
    }

    /// Return the current counter value and advance it
    ///
    /// # Panics
    /// If the value is still held by a fake in `registry`; the registry and
    /// the allocator are out of sync.
    pub fn next_id(&mut self, registry: &FakeProjectileRegistry) -> ProjectileId {
        let id = ProjectileId::new(self.next);
        assert!(
            !registry.contains(id),
            "projectile id {id} allocated while still registered"
        );
        self.next = if self.next == u32::MAX { 1 } else { self.next + 1 };
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fakes spawned locally and not yet linked to their authoritative copy
#[derive(Debug, Clone, Default)]
pub struct FakeProjectileRegistry {
    fakes: HashMap<ProjectileId, ProjectileHandle>,
}

impl FakeProjectileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_fake(&mut self, id: ProjectileId, handle: ProjectileHandle) {
        assert!(id.is_predicted(), "fake projectiles need a non-zero id");
        let previous = self.fakes.insert(id, handle);
        assert!(previous.is_none(), "fake projectile {id} registered twice");
    }

    /// Take the fake registered under `id`
    ///
    /// `None` means the link was already consumed or never existed.
    pub fn resolve_and_remove(&mut self, id: ProjectileId) -> Option<ProjectileHandle> {
        self.fakes.remove(&id)
    }

    /// Drop whichever entry points at `handle`, returning its id
    pub fn remove_handle(&mut self, handle: ProjectileHandle) -> Option<ProjectileId> {
        let id = self
            .fakes
            .iter()
            .find_map(|(id, h)| (*h == handle).then_some(*id))?;
        self.fakes.remove(&id);
        trace!(projectile_id = %id, "Removed fake projectile from registry");
        Some(id)
    }

    pub fn contains(&self, id: ProjectileId) -> bool {
        self.fakes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.fakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fakes.is_empty()
    }
}
