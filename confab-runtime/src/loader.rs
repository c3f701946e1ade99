//! World loading.
//!
//! The registry performs exactly one load per zero-to-nonzero refcount
//! transition, through a caller-supplied loader. Loader failures reject the
//! pending subscribe call and leave no registry state behind.

use ::async_trait::async_trait;
use confab_core::{ConfabResult, LifecycleError, World, WorldId};
use confab_storage::WorldStore;
use std::sync::Arc;

/// Supplies world state on first subscribe.
#[async_trait]
pub trait WorldLoader: Send + Sync {
    /// Load the world for `world_id`.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::LoadFailed` (or a storage error) when the
    /// world cannot be produced; the awaiting subscriber receives it.
    async fn load(&self, world_id: &WorldId) -> ConfabResult<World>;
}

/// Loader backed by a [`WorldStore`].
pub struct StoreLoader {
    store: Arc<dyn WorldStore>,
}

impl StoreLoader {
    /// Load worlds from the given store.
    pub fn new(store: Arc<dyn WorldStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorldLoader for StoreLoader {
    async fn load(&self, world_id: &WorldId) -> ConfabResult<World> {
        match self.store.load_world(world_id).await? {
            Some(world) => Ok(world),
            None => Err(LifecycleError::LoadFailed {
                world_id: world_id.clone(),
                reason: "world not found in storage".to_string(),
            }
            .into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
