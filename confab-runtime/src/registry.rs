//! World lifecycle registry.
//!
//! The registry is an explicit value owned by whatever composes the system;
//! there is no ambient global state. It maps world ids to mailbox actors and
//! serializes every lifecycle transition through them: exactly one load per
//! zero-to-nonzero refcount transition, exactly one teardown per return to
//! zero.

use crate::actor::{WorldActor, WorldMsg};
use crate::handle::{RegistryState, WorldSubscription};
use crate::loader::WorldLoader;
use confab_core::{ConfabResult, WorldId};
use confab_llm::ProviderRegistry;
use confab_storage::WorldStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type ActorTx = mpsc::UnboundedSender<WorldMsg>;

/// Shared dependencies handed to every world actor.
pub(crate) struct RegistryInner {
    pub loader: Arc<dyn WorldLoader>,
    pub store: Arc<dyn WorldStore>,
    pub providers: Arc<ProviderRegistry>,
    actors: Mutex<HashMap<WorldId, ActorTx>>,
}

impl RegistryInner {
    fn lock_actors(&self) -> std::sync::MutexGuard<'_, HashMap<WorldId, ActorTx>> {
        self.actors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current actor registered for an id, if any.
    pub(crate) fn actor_entry(&self, world_id: &WorldId) -> Option<ActorTx> {
        self.lock_actors().get(world_id).cloned()
    }

    /// Register an actor for an id, replacing any prior entry.
    pub(crate) fn register_actor(&self, world_id: &WorldId, tx: ActorTx) {
        self.lock_actors().insert(world_id.clone(), tx);
    }

    /// Remove an id's entry, but only while it still points at `tx`.
    pub(crate) fn deregister_actor(&self, world_id: &WorldId, tx: &ActorTx) {
        let mut actors = self.lock_actors();
        if actors
            .get(world_id)
            .is_some_and(|current| current.same_channel(tx))
        {
            actors.remove(world_id);
            debug!(world_id = %world_id, "registry entry evicted");
        }
    }
}

/// Reference-counted, lazily-loaded registry of world runtimes.
#[derive(Clone)]
pub struct WorldRegistry {
    inner: Arc<RegistryInner>,
}

impl WorldRegistry {
    /// Create a registry over a loader, a store, and the provider registry.
    pub fn new(
        loader: Arc<dyn WorldLoader>,
        store: Arc<dyn WorldStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                loader,
                store,
                providers,
                actors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a world.
    ///
    /// The first subscriber for an id triggers exactly one load; concurrent
    /// subscribers queue behind it on the world's mailbox and share the
    /// loaded runtime. Each successful call increments the refcount; the
    /// returned subscription's `unsubscribe` decrements it, and the last
    /// release tears the runtime down.
    ///
    /// # Errors
    ///
    /// A loader failure rejects this call and leaves no registry entry.
    pub async fn subscribe(&self, world_id: &WorldId) -> ConfabResult<WorldSubscription> {
        loop {
            let tx = self.actor_for(world_id);
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(WorldMsg::Subscribe { reply: reply_tx }).is_ok() {
                if let Ok(result) = reply_rx.await {
                    return result.map(WorldSubscription::new);
                }
            }
            // The actor exited between lookup and delivery; drop the stale
            // entry and retry with a fresh actor.
            self.inner.deregister_actor(world_id, &tx);
        }
    }

    /// Diagnostic state for a world id.
    ///
    /// Ids without a registry entry report `{ref_count: 0, loaded: false}`.
    pub async fn state(&self, world_id: &WorldId) -> RegistryState {
        let Some(tx) = self.inner.actor_entry(world_id) else {
            return RegistryState::absent();
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(WorldMsg::GetState { reply: reply_tx }).is_err() {
            return RegistryState::absent();
        }
        reply_rx.await.unwrap_or_else(|_| RegistryState::absent())
    }

    /// Ids currently present in the registry, sorted.
    pub fn active_worlds(&self) -> Vec<WorldId> {
        let mut ids: Vec<WorldId> = self.inner.lock_actors().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn actor_for(&self, world_id: &WorldId) -> ActorTx {
        let mut actors = self.inner.lock_actors();
        if let Some(tx) = actors.get(world_id) {
            return tx.clone();
        }
        let tx = WorldActor::spawn(world_id.clone(), self.inner.clone());
        actors.insert(world_id.clone(), tx.clone());
        tx
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ::async_trait::async_trait;
    use confab_core::{ConfabError, LifecycleError, World, WorldConfig};
    use confab_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader that counts invocations and optionally fails.
    struct CountingLoader {
        loads: AtomicUsize,
        fail: bool,
    }

    impl CountingLoader {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail,
            })
        }

        fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorldLoader for CountingLoader {
        async fn load(&self, world_id: &WorldId) -> ConfabResult<World> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LifecycleError::LoadFailed {
                    world_id: world_id.clone(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(World::new(
                world_id.as_str(),
                "Test World",
                WorldConfig::for_model("mock", "mock-model"),
            ))
        }
    }

    fn registry(loader: Arc<CountingLoader>) -> WorldRegistry {
        WorldRegistry::new(
            loader,
            Arc::new(MemoryStore::new()),
            Arc::new(ProviderRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_first_subscribe_loads_once() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let sub1 = registry.subscribe(&id).await.unwrap();
        let sub2 = registry.subscribe(&id).await.unwrap();
        assert_eq!(loader.load_count(), 1);

        let state = registry.state(&id).await;
        assert_eq!(state.ref_count, 2);
        assert!(state.loaded);
        drop((sub1, sub2));
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_share_one_load() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { registry.subscribe(&id).await }));
        }
        // Hold every subscription until all eight have resolved, so the
        // refcount never dips back to zero mid-test.
        let mut subs = Vec::new();
        for handle in handles {
            subs.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(loader.load_count(), 1);
        assert_eq!(registry.state(&id).await.ref_count, 8);
        drop(subs);
    }

    #[tokio::test]
    async fn test_loader_failure_rejects_and_leaves_no_entry() {
        let loader = CountingLoader::new(true);
        let registry = registry(loader.clone());
        let id = WorldId::new("broken");

        let result = registry.subscribe(&id).await;
        assert!(matches!(
            result,
            Err(ConfabError::Lifecycle(LifecycleError::LoadFailed { .. }))
        ));

        let state = registry.state(&id).await;
        assert_eq!(state, RegistryState::absent());
        assert!(registry.active_worlds().is_empty());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_tears_down_and_next_subscribe_reloads() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let mut sub = registry.subscribe(&id).await.unwrap();
        sub.unsubscribe();

        let state = registry.state(&id).await;
        assert_eq!(state, RegistryState::absent());

        // A fresh subscribe triggers a second load.
        let _sub2 = registry.subscribe(&id).await.unwrap();
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let keeper = registry.subscribe(&id).await.unwrap();
        let mut sub = registry.subscribe(&id).await.unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        sub.unsubscribe();

        let state = registry.state(&id).await;
        assert_eq!(state.ref_count, 1);
        assert!(state.loaded);
        drop(keeper);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let keeper = registry.subscribe(&id).await.unwrap();
        {
            let _scoped = registry.subscribe(&id).await.unwrap();
            assert_eq!(registry.state(&id).await.ref_count, 2);
        }
        assert_eq!(registry.state(&id).await.ref_count, 1);
        drop(keeper);
    }

    #[tokio::test]
    async fn test_listener_count_restored_after_unsubscribe() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());
        let id = WorldId::new("alpha");

        let keeper = registry.subscribe(&id).await.unwrap();
        assert_eq!(keeper.listener_count(), 0);

        {
            let sub = registry.subscribe(&id).await.unwrap();
            let _rx1 = sub.events();
            let _rx2 = sub.events();
            assert_eq!(keeper.listener_count(), 2);
        }
        // Receivers dropped with the scoped subscriber; count restored.
        assert_eq!(keeper.listener_count(), 0);
        drop(keeper);
    }

    #[tokio::test]
    async fn test_worlds_are_isolated() {
        let loader = CountingLoader::new(false);
        let registry = registry(loader.clone());

        let _a = registry.subscribe(&WorldId::new("alpha")).await.unwrap();
        let _b = registry.subscribe(&WorldId::new("beta")).await.unwrap();
        assert_eq!(loader.load_count(), 2);
        assert_eq!(
            registry.active_worlds(),
            vec![WorldId::new("alpha"), WorldId::new("beta")]
        );
    }
}
