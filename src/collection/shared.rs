// ============================================================================
// Shared Collection (async, single-flight loading)
// ============================================================================
//
// Several tasks of one unit of work may touch the same relationship while it
// is still unloaded. The proxy sits behind a `tokio::sync::Mutex`; the task
// that wins the lock performs the load while holding it, every other caller
// waits and then finds the collection initialized. One load, one result.
//
// ============================================================================

use super::proxy::{CollectionProxy, FlushOutcome};
use super::state::LoadState;
use crate::core::{BagError, EquivalenceRule, Result};
use crate::session::{AsyncCollectionLoader, CollectionWriter};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{Level, event};

/// Aborts the load on drop unless it completed, so a cancelled
/// `initialize` future leaves the proxy loadable again.
struct PendingLoad<'a, E, R> {
    proxy: &'a mut CollectionProxy<E, R>,
    completed: bool,
}

impl<E, R> Drop for PendingLoad<'_, E, R> {
    fn drop(&mut self) {
        if !self.completed {
            self.proxy.abort_load();
        }
    }
}

/// Cloneable handle to a collection proxy shared between tasks.
pub struct SharedCollection<E, R> {
    inner: Arc<Mutex<CollectionProxy<E, R>>>,
    loader: Arc<dyn AsyncCollectionLoader<E>>,
}

impl<E, R> Clone for SharedCollection<E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            loader: self.loader.clone(),
        }
    }
}

impl<E, R> SharedCollection<E, R>
where
    E: Clone + Send + 'static,
    R: EquivalenceRule<E> + Send + 'static,
{
    pub(crate) fn new(
        proxy: CollectionProxy<E, R>,
        loader: Arc<dyn AsyncCollectionLoader<E>>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(proxy)),
            loader,
        }
    }

    pub async fn state(&self) -> LoadState {
        self.inner.lock().await.state()
    }

    /// Loads the collection unless it already is. Concurrent callers share
    /// a single load.
    pub async fn initialize(&self) -> Result<()> {
        let mut proxy = self.inner.lock().await;
        Self::initialize_locked(&mut *proxy, self.loader.as_ref()).await
    }

    async fn initialize_locked(
        proxy: &mut CollectionProxy<E, R>,
        loader: &dyn AsyncCollectionLoader<E>,
    ) -> Result<()> {
        match proxy.state() {
            LoadState::Initialized => return Ok(()),
            LoadState::Initializing => {
                return Err(BagError::ConcurrentInitialization(format!(
                    "collection '{}' is being loaded outside the shared handle",
                    proxy.role()
                )));
            }
            LoadState::Uninitialized => {}
        }

        let unit_of_work = proxy.require_open_unit_of_work()?;
        let role = proxy.role().to_string();
        proxy.begin_load()?;
        let mut pending = PendingLoad {
            proxy,
            completed: false,
        };

        match loader.load(&unit_of_work, &role).await {
            Ok(elements) => {
                pending.completed = true;
                pending.proxy.inject_loaded_state(elements)
            }
            Err(err) => {
                event!(Level::ERROR, role = %role, error = %err, "shared collection load failed");
                Err(err)
            }
        }
    }

    /// Exclusive access to the proxy without loading it. Writes that queue
    /// still work; reads on an unloaded proxy fail since it has no blocking
    /// loader.
    pub async fn lock(&self) -> MutexGuard<'_, CollectionProxy<E, R>> {
        self.inner.lock().await
    }

    /// Loads if needed, then runs `f` with exclusive access to the proxy.
    pub async fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut CollectionProxy<E, R>) -> Result<T>,
    {
        let mut proxy = self.inner.lock().await;
        Self::initialize_locked(&mut *proxy, self.loader.as_ref()).await?;
        f(&mut *proxy)
    }

    pub async fn len(&self) -> Result<usize> {
        self.with(|proxy| proxy.len()).await
    }

    pub async fn contains(&self, value: &E) -> Result<bool> {
        self.with(|proxy| proxy.contains(value)).await
    }

    pub async fn to_vec(&self) -> Result<Vec<E>> {
        self.with(|proxy| proxy.to_vec()).await
    }

    /// Adds `value`; queues without loading where the relationship allows.
    pub async fn add(&self, value: E) -> Result<bool> {
        let mut proxy = self.inner.lock().await;
        if !proxy.is_operation_queue_enabled() {
            Self::initialize_locked(&mut *proxy, self.loader.as_ref()).await?;
        }
        proxy.add(value)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut proxy = self.inner.lock().await;
        if !proxy.is_clear_queue_enabled() {
            Self::initialize_locked(&mut *proxy, self.loader.as_ref()).await?;
        }
        proxy.clear()
    }

    pub async fn remove(&self, value: &E) -> Result<bool> {
        self.with(|proxy| proxy.remove(value)).await
    }

    /// Loads if anything needs replaying, then flushes through `writer`.
    pub async fn flush<W>(&self, writer: &mut W) -> Result<FlushOutcome>
    where
        W: CollectionWriter<E> + ?Sized,
    {
        let mut proxy = self.inner.lock().await;
        if proxy.has_queued_operations() {
            Self::initialize_locked(&mut *proxy, self.loader.as_ref()).await?;
        }
        proxy.flush(writer)
    }
}

impl<E, R> std::fmt::Debug for SharedCollection<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCollection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NaturalEquivalence;
    use crate::session::{ExtensionRegistry, RoleSettings, UnitOfWork};
    use async_trait::async_trait;

    struct FailingLoader;

    #[async_trait]
    impl AsyncCollectionLoader<i32> for FailingLoader {
        async fn load(&self, _unit_of_work: &UnitOfWork, role: &str) -> Result<Vec<i32>> {
            Err(BagError::LoadFailed(format!("{} unavailable", role)))
        }
    }

    #[tokio::test]
    async fn test_failed_load_leaves_collection_unloaded() {
        let uow = UnitOfWork::new(ExtensionRegistry::new().with_role(RoleSettings::new("A.items")));
        let shared = uow
            .shared_collection("A.items", FailingLoader, NaturalEquivalence)
            .unwrap();

        assert!(matches!(shared.len().await, Err(BagError::LoadFailed(_))));
        assert_eq!(shared.state().await, LoadState::Uninitialized);
    }
}
