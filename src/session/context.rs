// ============================================================================
// Unit of Work
// ============================================================================
//
// The context token every collection proxy is attached to. It carries the
// role registry and an open flag; it is cheap to clone and all clones refer
// to the same unit. Proxies never outlive the usefulness of their unit: once
// it is closed they refuse to load lazily and stop queuing writes.
//
// ============================================================================

use super::{AsyncCollectionLoader, CollectionLoader, ExtensionRegistry};
use crate::adapter::ValueCollection;
use crate::collection::{CollectionProxy, SharedCollection};
use crate::core::{EquivalenceRule, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, event};
use uuid::Uuid;

struct UnitOfWorkInner {
    id: Uuid,
    open: AtomicBool,
    registry: ExtensionRegistry,
}

/// Handle to one unit of work.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<UnitOfWorkInner>,
}

impl UnitOfWork {
    /// Opens a unit of work backed by `registry`.
    pub fn new(registry: ExtensionRegistry) -> Self {
        let id = Uuid::new_v4();
        event!(Level::DEBUG, unit_of_work = %id, roles = registry.len(), "unit of work opened");
        Self {
            inner: Arc::new(UnitOfWorkInner {
                id,
                open: AtomicBool::new(true),
                registry,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.inner.registry
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Ends the unit of work. Idempotent.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            event!(Level::DEBUG, unit_of_work = %self.inner.id, "unit of work closed");
        }
    }

    /// `true` if both handles refer to the same unit of work.
    pub fn same_as(&self, other: &UnitOfWork) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates an uninitialized proxy for `role` that loads through `loader`
    /// on first access.
    pub fn lazy_collection<E, R, L>(
        &self,
        role: &str,
        loader: L,
        rule: R,
    ) -> Result<CollectionProxy<E, R>>
    where
        E: Clone,
        R: EquivalenceRule<E>,
        L: CollectionLoader<E> + 'static,
    {
        let settings = self.registry().settings(role)?.clone();
        Ok(CollectionProxy::lazy(
            self.clone(),
            settings,
            Arc::new(loader),
            rule,
        ))
    }

    /// Wraps an already materialized collection. The proxy starts
    /// initialized with an empty snapshot, so every element is written on
    /// the first flush.
    pub fn wrap_collection<E, R>(
        &self,
        role: &str,
        elements: Vec<E>,
        rule: R,
    ) -> Result<CollectionProxy<E, R>>
    where
        E: Clone,
        R: EquivalenceRule<E>,
    {
        let settings = self.registry().settings(role)?.clone();
        Ok(CollectionProxy::provided(
            Some(self.clone()),
            settings,
            elements,
            rule,
        ))
    }

    /// Same as [`wrap_collection`](Self::wrap_collection), taking the
    /// application's own collection type.
    pub fn wrap_value_collection<E, R, C>(
        &self,
        role: &str,
        collection: C,
        rule: R,
    ) -> Result<CollectionProxy<E, R>>
    where
        E: Clone,
        R: EquivalenceRule<E>,
        C: ValueCollection<E>,
    {
        self.wrap_collection(role, collection.into_elements(), rule)
    }

    /// Creates a lazily loaded collection that can be shared between tasks
    /// of this unit of work. Loading is single-flight.
    pub fn shared_collection<E, R, L>(
        &self,
        role: &str,
        loader: L,
        rule: R,
    ) -> Result<SharedCollection<E, R>>
    where
        E: Clone + Send + 'static,
        R: EquivalenceRule<E> + Send + 'static,
        L: AsyncCollectionLoader<E> + 'static,
    {
        let settings = self.registry().settings(role)?.clone();
        let proxy = CollectionProxy::unloaded(self.clone(), settings, rule);
        Ok(SharedCollection::new(proxy, Arc::new(loader)))
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("roles", &self.inner.registry.len())
            .finish()
    }
}
