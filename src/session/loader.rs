use super::UnitOfWork;
use crate::core::Result;
use async_trait::async_trait;

/// Fetches the rows of a lazily loaded collection.
///
/// Invoked at most once per proxy lifetime, and only while the owning unit of
/// work is open. A failed load leaves no trace on the proxy.
pub trait CollectionLoader<E>: Send + Sync {
    fn load(&self, unit_of_work: &UnitOfWork, role: &str) -> Result<Vec<E>>;
}

impl<E, F> CollectionLoader<E> for F
where
    F: Fn(&UnitOfWork, &str) -> Result<Vec<E>> + Send + Sync,
{
    fn load(&self, unit_of_work: &UnitOfWork, role: &str) -> Result<Vec<E>> {
        self(unit_of_work, role)
    }
}

/// Non-blocking counterpart of [`CollectionLoader`], used by
/// [`SharedCollection`](crate::collection::SharedCollection).
#[async_trait]
pub trait AsyncCollectionLoader<E: Send>: Send + Sync {
    async fn load(&self, unit_of_work: &UnitOfWork, role: &str) -> Result<Vec<E>>;
}
