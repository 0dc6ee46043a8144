use std::ops::Deref;
use std::sync::Arc;

/// Immutable copy of collection contents taken at the last synchronization
/// point (load or flush).
///
/// A snapshot is never edited; the proxy replaces it wholesale. Cloning is
/// cheap since the elements live behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    elements: Arc<[E]>,
}

impl<E> Snapshot<E> {
    /// Snapshot of a collection that was never persisted.
    pub fn empty() -> Self {
        Self {
            elements: Arc::from(Vec::new()),
        }
    }

    pub fn as_slice(&self) -> &[E] {
        &self.elements
    }
}

impl<E: Clone> Snapshot<E> {
    /// Deep-copies `elements` into a new snapshot.
    pub fn capture(elements: &[E]) -> Self {
        Self {
            elements: Arc::from(elements.to_vec()),
        }
    }
}

impl<E> Default for Snapshot<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<E> Deref for Snapshot<E> {
    type Target = [E];

    fn deref(&self) -> &Self::Target {
        &self.elements
    }
}
