// ============================================================================
// Deferred Operation Queue
// ============================================================================
//
// Write-behind buffer for duplicate-free relationships. While a collection
// is not materialized, `add` / `clear` / orphan removal are recorded here
// instead of forcing a load, and replayed in FIFO order against the loaded
// storage at the next sync point.
//
// Replay tolerates side effects that happened in between: cascading may
// already have attached an element that is also sitting in the queue, so a
// replayed `Add` skips elements the storage already holds.
//
// ============================================================================

use crate::core::{BagError, EquivalenceRule, Result};
use tracing::{Level, event};

/// A recorded mutation intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOperation<E> {
    /// Append unless an equivalent element is already present
    Add(E),

    /// Remove the first equivalent element, if any
    Remove(E),

    /// Empty the storage; earlier operations become moot
    Clear,
}

impl<E> DeferredOperation<E> {
    /// Element this operation adds, if any.
    pub fn added_instance(&self) -> Option<&E> {
        match self {
            DeferredOperation::Add(value) => Some(value),
            _ => None,
        }
    }

    /// Element this operation orphans, if any.
    pub fn orphan(&self) -> Option<&E> {
        match self {
            DeferredOperation::Remove(value) => Some(value),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeferredOperation::Add(_) => "add",
            DeferredOperation::Remove(_) => "remove",
            DeferredOperation::Clear => "clear",
        }
    }
}

/// What a replay actually did to the storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub added: usize,
    pub removed: usize,
    pub skipped: usize,
    pub cleared: bool,
}

impl ReplaySummary {
    /// `true` if the storage was modified.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0 || self.cleared
    }
}

/// FIFO queue of deferred operations.
#[derive(Debug, Clone)]
pub struct DeferredOperationQueue<E> {
    operations: Vec<DeferredOperation<E>>,
}

impl<E> Default for DeferredOperationQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> DeferredOperationQueue<E> {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeferredOperation<E>> {
        self.operations.iter()
    }

    /// Records an operation.
    ///
    /// A `Clear` supersedes everything queued before it, so those entries are
    /// dropped on the spot; operations pushed afterwards still apply.
    pub fn push(&mut self, operation: DeferredOperation<E>) {
        if matches!(operation, DeferredOperation::Clear) {
            self.operations.clear();
        }
        self.operations.push(operation);
    }

    /// Values queued for addition, in enqueue order.
    pub fn added_instances(&self) -> impl Iterator<Item = &E> + '_ {
        self.operations.iter().filter_map(DeferredOperation::added_instance)
    }

    /// Values queued for removal, in enqueue order.
    pub fn orphans(&self) -> impl Iterator<Item = &E> + '_ {
        self.operations.iter().filter_map(DeferredOperation::orphan)
    }

    pub fn has_clear(&self) -> bool {
        self.operations
            .iter()
            .any(|operation| matches!(operation, DeferredOperation::Clear))
    }

    /// Drops all pending operations without applying them.
    pub fn discard(&mut self) {
        self.operations.clear();
    }

    /// Applies every queued operation to `storage` in FIFO order and leaves
    /// the queue empty.
    ///
    /// An equivalence-rule failure stops the replay and propagates. Whatever
    /// was already applied stays applied; the failing operation and every
    /// operation behind it stay queued.
    pub fn replay<R>(&mut self, storage: &mut Vec<E>, rule: &R) -> Result<ReplaySummary>
    where
        R: EquivalenceRule<E> + ?Sized,
    {
        let mut summary = ReplaySummary::default();
        let mut pending = std::mem::take(&mut self.operations).into_iter();
        while let Some(operation) = pending.next() {
            if let Err((operation, err)) = apply(operation, storage, rule, &mut summary) {
                self.operations.push(operation);
                self.operations.extend(pending);
                event!(
                    Level::ERROR,
                    applied = summary.added + summary.removed + summary.skipped,
                    remaining = self.operations.len(),
                    error = %err,
                    "deferred operation replay failed"
                );
                return Err(err);
            }
        }
        event!(
            Level::DEBUG,
            added = summary.added,
            removed = summary.removed,
            skipped = summary.skipped,
            cleared = summary.cleared,
            "deferred operations replayed"
        );
        Ok(summary)
    }
}

/// Applies one operation. On failure the operation is handed back untouched.
fn apply<E, R>(
    operation: DeferredOperation<E>,
    storage: &mut Vec<E>,
    rule: &R,
    summary: &mut ReplaySummary,
) -> std::result::Result<(), (DeferredOperation<E>, BagError)>
where
    R: EquivalenceRule<E> + ?Sized,
{
    match operation {
        DeferredOperation::Add(value) => match position_of(storage, &value, rule) {
            Ok(Some(_)) => summary.skipped += 1,
            Ok(None) => {
                storage.push(value);
                summary.added += 1;
            }
            Err(err) => return Err((DeferredOperation::Add(value), err)),
        },
        DeferredOperation::Remove(value) => match position_of(storage, &value, rule) {
            Ok(Some(index)) => {
                storage.remove(index);
                summary.removed += 1;
            }
            Ok(None) => summary.skipped += 1,
            Err(err) => return Err((DeferredOperation::Remove(value), err)),
        },
        DeferredOperation::Clear => {
            storage.clear();
            summary.cleared = true;
        }
    }
    Ok(())
}

pub(crate) fn position_of<E, R>(storage: &[E], value: &E, rule: &R) -> Result<Option<usize>>
where
    R: EquivalenceRule<E> + ?Sized,
{
    for (index, candidate) in storage.iter().enumerate() {
        if rule.equals(candidate, value)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}
