// ============================================================================
// Collection Proxy
// ============================================================================
//
// Lazily loaded, change-tracked ordered collection standing in for one
// to-many relationship of an entity.
//
// - Reads (len, contains, iteration) load the collection once, then hit the
//   backing storage directly. They do not see writes still sitting in the
//   deferred queue.
// - Writes on an inverse relationship that has not been loaded yet are queued
//   (see `DeferredOperationQueue`). Every other write, and every operation
//   that needs the full current membership or positions, materializes the
//   collection first: load if needed, then replay the queue.
// - `flush` pairs the snapshot with the current content and hands the result
//   to a `CollectionWriter`.
//
// A proxy belongs to exactly one unit of work and is driven by one writer at
// a time; `&mut self` on every access enforces that statically. The only
// runtime guard is against re-entering a load that is already in flight.
//
// ============================================================================

use super::change_set::ChangeSet;
use super::differ::SnapshotDiffer;
use super::queue::{DeferredOperation, DeferredOperationQueue, position_of};
use super::snapshot::Snapshot;
use super::state::LoadState;
use crate::adapter::ValueCollection;
use crate::core::{BagError, EquivalenceRule, Result};
use crate::session::{CollectionLoader, CollectionWriter, RoleSettings, UnitOfWork};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ops::Range;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Result of a successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// The writer was invoked
    pub written: bool,
    pub recreated: bool,
    pub deletes: usize,
    pub inserts: usize,
}

fn missing_storage(role: &str) -> BagError {
    BagError::UnsupportedOperation(format!(
        "collection '{}' reported as initialized without backing storage",
        role
    ))
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(BagError::out_of_bounds(index, len))
    }
}

fn contains_equivalent<E, R>(elements: &[E], value: &E, rule: &R) -> Result<bool>
where
    R: EquivalenceRule<E> + ?Sized,
{
    Ok(position_of(elements, value, rule)?.is_some())
}

/// Lazily loaded, mutation-tracked collection for one relationship.
pub struct CollectionProxy<E, R> {
    settings: RoleSettings,
    rule: R,
    state: LoadState,
    storage: Option<Vec<E>>,
    snapshot: Option<Snapshot<E>>,
    queue: DeferredOperationQueue<E>,
    dirty: bool,
    directly_provided: bool,
    unit_of_work: Option<UnitOfWork>,
    loader: Option<Arc<dyn CollectionLoader<E>>>,
}

impl<E, R> CollectionProxy<E, R> {
    /// Abandons an in-flight load; the proxy returns to `Uninitialized` and
    /// may be loaded again later.
    pub fn abort_load(&mut self) {
        if self.state.is_loading() {
            self.state = LoadState::Uninitialized;
        }
    }
}

impl<E, R> CollectionProxy<E, R>
where
    E: Clone,
    R: EquivalenceRule<E>,
{
    pub(crate) fn lazy(
        unit_of_work: UnitOfWork,
        settings: RoleSettings,
        loader: Arc<dyn CollectionLoader<E>>,
        rule: R,
    ) -> Self {
        let mut proxy = Self::unloaded(unit_of_work, settings, rule);
        proxy.loader = Some(loader);
        proxy
    }

    /// Uninitialized proxy without a blocking loader; initialization is
    /// driven from outside through the manual load protocol.
    pub(crate) fn unloaded(unit_of_work: UnitOfWork, settings: RoleSettings, rule: R) -> Self {
        Self {
            settings,
            rule,
            state: LoadState::Uninitialized,
            storage: None,
            snapshot: None,
            queue: DeferredOperationQueue::new(),
            dirty: false,
            directly_provided: false,
            unit_of_work: Some(unit_of_work),
            loader: None,
        }
    }

    pub(crate) fn provided(
        unit_of_work: Option<UnitOfWork>,
        settings: RoleSettings,
        elements: Vec<E>,
        rule: R,
    ) -> Self {
        Self {
            settings,
            rule,
            state: LoadState::Initialized,
            storage: Some(elements),
            snapshot: Some(Snapshot::empty()),
            queue: DeferredOperationQueue::new(),
            dirty: false,
            directly_provided: true,
            unit_of_work,
            loader: None,
        }
    }

    /// Wraps `elements` in a proxy that belongs to no unit of work.
    pub fn detached(settings: RoleSettings, elements: Vec<E>, rule: R) -> Self {
        Self::provided(None, settings, elements, rule)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn role(&self) -> &str {
        &self.settings.role
    }

    pub fn settings(&self) -> &RoleSettings {
        &self.settings
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn unit_of_work(&self) -> Option<&UnitOfWork> {
        self.unit_of_work.as_ref()
    }

    /// Attached to a unit of work that is still open.
    pub fn is_connected(&self) -> bool {
        self.unit_of_work.as_ref().is_some_and(UnitOfWork::is_open)
    }

    /// The backing storage was handed in at construction rather than loaded.
    pub fn is_directly_provided(&self) -> bool {
        self.directly_provided
    }

    /// `true` if `elements` is this proxy's own backing storage.
    ///
    /// Empty slices carry no identity, so they are never reported as
    /// wrapped.
    pub fn is_wrapper(&self, elements: &[E]) -> bool {
        if elements.is_empty() {
            return false;
        }
        self.storage.as_deref().is_some_and(|storage| {
            std::ptr::eq(storage.as_ptr(), elements.as_ptr()) && storage.len() == elements.len()
        })
    }

    /// Backing storage if the collection is loaded. Never triggers a load.
    pub fn loaded_elements(&self) -> Option<&[E]> {
        self.storage.as_deref()
    }

    pub fn needs_recreate(&self) -> bool {
        self.settings.needs_recreate()
    }

    /// Writes are queued instead of touching storage.
    ///
    /// Once something is queued, later writes keep queuing until the queue is
    /// replayed, so the enqueue order is the replay order.
    pub fn is_operation_queue_enabled(&self) -> bool {
        self.settings.allows_operation_queue()
            && self.is_connected()
            && (!self.state.is_initialized() || !self.queue.is_empty())
    }

    pub fn is_clear_queue_enabled(&self) -> bool {
        self.settings.allows_clear_queue() && self.is_operation_queue_enabled()
    }

    pub fn has_queued_operations(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queued_operations(&self) -> &DeferredOperationQueue<E> {
        &self.queue
    }

    /// Values of pending removals; they become orphans once replayed.
    pub fn queued_orphans(&self) -> Vec<&E> {
        self.queue.orphans().collect()
    }

    /// Values of pending additions.
    pub fn queued_additions(&self) -> Vec<&E> {
        self.queue.added_instances().collect()
    }

    pub fn snapshot(&self) -> Option<&Snapshot<E>> {
        self.snapshot.as_ref()
    }

    pub fn is_snapshot_empty(&self) -> bool {
        self.snapshot.as_ref().is_none_or(|snapshot| snapshot.is_empty())
    }

    pub fn snapshot_element(&self, index: usize) -> Result<&E> {
        let snapshot = self.snapshot.as_deref().unwrap_or_default();
        snapshot
            .get(index)
            .ok_or_else(|| BagError::out_of_bounds(index, snapshot.len()))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn reentrant_error(&self) -> BagError {
        BagError::ConcurrentInitialization(format!(
            "collection '{}' accessed while its load is in progress",
            self.settings.role
        ))
    }

    pub(crate) fn require_open_unit_of_work(&self) -> Result<UnitOfWork> {
        match &self.unit_of_work {
            Some(unit_of_work) if unit_of_work.is_open() => Ok(unit_of_work.clone()),
            Some(_) => Err(BagError::SessionClosed(format!(
                "cannot lazily load '{}': its unit of work is closed",
                self.settings.role
            ))),
            None => Err(BagError::SessionClosed(format!(
                "cannot lazily load '{}': no unit of work",
                self.settings.role
            ))),
        }
    }

    /// Loads the collection if it is not loaded yet. Does not replay the
    /// deferred queue.
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            LoadState::Initialized => Ok(()),
            LoadState::Initializing => Err(self.reentrant_error()),
            LoadState::Uninitialized => self.load(),
        }
    }

    fn load(&mut self) -> Result<()> {
        let unit_of_work = self.require_open_unit_of_work()?;
        let loader = self.loader.clone().ok_or_else(|| {
            BagError::LoadFailed(format!(
                "collection '{}' has no loader attached",
                self.settings.role
            ))
        })?;

        self.begin_load()?;
        match loader.load(&unit_of_work, &self.settings.role) {
            Ok(elements) => self.inject_loaded_state(elements),
            Err(err) => {
                event!(Level::ERROR, role = %self.settings.role, error = %err, "collection load failed");
                self.abort_load();
                Err(err)
            }
        }
    }

    /// Moves an uninitialized proxy to `Initializing`. For loaders that
    /// drive initialization themselves; finish with
    /// [`inject_loaded_state`](Self::inject_loaded_state) or
    /// [`abort_load`](Self::abort_load).
    pub fn begin_load(&mut self) -> Result<()> {
        match self.state {
            LoadState::Uninitialized => {
                self.state = LoadState::Initializing;
                event!(Level::DEBUG, role = %self.settings.role, "collection load started");
                Ok(())
            }
            LoadState::Initializing => Err(self.reentrant_error()),
            LoadState::Initialized => Err(BagError::UnsupportedOperation(format!(
                "collection '{}' is already initialized",
                self.settings.role
            ))),
        }
    }

    /// Completes a load started with [`begin_load`](Self::begin_load).
    pub fn inject_loaded_state(&mut self, elements: Vec<E>) -> Result<()> {
        if !self.state.is_loading() {
            return Err(BagError::UnsupportedOperation(format!(
                "collection '{}' is not loading (state {})",
                self.settings.role, self.state
            )));
        }
        self.install(elements);
        event!(
            Level::DEBUG,
            role = %self.settings.role,
            elements = self.storage.as_ref().map_or(0, Vec::len),
            "collection loaded"
        );
        Ok(())
    }

    /// Initializes the proxy with no rows, e.g. for an owner that was just
    /// created in this unit of work.
    pub fn initialize_empty(&mut self) -> Result<()> {
        match self.state {
            LoadState::Initialized => Ok(()),
            LoadState::Initializing => Err(self.reentrant_error()),
            LoadState::Uninitialized => {
                self.install(Vec::new());
                Ok(())
            }
        }
    }

    fn install(&mut self, elements: Vec<E>) {
        self.snapshot = Some(Snapshot::capture(&elements));
        self.storage = Some(elements);
        self.state = LoadState::Initialized;
    }

    /// Drops the loaded state. The next access loads again.
    ///
    /// Pending queued operations and unflushed changes are discarded.
    pub fn evict(&mut self) -> Result<()> {
        if self.state.is_loading() {
            return Err(self.reentrant_error());
        }
        if self.dirty || !self.queue.is_empty() {
            event!(
                Level::DEBUG,
                role = %self.settings.role,
                queued = self.queue.len(),
                "evicting collection with unflushed changes"
            );
        }
        self.state = LoadState::Uninitialized;
        self.storage = None;
        self.snapshot = None;
        self.queue.discard();
        self.dirty = false;
        self.directly_provided = false;
        Ok(())
    }

    /// Loads if needed, then replays the deferred queue.
    pub fn materialize(&mut self) -> Result<()> {
        self.initialize()?;
        if self.queue.is_empty() {
            return Ok(());
        }
        let storage = self
            .storage
            .as_mut()
            .ok_or_else(|| missing_storage(&self.settings.role))?;
        let summary = self.queue.replay(storage, &self.rule)?;
        if summary.changed() {
            self.dirty = true;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<&Vec<E>> {
        self.initialize()?;
        self.storage
            .as_ref()
            .ok_or_else(|| missing_storage(&self.settings.role))
    }

    fn materialized(&mut self) -> Result<&mut Vec<E>> {
        self.materialize()?;
        self.storage
            .as_mut()
            .ok_or_else(|| missing_storage(&self.settings.role))
    }

    fn enqueue(&mut self, operation: DeferredOperation<E>) {
        event!(
            Level::TRACE,
            role = %self.settings.role,
            operation = operation.kind(),
            "queued collection operation"
        );
        self.queue.push(operation);
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn contains(&mut self, value: &E) -> Result<bool> {
        self.initialize()?;
        let storage = self.storage.as_deref().unwrap_or_default();
        contains_equivalent(storage, value, &self.rule)
    }

    pub fn contains_all(&mut self, values: &[E]) -> Result<bool> {
        self.initialize()?;
        let storage = self.storage.as_deref().unwrap_or_default();
        for value in values {
            if !contains_equivalent(storage, value, &self.rule)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of elements equivalent to `value`.
    pub fn occurrences(&mut self, value: &E) -> Result<usize> {
        self.initialize()?;
        let mut count = 0;
        for element in self.storage.as_deref().unwrap_or_default() {
            if self.rule.equals(element, value)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn iter(&mut self) -> Result<std::slice::Iter<'_, E>> {
        Ok(self.read()?.iter())
    }

    pub fn as_slice(&mut self) -> Result<&[E]> {
        Ok(self.read()?.as_slice())
    }

    pub fn to_vec(&mut self) -> Result<Vec<E>> {
        Ok(self.read()?.clone())
    }

    /// Converts the current content into the application's collection type.
    pub fn to_collection<C>(&mut self) -> Result<C>
    where
        C: ValueCollection<E>,
    {
        Ok(C::from_elements(self.to_vec()?))
    }

    // ------------------------------------------------------------------
    // Positional operations (always materialize)
    // ------------------------------------------------------------------

    pub fn get(&mut self, index: usize) -> Result<&E> {
        let storage = self.materialized()?;
        let len = storage.len();
        storage
            .get(index)
            .ok_or_else(|| BagError::out_of_bounds(index, len))
    }

    pub fn index_of(&mut self, value: &E) -> Result<Option<usize>> {
        self.materialize()?;
        position_of(self.storage.as_deref().unwrap_or_default(), value, &self.rule)
    }

    pub fn last_index_of(&mut self, value: &E) -> Result<Option<usize>> {
        self.materialize()?;
        let storage = self.storage.as_deref().unwrap_or_default();
        for (index, element) in storage.iter().enumerate().rev() {
            if self.rule.equals(element, value)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// View of `range`.
    pub fn sub_range(&mut self, range: Range<usize>) -> Result<&[E]> {
        let storage = self.materialized()?;
        let len = storage.len();
        if range.start > range.end {
            return Err(BagError::out_of_bounds(range.start, range.end));
        }
        if range.end > len {
            return Err(BagError::out_of_bounds(range.end, len));
        }
        Ok(&storage[range])
    }

    pub fn set(&mut self, index: usize, value: E) -> Result<E> {
        let storage = self.materialized()?;
        check_index(index, storage.len())?;
        let previous = std::mem::replace(&mut storage[index], value);
        self.dirty = true;
        Ok(previous)
    }

    pub fn insert(&mut self, index: usize, value: E) -> Result<()> {
        let storage = self.materialized()?;
        check_index(index, storage.len() + 1)?;
        storage.insert(index, value);
        self.dirty = true;
        Ok(())
    }

    pub fn insert_all<I>(&mut self, index: usize, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = E>,
    {
        let values: Vec<E> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(false);
        }
        let storage = self.materialized()?;
        check_index(index, storage.len() + 1)?;
        storage.splice(index..index, values);
        self.dirty = true;
        Ok(true)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<E> {
        let storage = self.materialized()?;
        check_index(index, storage.len())?;
        let removed = storage.remove(index);
        self.dirty = true;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Appends `value`, or queues it on an unloaded inverse relationship.
    pub fn add(&mut self, value: E) -> Result<bool> {
        if self.is_operation_queue_enabled() {
            self.enqueue(DeferredOperation::Add(value));
        } else {
            self.materialized()?.push(value);
            self.dirty = true;
        }
        Ok(true)
    }

    pub fn add_all<I>(&mut self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = E>,
    {
        let values: Vec<E> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(false);
        }
        if self.is_operation_queue_enabled() {
            for value in values {
                self.enqueue(DeferredOperation::Add(value));
            }
        } else {
            self.materialized()?.extend(values);
            self.dirty = true;
        }
        Ok(true)
    }

    /// Removes the first element equivalent to `value`.
    pub fn remove(&mut self, value: &E) -> Result<bool> {
        self.materialize()?;
        let storage = self
            .storage
            .as_mut()
            .ok_or_else(|| missing_storage(&self.settings.role))?;
        match position_of(storage, value, &self.rule)? {
            Some(index) => {
                storage.remove(index);
                self.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Records the removal of `value` without loading, when the relationship
    /// allows queuing; otherwise removes it right away. This is the path
    /// cascaded orphan removal takes.
    pub fn schedule_remove(&mut self, value: E) -> Result<()> {
        if self.is_operation_queue_enabled() {
            self.enqueue(DeferredOperation::Remove(value));
            Ok(())
        } else {
            self.remove(&value).map(|_| ())
        }
    }

    /// Removes every element equivalent to any of `values`.
    pub fn remove_all(&mut self, values: &[E]) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        self.retain_where(|element, rule| Ok(!contains_equivalent(values, element, rule)?))
    }

    /// Keeps only elements equivalent to one of `values`.
    pub fn retain_all(&mut self, values: &[E]) -> Result<bool> {
        self.retain_where(|element, rule| contains_equivalent(values, element, rule))
    }

    fn retain_where<F>(&mut self, mut keep: F) -> Result<bool>
    where
        F: FnMut(&E, &R) -> Result<bool>,
    {
        self.materialize()?;
        let storage = self
            .storage
            .take()
            .ok_or_else(|| missing_storage(&self.settings.role))?;
        let before = storage.len();
        let mut kept = Vec::with_capacity(before);
        let mut failure = None;
        let mut remaining = storage.into_iter();
        for element in remaining.by_ref() {
            match keep(&element, &self.rule) {
                Ok(true) => kept.push(element),
                Ok(false) => {}
                Err(err) => {
                    kept.push(element);
                    failure = Some(err);
                    break;
                }
            }
        }
        kept.extend(remaining);
        let changed = kept.len() != before;
        self.storage = Some(kept);
        if changed {
            self.dirty = true;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    /// Empties the collection, or queues an atomic clear on an unloaded
    /// inverse relationship without orphan removal.
    pub fn clear(&mut self) -> Result<()> {
        if self.is_clear_queue_enabled() {
            self.enqueue(DeferredOperation::Clear);
            return Ok(());
        }
        let storage = self.materialized()?;
        if !storage.is_empty() {
            storage.clear();
            self.dirty = true;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change detection and flush
    // ------------------------------------------------------------------

    /// Current content holds exactly the snapshot's elements, in any order.
    ///
    /// Replays pending queued operations first, so the answer matches what
    /// the next flush would see.
    pub fn equals_snapshot(&mut self) -> Result<bool> {
        self.materialize()?;
        let snapshot = self.snapshot.as_deref().unwrap_or_default();
        let storage = self.storage.as_deref().unwrap_or_default();
        SnapshotDiffer::new(snapshot, storage, &self.rule).equals_snapshot()
    }

    /// Snapshot elements no longer present in the collection.
    pub fn orphans(&mut self) -> Result<Vec<E>> {
        self.materialize()?;
        let snapshot = self.snapshot.as_deref().unwrap_or_default();
        let storage = self.storage.as_deref().unwrap_or_default();
        let orphans = SnapshotDiffer::new(snapshot, storage, &self.rule).orphans()?;
        Ok(orphans.into_iter().cloned().collect())
    }

    /// Synchronizes the collection with the store.
    ///
    /// Loads if needed, replays the deferred queue, diffs current content
    /// against the snapshot and passes the change set to `writer`. On
    /// success the current content becomes the new snapshot and the dirty
    /// flag is reset. On failure nothing is rolled back; the unit of work is
    /// expected to abort.
    pub fn flush<W>(&mut self, writer: &mut W) -> Result<FlushOutcome>
    where
        W: CollectionWriter<E> + ?Sized,
    {
        let span = info_span!("collection_flush", role = %self.settings.role);
        let _guard = span.enter();

        if !self.state.is_initialized() && self.queue.is_empty() {
            return Ok(FlushOutcome::default());
        }
        self.materialize()?;

        let outcome = {
            let snapshot = self.snapshot.as_deref().unwrap_or_default();
            let storage = self.storage.as_deref().unwrap_or_default();
            let differ = SnapshotDiffer::new(snapshot, storage, &self.rule);

            if differ.equals_snapshot()? {
                FlushOutcome::default()
            } else {
                let diff = differ.diff()?;
                let recreate = self.settings.needs_recreate();
                let changes =
                    ChangeSet::new(&self.settings.role, recreate, snapshot, storage, diff, &self.rule);
                let outcome = FlushOutcome {
                    written: true,
                    recreated: recreate,
                    deletes: changes.delete_count(),
                    inserts: changes.insert_count(),
                };
                if let Err(err) = writer.write(&changes) {
                    event!(Level::ERROR, error = %err, "collection writer failed");
                    return Err(err);
                }
                outcome
            }
        };

        if outcome.written || self.dirty {
            let storage = self.storage.as_deref().unwrap_or_default();
            self.snapshot = Some(Snapshot::capture(storage));
        }
        self.dirty = false;
        event!(
            Level::DEBUG,
            written = outcome.written,
            deletes = outcome.deletes,
            inserts = outcome.inserts,
            "collection flushed"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Cache form
    // ------------------------------------------------------------------

    /// Serializes the current content for a second-level cache.
    pub fn disassemble(&mut self) -> Result<serde_json::Value>
    where
        E: Serialize,
    {
        let storage = self.read()?;
        Ok(serde_json::to_value(storage)?)
    }

    /// Rebuilds an initialized proxy from [`disassemble`](Self::disassemble)
    /// output. Null entries are skipped.
    pub fn from_cache(
        unit_of_work: Option<UnitOfWork>,
        settings: RoleSettings,
        cached: serde_json::Value,
        rule: R,
    ) -> Result<Self>
    where
        E: DeserializeOwned,
    {
        let entries: Vec<serde_json::Value> = serde_json::from_value(cached)?;
        let mut elements = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_null() {
                continue;
            }
            elements.push(serde_json::from_value(entry)?);
        }

        let mut proxy = Self::provided(unit_of_work, settings, Vec::new(), rule);
        proxy.directly_provided = false;
        proxy.install(elements);
        Ok(proxy)
    }
}

impl<E, R> std::fmt::Debug for CollectionProxy<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionProxy")
            .field("role", &self.settings.role)
            .field("state", &self.state)
            .field("dirty", &self.dirty)
            .field("queued", &self.queue.len())
            .field("len", &self.storage.as_ref().map(Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NaturalEquivalence;
    use crate::session::{ExtensionRegistry, RecordingWriter, RelationshipKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> ExtensionRegistry {
        ExtensionRegistry::new()
            .with_role(RoleSettings::new("Order.lines"))
            .with_role(RoleSettings::inverse("Order.items"))
            .with_role(RoleSettings::new("Order.tags").kind(RelationshipKind::ValueBag))
    }

    fn counting_loader(
        rows: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    ) -> impl CollectionLoader<&'static str> {
        move |_: &UnitOfWork, _: &str| -> Result<Vec<&'static str>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(rows.clone())
        }
    }

    #[test]
    fn test_loads_once() {
        let uow = UnitOfWork::new(registry());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut proxy = uow
            .lazy_collection(
                "Order.lines",
                counting_loader(vec!["a", "b"], calls.clone()),
                NaturalEquivalence,
            )
            .unwrap();

        assert_eq!(proxy.state(), LoadState::Uninitialized);
        assert_eq!(proxy.len().unwrap(), 2);
        assert!(proxy.contains(&"a").unwrap());
        assert_eq!(proxy.iter().unwrap().count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(proxy.is_initialized());
        assert!(!proxy.is_dirty());
    }

    #[test]
    fn test_provided_collection_skips_load() {
        let uow = UnitOfWork::new(registry());
        let proxy = uow
            .wrap_collection("Order.lines", vec!["a"], NaturalEquivalence)
            .unwrap();
        assert!(proxy.is_initialized());
        assert!(proxy.is_directly_provided());
        assert!(proxy.is_snapshot_empty());

        let storage = proxy.loaded_elements().unwrap();
        assert!(proxy.is_wrapper(storage));
        assert!(!proxy.is_wrapper(&["a"]));
    }

    #[test]
    fn test_empty_slice_is_never_a_wrapper() {
        let proxy: CollectionProxy<i32, _> = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            Vec::new(),
            NaturalEquivalence,
        );
        let unrelated: Vec<i32> = Vec::new();
        assert!(!proxy.is_wrapper(&unrelated));
        assert!(!proxy.is_wrapper(proxy.loaded_elements().unwrap()));
    }

    #[test]
    fn test_reentrant_access_is_rejected() {
        let uow = UnitOfWork::new(registry());
        let mut proxy = uow
            .lazy_collection(
                "Order.lines",
                counting_loader(vec![], Arc::new(AtomicUsize::new(0))),
                NaturalEquivalence,
            )
            .unwrap();

        proxy.begin_load().unwrap();
        assert!(matches!(
            proxy.len(),
            Err(BagError::ConcurrentInitialization(_))
        ));
        assert!(matches!(
            proxy.begin_load(),
            Err(BagError::ConcurrentInitialization(_))
        ));
        proxy.inject_loaded_state(vec!["x"]).unwrap();
        assert_eq!(proxy.len().unwrap(), 1);
    }

    #[test]
    fn test_positional_bounds() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec![1, 2, 3],
            NaturalEquivalence,
        );
        assert_eq!(*proxy.get(1).unwrap(), 2);
        assert_eq!(
            proxy.get(3).unwrap_err(),
            BagError::IndexOutOfBounds { index: 3, len: 3 }
        );
        assert!(proxy.set(5, 0).is_err());
        assert!(proxy.insert(4, 0).is_err());
        proxy.insert(3, 4).unwrap();
        assert_eq!(proxy.sub_range(1..3).unwrap(), &[2, 3]);
        assert!(proxy.sub_range(2..9).is_err());
        assert_eq!(proxy.remove_at(0).unwrap(), 1);
        assert!(proxy.is_dirty());
    }

    #[test]
    fn test_remove_all_and_retain_all() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec![1, 2, 2, 3, 4],
            NaturalEquivalence,
        );
        assert!(proxy.remove_all(&[2, 9]).unwrap());
        assert_eq!(proxy.to_vec().unwrap(), vec![1, 3, 4]);
        assert!(!proxy.remove_all(&[]).unwrap());
        assert!(proxy.retain_all(&[3, 4]).unwrap());
        assert_eq!(proxy.to_vec().unwrap(), vec![3, 4]);
        assert!(!proxy.retain_all(&[3, 4]).unwrap());
    }

    #[test]
    fn test_index_queries() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec!["a", "b", "a"],
            NaturalEquivalence,
        );
        assert_eq!(proxy.index_of(&"a").unwrap(), Some(0));
        assert_eq!(proxy.last_index_of(&"a").unwrap(), Some(2));
        assert_eq!(proxy.index_of(&"z").unwrap(), None);
        assert_eq!(proxy.occurrences(&"a").unwrap(), 2);
        assert!(proxy.contains_all(&["a", "b"]).unwrap());
        assert!(!proxy.contains_all(&["a", "z"]).unwrap());
    }

    #[test]
    fn test_flush_writes_then_resnapshots() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec!["a", "b"],
            NaturalEquivalence,
        );
        let mut writer = RecordingWriter::new();

        let outcome = proxy.flush(&mut writer).unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.inserts, 2);
        assert_eq!(writer.last().unwrap().inserts, vec![(0, "a"), (1, "b")]);

        let outcome = proxy.flush(&mut writer).unwrap();
        assert!(!outcome.written);
        assert_eq!(writer.writes().len(), 1);

        proxy.remove(&"a").unwrap();
        proxy.add("c").unwrap();
        let outcome = proxy.flush(&mut writer).unwrap();
        assert_eq!((outcome.deletes, outcome.inserts), (1, 1));
        let last = writer.last().unwrap();
        assert_eq!(last.deletes, vec!["a"]);
        assert_eq!(last.inserts, vec![(1, "c")]);
        assert!(!proxy.is_dirty());
        assert_eq!(proxy.snapshot().unwrap().as_slice(), &["b", "c"]);
    }

    #[test]
    fn test_value_bag_is_recreated() {
        let uow = UnitOfWork::new(registry());
        let mut proxy = uow
            .lazy_collection(
                "Order.tags",
                counting_loader(vec!["x", "y"], Arc::new(AtomicUsize::new(0))),
                NaturalEquivalence,
            )
            .unwrap();
        proxy.add("z").unwrap();

        let mut writer = RecordingWriter::new();
        let outcome = proxy.flush(&mut writer).unwrap();
        assert!(outcome.recreated);
        let last = writer.last().unwrap();
        assert_eq!(last.deletes, vec!["x", "y"]);
        assert_eq!(last.inserts.len(), 3);
    }

    #[test]
    fn test_failed_writer_keeps_snapshot() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec![1],
            NaturalEquivalence,
        );
        let mut failing = |_: &ChangeSet<'_, i32>| -> Result<()> {
            Err(BagError::WriteFailed("constraint violated".into()))
        };
        assert!(matches!(
            proxy.flush(&mut failing),
            Err(BagError::WriteFailed(_))
        ));
        assert!(proxy.is_snapshot_empty());
    }

    #[test]
    fn test_evict_returns_to_uninitialized() {
        let uow = UnitOfWork::new(registry());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut proxy = uow
            .lazy_collection(
                "Order.lines",
                counting_loader(vec!["a"], calls.clone()),
                NaturalEquivalence,
            )
            .unwrap();
        proxy.len().unwrap();
        proxy.evict().unwrap();
        assert_eq!(proxy.state(), LoadState::Uninitialized);
        assert!(proxy.snapshot().is_none());
        proxy.len().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_unit_of_work_refuses_load() {
        let uow = UnitOfWork::new(registry());
        let mut proxy = uow
            .lazy_collection(
                "Order.lines",
                counting_loader(vec!["a"], Arc::new(AtomicUsize::new(0))),
                NaturalEquivalence,
            )
            .unwrap();
        uow.close();
        assert!(matches!(proxy.len(), Err(BagError::SessionClosed(_))));
        assert_eq!(proxy.state(), LoadState::Uninitialized);
    }

    #[test]
    fn test_cache_round_trip_skips_nulls() {
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            vec![Some(1), None, Some(3)],
            crate::core::NullableEquivalence::new(NaturalEquivalence),
        );
        let cached = proxy.disassemble().unwrap();
        assert_eq!(cached, serde_json::json!([1, null, 3]));

        let mut restored: CollectionProxy<Option<i32>, _> = CollectionProxy::from_cache(
            None,
            RoleSettings::new("Order.lines"),
            cached,
            crate::core::NullableEquivalence::new(NaturalEquivalence),
        )
        .unwrap();
        assert_eq!(restored.to_vec().unwrap(), vec![Some(1), Some(3)]);
        assert!(!restored.is_directly_provided());
        assert!(restored.equals_snapshot().unwrap());
    }
}
