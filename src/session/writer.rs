use crate::collection::ChangeSet;
use crate::core::Result;

/// Turns a flushed change set into persistence operations.
///
/// Statement generation lives outside this crate; a writer only has to
/// honour the ordering contract of [`ChangeSet`]. A failing writer aborts the
/// flush, and the collection keeps its old snapshot.
pub trait CollectionWriter<E> {
    fn write(&mut self, changes: &ChangeSet<'_, E>) -> Result<()>;
}

impl<E, F> CollectionWriter<E> for F
where
    F: FnMut(&ChangeSet<'_, E>) -> Result<()>,
{
    fn write(&mut self, changes: &ChangeSet<'_, E>) -> Result<()> {
        self(changes)
    }
}

/// One flushed collection as seen by a [`RecordingWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite<E> {
    pub role: String,
    pub recreate: bool,
    pub deletes: Vec<E>,
    pub inserts: Vec<(usize, E)>,
}

/// Writer that keeps every change set it receives. Handy for tests and for
/// dry-run flushes.
#[derive(Debug, Clone)]
pub struct RecordingWriter<E> {
    writes: Vec<RecordedWrite<E>>,
}

impl<E> Default for RecordingWriter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RecordingWriter<E> {
    pub fn new() -> Self {
        Self { writes: Vec::new() }
    }

    pub fn writes(&self) -> &[RecordedWrite<E>] {
        &self.writes
    }

    pub fn last(&self) -> Option<&RecordedWrite<E>> {
        self.writes.last()
    }

    pub fn take(&mut self) -> Vec<RecordedWrite<E>> {
        std::mem::take(&mut self.writes)
    }
}

impl<E: Clone> CollectionWriter<E> for RecordingWriter<E> {
    fn write(&mut self, changes: &ChangeSet<'_, E>) -> Result<()> {
        let mut inserts = Vec::new();
        for (index, element) in changes.current().iter().enumerate() {
            if changes.needs_inserting(element, index)? {
                inserts.push((index, element.clone()));
            }
        }
        self.writes.push(RecordedWrite {
            role: changes.role().to_string(),
            recreate: changes.is_recreate(),
            deletes: changes.deletes().cloned().collect(),
            inserts,
        });
        Ok(())
    }
}
