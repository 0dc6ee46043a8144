use super::differ::SnapshotDiff;
use crate::core::{EquivalenceRule, Result};

/// Everything a writer needs to persist one collection at flush time.
///
/// Writers apply `deletes()` first, in snapshot order, and then insert the
/// current elements for which `needs_inserting` holds, in current order.
/// For recreated collections every snapshot row is deleted and every current
/// row inserted.
pub struct ChangeSet<'a, E> {
    role: &'a str,
    recreate: bool,
    snapshot: &'a [E],
    current: &'a [E],
    diff: SnapshotDiff<'a, E>,
    rule: &'a dyn EquivalenceRule<E>,
}

impl<'a, E> ChangeSet<'a, E> {
    pub(crate) fn new(
        role: &'a str,
        recreate: bool,
        snapshot: &'a [E],
        current: &'a [E],
        diff: SnapshotDiff<'a, E>,
        rule: &'a dyn EquivalenceRule<E>,
    ) -> Self {
        Self {
            role,
            recreate,
            snapshot,
            current,
            diff,
            rule,
        }
    }

    pub fn role(&self) -> &str {
        self.role
    }

    /// Rows are rewritten wholesale instead of diffed.
    pub fn is_recreate(&self) -> bool {
        self.recreate
    }

    /// Elements to delete, in snapshot order.
    pub fn deletes(&self) -> Box<dyn Iterator<Item = &'a E> + '_> {
        if self.recreate {
            Box::new(self.snapshot.iter())
        } else {
            Box::new(self.diff.deletes())
        }
    }

    pub fn delete_count(&self) -> usize {
        if self.recreate {
            self.snapshot.len()
        } else {
            self.diff.delete_count()
        }
    }

    /// Current content of the collection, in order.
    pub fn current(&self) -> &'a [E] {
        self.current
    }

    /// Whether `element`, found at position `index` of the current content,
    /// must be inserted.
    ///
    /// When `element` really sits at `index`, the answer comes from the
    /// precomputed pairing. Otherwise the snapshot is searched for an
    /// equivalent.
    pub fn needs_inserting(&self, element: &E, index: usize) -> Result<bool> {
        if self.recreate {
            return Ok(true);
        }
        if let Some(at_index) = self.current.get(index) {
            if self.rule.equals(element, at_index)? {
                return Ok(self.diff.needs_inserting(index));
            }
        }
        for old in self.snapshot {
            if self.rule.equals(old, element)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Elements to insert with their positions, in current order.
    pub fn inserts(&self) -> Box<dyn Iterator<Item = (usize, &'a E)> + '_> {
        if self.recreate {
            Box::new(self.current.iter().enumerate())
        } else {
            Box::new(self.diff.inserts())
        }
    }

    pub fn insert_count(&self) -> usize {
        if self.recreate {
            self.current.len()
        } else {
            self.diff.insert_count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delete_count() == 0 && self.insert_count() == 0
    }
}

impl<E> std::fmt::Debug for ChangeSet<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSet")
            .field("role", &self.role)
            .field("recreate", &self.recreate)
            .field("deletes", &self.delete_count())
            .field("inserts", &self.insert_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::SnapshotDiffer;
    use crate::core::NaturalEquivalence;

    #[test]
    fn test_needs_inserting_by_position_and_search() {
        let rule = NaturalEquivalence;
        let snapshot = [1, 2, 2];
        let current = [1, 2, 3, 3];
        let diff = SnapshotDiffer::new(&snapshot, &current, &rule).diff().unwrap();
        let changes = ChangeSet::new("A.items", false, &snapshot, &current, diff, &rule);

        assert!(!changes.needs_inserting(&1, 0).unwrap());
        assert!(changes.needs_inserting(&3, 2).unwrap());
        assert!(changes.needs_inserting(&3, 3).unwrap());
        // element not at the given position: falls back to a snapshot search
        assert!(!changes.needs_inserting(&2, 3).unwrap());
        assert!(changes.needs_inserting(&7, 9).unwrap());

        let deletes: Vec<_> = changes.deletes().copied().collect();
        assert_eq!(deletes, vec![2]);
    }

    #[test]
    fn test_recreate_rewrites_everything() {
        let rule = NaturalEquivalence;
        let snapshot = ["a", "b"];
        let current = ["a", "b", "c"];
        let diff = SnapshotDiffer::new(&snapshot, &current, &rule).diff().unwrap();
        let changes = ChangeSet::new("A.tags", true, &snapshot, &current, diff, &rule);

        assert!(changes.is_recreate());
        assert_eq!(changes.delete_count(), 2);
        assert_eq!(changes.insert_count(), 3);
        assert!(changes.needs_inserting(&"a", 0).unwrap());
    }
}
