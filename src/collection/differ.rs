// ============================================================================
// Snapshot Differ
// ============================================================================
//
// Computes the change set between the snapshot taken at the last sync point
// and the current contents of a collection.
//
// Elements are grouped into buckets by `EquivalenceRule::hash` so that the
// search never degrades to a pairwise scan of both sides. Inside a bucket,
// equality is settled by the rule itself and by occurrence counting: for
// every equivalence class, `max(0, in_snapshot - in_current)` snapshot
// elements are deleted and `max(0, in_current - in_snapshot)` current
// elements are inserted. Which of several equal instances gets picked does
// not matter.
//
// Before any bucket lookup, elements sitting at the same index on both sides
// are paired directly. That keeps the common "appended a few, removed a few,
// nothing reordered" case linear.
//
// ============================================================================

use crate::core::{EquivalenceRule, Result};
use std::collections::HashMap;

type Buckets = HashMap<u64, Vec<usize>>;

fn group_by_hash<E, R>(elements: &[E], rule: &R) -> Result<Buckets>
where
    R: EquivalenceRule<E> + ?Sized,
{
    let mut buckets: Buckets = HashMap::new();
    for (index, element) in elements.iter().enumerate() {
        buckets.entry(rule.hash(element)?).or_default().push(index);
    }
    Ok(buckets)
}

fn contains_in<E, R>(element: &E, indices: &[usize], elements: &[E], rule: &R) -> Result<bool>
where
    R: EquivalenceRule<E> + ?Sized,
{
    for &index in indices {
        if rule.equals(element, &elements[index])? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn class_of<E, R>(classes: &[(&E, usize, usize)], element: &E, rule: &R) -> Result<Option<usize>>
where
    R: EquivalenceRule<E> + ?Sized,
{
    for (position, (representative, _, _)) in classes.iter().enumerate() {
        if rule.equals(*representative, element)? {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

/// Compares a snapshot against current content under an equivalence rule.
pub struct SnapshotDiffer<'a, E, R: ?Sized> {
    snapshot: &'a [E],
    current: &'a [E],
    rule: &'a R,
}

impl<'a, E, R> SnapshotDiffer<'a, E, R>
where
    R: EquivalenceRule<E> + ?Sized,
{
    pub fn new(snapshot: &'a [E], current: &'a [E], rule: &'a R) -> Self {
        Self {
            snapshot,
            current,
            rule,
        }
    }

    /// Pairs snapshot and current elements and reports what is left over.
    pub fn diff(&self) -> Result<SnapshotDiff<'a, E>> {
        let snapshot = self.snapshot;
        let current = self.current;
        let mut snapshot_matched = vec![false; snapshot.len()];
        let mut current_matched = vec![false; current.len()];

        // Positional fast path.
        for (index, (old, new)) in snapshot.iter().zip(current.iter()).enumerate() {
            if self.rule.equals(old, new)? {
                snapshot_matched[index] = true;
                current_matched[index] = true;
            }
        }

        let mut deleted = Vec::new();
        if snapshot_matched.iter().any(|matched| !matched) {
            let snapshot_buckets = group_by_hash(snapshot, self.rule)?;
            let current_buckets = group_by_hash(current, self.rule)?;

            for (hash, old_indices) in &snapshot_buckets {
                let candidates = current_buckets
                    .get(hash)
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for &old_index in old_indices {
                    if snapshot_matched[old_index] {
                        continue;
                    }
                    let mut found = None;
                    for &new_index in candidates {
                        if !current_matched[new_index]
                            && self.rule.equals(&snapshot[old_index], &current[new_index])?
                        {
                            found = Some(new_index);
                            break;
                        }
                    }
                    match found {
                        Some(new_index) => {
                            snapshot_matched[old_index] = true;
                            current_matched[new_index] = true;
                        }
                        None => deleted.push(old_index),
                    }
                }
            }
            deleted.sort_unstable();
        }

        Ok(SnapshotDiff {
            snapshot,
            current,
            deleted,
            current_matched,
        })
    }

    /// Whole-collection check: same length, same buckets, and the same
    /// number of occurrences of every element.
    ///
    /// Each bucket is split into its distinct equivalence classes once, so
    /// the rule is consulted about once per element and class, never per
    /// pair of elements.
    pub fn equals_snapshot(&self) -> Result<bool> {
        if self.snapshot.len() != self.current.len() {
            return Ok(false);
        }

        let snapshot_buckets = group_by_hash(self.snapshot, self.rule)?;
        let current_buckets = group_by_hash(self.current, self.rule)?;
        if snapshot_buckets.len() != current_buckets.len() {
            return Ok(false);
        }

        for (hash, current_indices) in &current_buckets {
            let snapshot_indices = match snapshot_buckets.get(hash) {
                Some(indices) if indices.len() == current_indices.len() => indices,
                _ => return Ok(false),
            };

            // (representative, in snapshot, in current) per equivalence class
            let mut classes: Vec<(&E, usize, usize)> = Vec::new();
            for &index in snapshot_indices {
                let element = &self.snapshot[index];
                match class_of(&classes, element, self.rule)? {
                    Some(class) => classes[class].1 += 1,
                    None => classes.push((element, 1, 0)),
                }
            }
            for &index in current_indices {
                match class_of(&classes, &self.current[index], self.rule)? {
                    Some(class) => classes[class].2 += 1,
                    None => return Ok(false),
                }
            }
            if classes.iter().any(|(_, old, new)| old != new) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Snapshot elements with no equivalent left anywhere in the current
    /// content, in snapshot order.
    pub fn orphans(&self) -> Result<Vec<&'a E>> {
        let current_buckets = group_by_hash(self.current, self.rule)?;
        let mut orphans = Vec::new();
        for old in self.snapshot {
            let candidates = current_buckets
                .get(&self.rule.hash(old)?)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if !contains_in(old, candidates, self.current, self.rule)? {
                orphans.push(old);
            }
        }
        Ok(orphans)
    }
}

/// Result of pairing a snapshot with current content.
#[derive(Debug, Clone)]
pub struct SnapshotDiff<'a, E> {
    snapshot: &'a [E],
    current: &'a [E],
    deleted: Vec<usize>,
    current_matched: Vec<bool>,
}

impl<'a, E> SnapshotDiff<'a, E> {
    /// Snapshot elements to delete, in snapshot order.
    pub fn deletes(&self) -> impl Iterator<Item = &'a E> + '_ {
        self.deleted.iter().map(|&index| &self.snapshot[index])
    }

    /// Snapshot positions of the deleted elements.
    pub fn deleted_indices(&self) -> &[usize] {
        &self.deleted
    }

    pub fn delete_count(&self) -> usize {
        self.deleted.len()
    }

    /// `true` when the current element at `index` has no counterpart in the
    /// snapshot. Out-of-range indices never need inserting.
    pub fn needs_inserting(&self, index: usize) -> bool {
        self.current_matched
            .get(index)
            .is_some_and(|matched| !matched)
    }

    /// Current elements to insert with their positions, in current order.
    pub fn inserts(&self) -> impl Iterator<Item = (usize, &'a E)> + '_ {
        self.current
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.current_matched[*index])
    }

    pub fn insert_count(&self) -> usize {
        self.current_matched.iter().filter(|matched| !**matched).count()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.current_matched.iter().all(|matched| *matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BagError, FnEquivalence, NaturalEquivalence, NullableEquivalence};

    fn diff_of<'a>(snapshot: &'a [&'a str], current: &'a [&'a str]) -> SnapshotDiff<'a, &'a str> {
        SnapshotDiffer::new(snapshot, current, &NaturalEquivalence)
            .diff()
            .unwrap()
    }

    #[test]
    fn test_identical_content_has_no_changes() {
        let items = ["a", "b", "b", "c"];
        let diff = diff_of(&items, &items);
        assert!(diff.is_empty());
        assert_eq!(diff.delete_count(), 0);
        assert_eq!(diff.insert_count(), 0);
    }

    #[test]
    fn test_duplicate_counting() {
        let snapshot = ["A", "B", "B", "C"];
        let current = ["A", "B", "C", "C"];
        let diff = diff_of(&snapshot, &current);

        let deletes: Vec<_> = diff.deletes().copied().collect();
        assert_eq!(deletes, vec!["B"]);

        let inserts: Vec<_> = diff.inserts().collect();
        assert_eq!(inserts.len(), 1);
        assert_eq!(*inserts[0].1, "C");
        assert!(diff.needs_inserting(inserts[0].0));
        assert!(!diff.needs_inserting(0));
    }

    #[test]
    fn test_reordering_is_not_a_change() {
        let snapshot = ["a", "b", "c"];
        let current = ["c", "a", "b"];
        let diff = diff_of(&snapshot, &current);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_empty_snapshot_inserts_everything() {
        let current = ["x", "y"];
        let diff = diff_of(&[], &current);
        assert_eq!(diff.delete_count(), 0);
        assert!(diff.needs_inserting(0));
        assert!(diff.needs_inserting(1));
        assert!(!diff.needs_inserting(2));
    }

    #[test]
    fn test_deletes_follow_snapshot_order() {
        let snapshot = ["d", "a", "c", "b"];
        let current = ["a"];
        let diff = diff_of(&snapshot, &current);
        let deletes: Vec<_> = diff.deletes().copied().collect();
        assert_eq!(deletes, vec!["d", "c", "b"]);
        assert_eq!(diff.deleted_indices(), &[0, 2, 3]);
    }

    #[test]
    fn test_null_is_its_own_class() {
        let rule = NullableEquivalence::new(NaturalEquivalence);
        let snapshot = [None, Some(1), None];
        let current = [Some(1), None];
        let diff = SnapshotDiffer::new(&snapshot, &current, &rule).diff().unwrap();
        let deletes: Vec<_> = diff.deletes().collect();
        assert_eq!(deletes, vec![&None]);
        assert_eq!(diff.insert_count(), 0);
    }

    #[test]
    fn test_hash_collisions_resolved_by_equality() {
        let rule = FnEquivalence::new(
            |a: &i32, b: &i32| -> Result<bool> { Ok(a == b) },
            |_: &i32| -> Result<u64> { Ok(42) },
        );
        let snapshot = [1, 2, 3];
        let current = [3, 4, 1];
        let diff = SnapshotDiffer::new(&snapshot, &current, &rule).diff().unwrap();
        let deletes: Vec<_> = diff.deletes().copied().collect();
        assert_eq!(deletes, vec![2]);
        let inserts: Vec<_> = diff.inserts().map(|(_, value)| *value).collect();
        assert_eq!(inserts, vec![4]);
    }

    #[test]
    fn test_rule_failure_aborts_diff() {
        let rule = FnEquivalence::new(
            |_: &i32, _: &i32| -> Result<bool> { Err(BagError::Equivalence("boom".into())) },
            |value: &i32| -> Result<u64> { Ok(*value as u64) },
        );
        let snapshot = [1];
        let current = [1];
        let result = SnapshotDiffer::new(&snapshot, &current, &rule).diff();
        assert!(matches!(result, Err(BagError::Equivalence(_))));
    }

    #[test]
    fn test_equals_snapshot() {
        let rule = NaturalEquivalence;
        let a = ["a", "b", "b"];
        let b = ["b", "a", "b"];
        let c = ["a", "a", "b"];
        assert!(SnapshotDiffer::new(&a, &b, &rule).equals_snapshot().unwrap());
        assert!(!SnapshotDiffer::new(&a, &c, &rule).equals_snapshot().unwrap());
        assert!(!SnapshotDiffer::new(&a, &a[..2], &rule).equals_snapshot().unwrap());
    }

    #[test]
    fn test_equals_snapshot_counts_classes_not_pairs() {
        let calls = std::cell::Cell::new(0usize);
        let rule = FnEquivalence::new(
            |a: &u8, b: &u8| -> Result<bool> {
                calls.set(calls.get() + 1);
                Ok(a == b)
            },
            |_: &u8| -> Result<u64> { Ok(0) },
        );
        let snapshot: Vec<u8> = (0..2_000).map(|index| (index % 2) as u8).collect();
        let mut current = snapshot.clone();
        current.reverse();

        assert!(SnapshotDiffer::new(&snapshot, &current, &rule).equals_snapshot().unwrap());
        assert!(calls.get() <= 2 * 2 * snapshot.len());
    }

    #[test]
    fn test_orphans() {
        let rule = NaturalEquivalence;
        let snapshot = ["a", "b", "b", "c"];
        let current = ["b", "d"];
        let orphans = SnapshotDiffer::new(&snapshot, &current, &rule)
            .orphans()
            .unwrap();
        assert_eq!(orphans, vec![&"a", &"c"]);
    }
}
