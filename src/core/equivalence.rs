// ============================================================================
// Value Equivalence
// ============================================================================
//
// Collections never rely on `PartialEq` of the element type directly. The
// owner of a relationship decides what "the same element" means: the whole
// value, an identifier, or some domain rule that may even fail.
//
// ============================================================================

use super::Result;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

/// Domain-defined equality and hashing for a tracked element type.
///
/// Implementations must keep the usual contract: `equals(a, b)` implies
/// `hash(a) == hash(b)`. Both methods are fallible; an error aborts whatever
/// operation asked (a flush, a membership test, a replay).
pub trait EquivalenceRule<E: ?Sized> {
    fn equals(&self, left: &E, right: &E) -> Result<bool>;
    fn hash(&self, element: &E) -> Result<u64>;
}

impl<E: ?Sized, R: EquivalenceRule<E> + ?Sized> EquivalenceRule<E> for Arc<R> {
    fn equals(&self, left: &E, right: &E) -> Result<bool> {
        (**self).equals(left, right)
    }

    fn hash(&self, element: &E) -> Result<u64> {
        (**self).hash(element)
    }
}

impl<E: ?Sized, R: EquivalenceRule<E> + ?Sized> EquivalenceRule<E> for &R {
    fn equals(&self, left: &E, right: &E) -> Result<bool> {
        (**self).equals(left, right)
    }

    fn hash(&self, element: &E) -> Result<u64> {
        (**self).hash(element)
    }
}

fn std_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Equivalence through the element's own `PartialEq` and `Hash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalEquivalence;

impl<E: PartialEq + Hash + ?Sized> EquivalenceRule<E> for NaturalEquivalence {
    fn equals(&self, left: &E, right: &E) -> Result<bool> {
        Ok(left == right)
    }

    fn hash(&self, element: &E) -> Result<u64> {
        Ok(std_hash(element))
    }
}

/// Equivalence by an extracted key, e.g. an entity identifier.
///
/// ```
/// use lazybag::core::{EquivalenceRule, KeyEquivalence};
///
/// struct Order { id: u64, note: String }
///
/// let by_id = KeyEquivalence::new(|order: &Order| order.id);
/// let a = Order { id: 7, note: "first".into() };
/// let b = Order { id: 7, note: "edited".into() };
/// assert!(by_id.equals(&a, &b).unwrap());
/// ```
#[derive(Clone)]
pub struct KeyEquivalence<F> {
    key: F,
}

impl<F> KeyEquivalence<F> {
    pub fn new(key: F) -> Self {
        Self { key }
    }
}

impl<E, K, F> EquivalenceRule<E> for KeyEquivalence<F>
where
    F: Fn(&E) -> K,
    K: PartialEq + Hash,
{
    fn equals(&self, left: &E, right: &E) -> Result<bool> {
        Ok((self.key)(left) == (self.key)(right))
    }

    fn hash(&self, element: &E) -> Result<u64> {
        Ok(std_hash(&(self.key)(element)))
    }
}

/// Fully custom rule built from two fallible closures.
#[derive(Clone)]
pub struct FnEquivalence<Q, H> {
    equals: Q,
    hash: H,
}

impl<Q, H> FnEquivalence<Q, H> {
    pub fn new(equals: Q, hash: H) -> Self {
        Self { equals, hash }
    }
}

impl<E, Q, H> EquivalenceRule<E> for FnEquivalence<Q, H>
where
    Q: Fn(&E, &E) -> Result<bool>,
    H: Fn(&E) -> Result<u64>,
{
    fn equals(&self, left: &E, right: &E) -> Result<bool> {
        (self.equals)(left, right)
    }

    fn hash(&self, element: &E) -> Result<u64> {
        (self.hash)(element)
    }
}

/// Lifts a rule over `E` to nullable elements.
///
/// `None` forms its own equivalence class: it equals only `None` and is
/// grouped and counted like any other value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullableEquivalence<R> {
    inner: R,
}

const NULL_HASH: u64 = 0;

impl<R> NullableEquivalence<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<E, R: EquivalenceRule<E>> EquivalenceRule<Option<E>> for NullableEquivalence<R> {
    fn equals(&self, left: &Option<E>, right: &Option<E>) -> Result<bool> {
        match (left, right) {
            (None, None) => Ok(true),
            (Some(left), Some(right)) => self.inner.equals(left, right),
            _ => Ok(false),
        }
    }

    fn hash(&self, element: &Option<E>) -> Result<u64> {
        match element {
            None => Ok(NULL_HASH),
            Some(value) => self.inner.hash(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BagError;

    #[test]
    fn test_natural_equivalence() {
        let rule = NaturalEquivalence;
        assert!(rule.equals("a", "a").unwrap());
        assert!(!rule.equals("a", "b").unwrap());
        assert_eq!(rule.hash("a").unwrap(), rule.hash("a").unwrap());
    }

    #[test]
    fn test_key_equivalence_ignores_other_fields() {
        let rule = KeyEquivalence::new(|pair: &(u32, char)| pair.0);
        assert!(rule.equals(&(1, 'x'), &(1, 'y')).unwrap());
        assert!(!rule.equals(&(1, 'x'), &(2, 'x')).unwrap());
        assert_eq!(rule.hash(&(1, 'x')).unwrap(), rule.hash(&(1, 'y')).unwrap());
    }

    #[test]
    fn test_nullable_equivalence() {
        let rule = NullableEquivalence::new(NaturalEquivalence);
        assert!(rule.equals(&None::<i32>, &None).unwrap());
        assert!(!rule.equals(&None, &Some(1)).unwrap());
        assert!(rule.equals(&Some(1), &Some(1)).unwrap());
        assert_eq!(rule.hash(&None::<i32>).unwrap(), rule.hash(&None::<i32>).unwrap());
    }

    #[test]
    fn test_fn_equivalence_propagates_failure() {
        let rule = FnEquivalence::new(
            |_: &i32, _: &i32| -> Result<bool> {
                Err(BagError::Equivalence("detached entity".into()))
            },
            |value: &i32| -> Result<u64> { Ok(*value as u64) },
        );
        assert!(matches!(rule.equals(&1, &1), Err(BagError::Equivalence(_))));
        assert_eq!(rule.hash(&3).unwrap(), 3);
    }
}
