//! Boundary between proxies and the application's own collection types.
//!
//! Conversions are stateless: the application hands its collection in when a
//! relationship is first attached and gets a fresh copy back on request.

/// An application-side ordered collection that can be converted to and from
/// the proxy's backing storage.
pub trait ValueCollection<E>: Sized {
    fn from_elements(elements: Vec<E>) -> Self;
    fn into_elements(self) -> Vec<E>;
}

impl<E> ValueCollection<E> for Vec<E> {
    fn from_elements(elements: Vec<E>) -> Self {
        elements
    }

    fn into_elements(self) -> Vec<E> {
        self
    }
}

impl<E: Clone> ValueCollection<E> for im::Vector<E> {
    fn from_elements(elements: Vec<E>) -> Self {
        elements.into_iter().collect()
    }

    fn into_elements(self) -> Vec<E> {
        self.into_iter().collect()
    }
}

impl<E> ValueCollection<E> for std::collections::VecDeque<E> {
    fn from_elements(elements: Vec<E>) -> Self {
        elements.into()
    }

    fn into_elements(self) -> Vec<E> {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionProxy;
    use crate::core::NaturalEquivalence;
    use crate::session::RoleSettings;

    #[test]
    fn test_persistent_vector_round_trip() {
        let original: im::Vector<u32> = im::vector![3, 1, 2];
        let mut proxy = CollectionProxy::detached(
            RoleSettings::new("Order.lines"),
            original.clone().into_elements(),
            NaturalEquivalence,
        );
        proxy.add(4).unwrap();

        let converted: im::Vector<u32> = proxy.to_collection().unwrap();
        assert_eq!(converted, im::vector![3, 1, 2, 4]);
        assert_eq!(original.len(), 3);
    }
}
