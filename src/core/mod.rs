pub mod equivalence;
pub mod error;

pub use equivalence::{
    EquivalenceRule, FnEquivalence, KeyEquivalence, NaturalEquivalence, NullableEquivalence,
};
pub use error::{BagError, Result};
