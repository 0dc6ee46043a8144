//! Commonly used types in one import.

pub use crate::adapter::ValueCollection;
pub use crate::collection::{
    ChangeSet, CollectionProxy, DeferredOperation, FlushOutcome, LoadState, SharedCollection,
    Snapshot, SnapshotDiffer,
};
pub use crate::core::{
    BagError, EquivalenceRule, FnEquivalence, KeyEquivalence, NaturalEquivalence,
    NullableEquivalence, Result,
};
pub use crate::session::{
    AsyncCollectionLoader, CollectionLoader, CollectionWriter, ExtensionRegistry,
    RecordingWriter, RelationshipKind, RoleSettings, UnitOfWork,
};
