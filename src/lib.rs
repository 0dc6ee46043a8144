// ============================================================================
// lazybag Library
// ============================================================================
//
// Lazily loaded, change-tracked collections for the to-many relationships of
// persisted entities. A collection loads at most once per unit of work,
// records changes against a snapshot, optionally defers writes on inverse
// relationships, and at flush hands a minimal delete/insert change set to an
// external writer.
//
// ============================================================================

pub mod adapter;
pub mod collection;
pub mod core;
pub mod prelude;
pub mod session;

pub use crate::collection::{
    ChangeSet, CollectionProxy, DeferredOperation, DeferredOperationQueue, FlushOutcome,
    LoadState, SharedCollection, Snapshot, SnapshotDiff, SnapshotDiffer,
};
pub use crate::core::{BagError, EquivalenceRule, NaturalEquivalence, Result};
pub use crate::session::{
    AsyncCollectionLoader, CollectionLoader, CollectionWriter, ExtensionRegistry,
    RelationshipKind, RoleSettings, UnitOfWork,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecordingWriter;

    #[test]
    fn test_lazy_inverse_collection_end_to_end() {
        let registry = ExtensionRegistry::new().with_role(RoleSettings::inverse("Order.lines"));
        let uow = UnitOfWork::new(registry);
        let mut lines = uow
            .lazy_collection(
                "Order.lines",
                |_: &UnitOfWork, _: &str| -> Result<Vec<String>> {
                    Ok(vec!["bolt".to_string(), "nut".to_string()])
                },
                NaturalEquivalence,
            )
            .unwrap();

        lines.add("washer".to_string()).unwrap();
        assert!(!lines.is_initialized());
        assert!(lines.is_dirty());

        let mut writer = RecordingWriter::new();
        let outcome = lines.flush(&mut writer).unwrap();
        assert_eq!(outcome.inserts, 1);
        assert_eq!(outcome.deletes, 0);
        assert_eq!(lines.len().unwrap(), 3);
    }
}
