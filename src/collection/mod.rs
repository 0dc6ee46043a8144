// ============================================================================
// Collection Module
// ============================================================================
//
// The persistent collection itself:
// - `LoadState`: lazy-load lifecycle
// - `Snapshot`: last synchronized content
// - `SnapshotDiffer`: change detection under an equivalence rule
// - `DeferredOperationQueue`: write-behind buffer for inverse relationships
// - `CollectionProxy`: the collection handed to application code
// - `SharedCollection`: async handle with single-flight loading
//
// ============================================================================

pub mod change_set;
pub mod differ;
pub mod proxy;
pub mod queue;
pub mod shared;
pub mod snapshot;
pub mod state;

pub use change_set::ChangeSet;
pub use differ::{SnapshotDiff, SnapshotDiffer};
pub use proxy::{CollectionProxy, FlushOutcome};
pub use queue::{DeferredOperation, DeferredOperationQueue, ReplaySummary};
pub use shared::SharedCollection;
pub use snapshot::Snapshot;
pub use state::LoadState;
