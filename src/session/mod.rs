// ============================================================================
// Session Module
// ============================================================================
//
// Everything a collection proxy talks to: the unit of work it belongs to,
// the role registry that configures it, and the external loader and writer
// collaborators.
//
// ============================================================================

pub mod context;
pub mod loader;
pub mod registry;
pub mod writer;

pub use context::UnitOfWork;
pub use loader::{AsyncCollectionLoader, CollectionLoader};
pub use registry::{ExtensionRegistry, RelationshipKind, RoleSettings};
pub use writer::{CollectionWriter, RecordedWrite, RecordingWriter};
