use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BagError {
    #[error("Concurrent initialization: {0}")]
    ConcurrentInitialization(String),

    #[error("Index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Equivalence rule failed: {0}")]
    Equivalence(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Unit of work closed: {0}")]
    SessionClosed(String),

    #[error("Collection role '{0}' is not registered")]
    UnknownRole(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

pub type Result<T> = std::result::Result<T, BagError>;

impl BagError {
    /// Builds a bounds error for positional access.
    pub fn out_of_bounds(index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { index, len }
    }
}

impl From<serde_json::Error> for BagError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
