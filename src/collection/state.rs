// ============================================================================
// Collection Load State
// ============================================================================
//
// A lazily-loaded collection moves through three states. Loading is
// single-flight: while a load is in progress no other access may start one.
//
// ============================================================================

/// Lifecycle state of a collection proxy
///
/// State transitions:
/// ```text
/// Uninitialized ──access──> Initializing ──loaded──> Initialized
///       ^                        │                        │
///       └────────load failed─────┘                        │
///       └───────────────────────evict─────────────────────┘
/// ```
///
/// A proxy built around an already materialized collection starts in
/// `Initialized` and never loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadState {
    /// Backing storage is absent; the next access triggers a load
    #[default]
    Uninitialized,

    /// A load is in flight; any further access is a usage error
    Initializing,

    /// Backing storage is present and authoritative
    Initialized,
}

impl LoadState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, LoadState::Initialized)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Initializing)
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Uninitialized => write!(f, "UNINITIALIZED"),
            LoadState::Initializing => write!(f, "INITIALIZING"),
            LoadState::Initialized => write!(f, "INITIALIZED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(LoadState::default(), LoadState::Uninitialized);
        assert!(!LoadState::default().is_initialized());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoadState::Initializing.to_string(), "INITIALIZING");
        assert!(LoadState::Initializing.is_loading());
        assert!(LoadState::Initialized.is_initialized());
    }
}
