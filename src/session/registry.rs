// ============================================================================
// Collection Role Registry
// ============================================================================
//
// Per-relationship settings, keyed by role name (e.g. "Order.lines"). The
// registry is an ordinary value owned by a unit of work; there is no global
// registration.
//
// ============================================================================

use crate::core::{BagError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a to-many relationship is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Inverse side of a one-to-many; duplicate-free, eligible for
    /// write-behind queuing.
    Inverse,

    /// Owning side of a one-to-many; duplicate-free, changes written
    /// immediately through the diff.
    #[default]
    OneToMany,

    /// Owned element collection that may hold duplicates; rewritten
    /// wholesale on change.
    ValueBag,
}

impl RelationshipKind {
    /// Membership can never repeat on this kind of relationship.
    pub fn is_duplicate_free(&self) -> bool {
        matches!(self, RelationshipKind::Inverse | RelationshipKind::OneToMany)
    }
}

/// Settings for one collection role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSettings {
    /// Role name, usually `Owner.property`
    pub role: String,

    /// Mapping of the relationship
    #[serde(default)]
    pub kind: RelationshipKind,

    /// Elements dropped from the collection are deleted as orphans
    #[serde(default)]
    pub orphan_removal: bool,

    /// Allow write-behind queuing on inverse relationships
    #[serde(default = "default_queue_operations")]
    pub queue_operations: bool,
}

fn default_queue_operations() -> bool {
    true
}

impl RoleSettings {
    /// Owning one-to-many role with queuing allowed and no orphan removal.
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            kind: RelationshipKind::default(),
            orphan_removal: false,
            queue_operations: true,
        }
    }

    /// Inverse (mapped-by) one-to-many role.
    pub fn inverse(role: &str) -> Self {
        Self::new(role).kind(RelationshipKind::Inverse)
    }

    /// Set the relationship kind
    pub fn kind(mut self, kind: RelationshipKind) -> Self {
        self.kind = kind;
        self
    }

    /// Enable or disable orphan removal
    pub fn orphan_removal(mut self, enabled: bool) -> Self {
        self.orphan_removal = enabled;
        self
    }

    /// Enable or disable write-behind queuing
    pub fn queue_operations(mut self, enabled: bool) -> Self {
        self.queue_operations = enabled;
        self
    }

    /// Adds may be queued instead of loading the collection.
    pub fn allows_operation_queue(&self) -> bool {
        self.queue_operations && self.kind == RelationshipKind::Inverse
    }

    /// `clear` may be queued. A queued clear cannot report the orphans it
    /// creates, so orphan removal rules it out.
    pub fn allows_clear_queue(&self) -> bool {
        self.allows_operation_queue() && !self.orphan_removal
    }

    /// Changes are written by deleting every row and inserting them again.
    pub fn needs_recreate(&self) -> bool {
        !self.kind.is_duplicate_free()
    }
}

/// Explicit registry of collection roles.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    roles: HashMap<String, RoleSettings>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry from a JSON array of role settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazybag::session::{ExtensionRegistry, RelationshipKind};
    ///
    /// let registry = ExtensionRegistry::from_json(r#"[
    ///     { "role": "Order.lines", "kind": "inverse", "orphan_removal": true },
    ///     { "role": "Order.tags", "kind": "value_bag" }
    /// ]"#).unwrap();
    ///
    /// let lines = registry.settings("Order.lines").unwrap();
    /// assert_eq!(lines.kind, RelationshipKind::Inverse);
    /// assert!(lines.queue_operations);
    /// assert!(!lines.allows_clear_queue());
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let roles: Vec<RoleSettings> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for settings in roles {
            registry.register(settings);
        }
        Ok(registry)
    }

    /// Adds or replaces the settings for a role.
    pub fn register(&mut self, settings: RoleSettings) -> &mut Self {
        if let Some(previous) = self.roles.insert(settings.role.clone(), settings) {
            warn!("collection role '{}' registered twice; keeping the latest settings", previous.role);
        }
        self
    }

    /// Builder-style registration
    pub fn with_role(mut self, settings: RoleSettings) -> Self {
        self.register(settings);
        self
    }

    pub fn settings(&self, role: &str) -> Result<&RoleSettings> {
        self.roles
            .get(role)
            .ok_or_else(|| BagError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        let mut roles: Vec<&RoleSettings> = self.roles.values().collect();
        roles.sort_by(|a, b| a.role.cmp(&b.role));
        Ok(serde_json::to_string_pretty(&roles)?)
    }
}
