//! Configuration for snapshot collection and restoration
//!
//! [`SnapshotConfig`] is plain serde data so the surrounding application can
//! load it from whatever source it already uses.

use serde::{Deserialize, Serialize};

/// What the restorer does when a hop of a relation path is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationPolicy {
    /// Skip the attributes of that relation path
    #[default]
    ResolveOnly,
    /// Create the missing related entities and restore onto them
    CreateMissing,
}

/// Settings shared by the collector, codec and restorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Handling of empty relations during restore
    pub relation_policy: RelationPolicy,
    /// Whether `rewind` restores related attributes when not told otherwise
    pub restore_related: bool,
    /// Pretty-print the storage blob
    pub pretty_storage: bool,
    /// Log when an extra attribute overrides a collected attribute
    pub warn_on_extra_collision: bool,
}

impl SnapshotConfig {
    /// Configuration that creates missing related entities on restore
    pub fn create_missing_relations() -> Self {
        Self {
            relation_policy: RelationPolicy::CreateMissing,
            ..Self::default()
        }
    }

    pub fn with_relation_policy(mut self, policy: RelationPolicy) -> Self {
        self.relation_policy = policy;
        self
    }

    pub fn with_restore_related(mut self, restore_related: bool) -> Self {
        self.restore_related = restore_related;
        self
    }

    pub fn with_pretty_storage(mut self, pretty: bool) -> Self {
        self.pretty_storage = pretty;
        self
    }

    pub fn with_extra_collision_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_extra_collision = enabled;
        self
    }

    /// Validate the configuration
    ///
    /// Creating missing relations only makes sense when related attributes are restored.
    pub fn validate(&self) -> crate::Result<()> {
        if self.relation_policy == RelationPolicy::CreateMissing && !self.restore_related {
            return Err(crate::SnapshotError::validation(
                "create_missing relation policy requires restore_related",
            ));
        }
        Ok(())
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            relation_policy: RelationPolicy::ResolveOnly,
            restore_related: true,
            pretty_storage: false,
            warn_on_extra_collision: true,
        }
    }
}
