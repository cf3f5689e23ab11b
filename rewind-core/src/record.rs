/*!
Snapshot records as persisted by the surrounding store.
*/

use crate::attribute::AttributeMap;
use crate::codec::StorageCodec;
use crate::entity::{Entity, Origin};
use crate::value::AttributeValue;
use crate::{Result, SnapshotError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column holding the encoded attribute mapping
pub const STORAGE_COLUMN: &str = "storage";

/// Columns that stay first-class on the record and are never encoded into storage
pub const NATIVE_ATTRIBUTES: [&str; 6] = [
    "id",
    "origin_id",
    STORAGE_COLUMN,
    "origin_type",
    "created_at",
    "updated_at",
];

/// A persisted, timestamped capture of an entity's attributes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Unique identifier for this snapshot
    pub id: Uuid,

    /// Entity type of the origin entity
    pub origin_type: String,

    /// Identity of the origin entity within its type
    pub origin_id: String,

    /// Encoded attribute mapping
    pub storage: String,

    /// When the snapshot was taken; latest/oldest ordering uses this
    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a new snapshot record for `origin` with the current time
    ///
    /// # Example
    /// ```rust
    /// use rewind_core::{Origin, Snapshot};
    ///
    /// let snapshot = Snapshot::new(Origin::new("post", "1"), "{}");
    /// assert_eq!(snapshot.origin_type, "post");
    /// assert_eq!(snapshot.created_at, snapshot.updated_at);
    /// ```
    pub fn new<S: Into<String>>(origin: Origin, storage: S) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            origin_type: origin.origin_type,
            origin_id: origin.origin_id,
            storage: storage.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set both timestamps (useful for imports and tests)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn origin(&self) -> Origin {
        Origin::new(&self.origin_type, &self.origin_id)
    }

    /// Whether this snapshot was taken from `entity`
    pub fn belongs_to(&self, entity: &dyn Entity) -> bool {
        self.origin_type == entity.entity_type() && self.origin_id == entity.entity_id()
    }

    /// Whether `name` is a native column rather than a stored attribute
    pub fn is_native_attribute(name: &str) -> bool {
        NATIVE_ATTRIBUTES.contains(&name)
    }

    /// Decode the stored attributes, values left in stored form
    pub fn attributes<C: StorageCodec + ?Sized>(&self, codec: &C) -> Result<AttributeMap> {
        codec.decode(&self.storage)
    }

    /// Materialized value of one stored attribute, using its recorded cast
    ///
    /// # Returns
    /// The live value, or `None` if the snapshot did not capture `name`
    pub fn get<C: StorageCodec + ?Sized>(
        &self,
        name: &str,
        codec: &C,
    ) -> Result<Option<AttributeValue>> {
        let attributes = self.attributes(codec)?;
        attributes
            .get(name)
            .map(|attribute| codec.materialize(attribute, attribute.cast()))
            .transpose()
    }

    /// Validate that the record's native columns are usable
    pub fn validate(&self) -> Result<()> {
        if self.origin_type.is_empty() {
            return Err(SnapshotError::validation("origin_type cannot be empty"));
        }
        if self.origin_id.is_empty() {
            return Err(SnapshotError::validation("origin_id cannot be empty"));
        }
        if self.updated_at < self.created_at {
            return Err(SnapshotError::validation(
                "updated_at cannot precede created_at",
            ));
        }
        Ok(())
    }
}
