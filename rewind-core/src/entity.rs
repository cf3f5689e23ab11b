/*!
Entity capability interface.

Entities are not inspected through reflection. Each entity type provides an
[`Entity`] implementation that exposes its attributes, cast tags and snapshot
definition by name.
*/

use crate::definition::SnapshotDefinition;
use crate::value::AttributeValue;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the entity a snapshot was taken from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub origin_type: String,
    pub origin_id: String,
}

impl Origin {
    pub fn new<S1, S2>(origin_type: S1, origin_id: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            origin_type: origin_type.into(),
            origin_id: origin_id.into(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin_type, self.origin_id)
    }
}

/// Attribute access for one entity instance
pub trait Entity {
    /// Entity type name, used for origin matching and observer dispatch
    fn entity_type(&self) -> &str;

    /// Identity value of this entity within its type
    fn entity_id(&self) -> &str;

    /// Names of every attribute this entity defines
    fn attribute_names(&self) -> Vec<String>;

    /// Current value of an attribute, `None` if the attribute is not defined
    fn get_attribute(&self, name: &str) -> Option<&AttributeValue>;

    /// Overwrite an attribute
    ///
    /// # Errors
    /// * `SnapshotError::AttributeNotFound` - If the attribute is not defined
    fn set_attribute(&mut self, name: &str, value: AttributeValue) -> Result<()>;

    /// Cast tag registered for an attribute, if any
    fn cast_tag(&self, name: &str) -> Option<&str>;

    /// Which attributes and relation paths participate in a snapshot
    fn snapshot_definition(&self) -> &SnapshotDefinition;

    fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    fn origin(&self) -> Origin {
        Origin::new(self.entity_type(), self.entity_id())
    }
}
