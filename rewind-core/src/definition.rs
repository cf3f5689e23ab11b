/*!
Snapshot definitions: which attributes an entity type captures.

A [`SnapshotDefinition`] is built once per entity type and is immutable after
construction, so it can be shared freely between concurrent collectors.

```rust
use rewind_core::{RelationDefinition, SnapshotDefinition};

let definition = SnapshotDefinition::new()
    .capture(["title", "body"])
    .capture_relation(
        RelationDefinition::new("author")
            .capture(["name"])
            .capture_relation(RelationDefinition::new("profile").capture(["bio"])),
    );

assert_eq!(definition.related_attribute_paths().len(), 2);
```
*/

use crate::attribute::RelationPath;
use crate::entity::Entity;
use crate::{Result, SnapshotError};

/// Per-entity-type declaration of captured attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDefinition {
    own: Vec<String>,
    capture_all: bool,
    excluded: Vec<String>,
    related: Vec<(RelationPath, Vec<String>)>,
}

impl SnapshotDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the given attributes of the entity itself
    pub fn capture<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for attribute in attributes {
            push_unique(&mut self.own, attribute.into());
        }
        self
    }

    /// Capture every attribute the entity defines
    pub fn capture_all(mut self) -> Self {
        self.capture_all = true;
        self
    }

    /// Never capture the given own attributes, even under `capture_all`
    pub fn exclude<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for attribute in attributes {
            push_unique(&mut self.excluded, attribute.into());
        }
        self
    }

    /// Capture attributes of the entity reached through `relation_path`
    pub fn capture_related<P, R, I, S>(mut self, relation_path: P, attributes: I) -> Self
    where
        P: IntoIterator<Item = R>,
        R: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path: RelationPath = relation_path.into_iter().map(Into::into).collect();
        let attributes = attributes.into_iter().map(Into::into);
        self.add_related(path, attributes);
        self
    }

    /// Capture a relation tree, flattening nested relations into paths
    pub fn capture_relation(mut self, relation: RelationDefinition) -> Self {
        relation.flatten_into(&mut Vec::new(), &mut self);
        self
    }

    /// Own attribute names to collect from `entity`, in declaration order
    ///
    /// With `capture_all` the entity's own attribute order comes first, followed
    /// by any explicitly captured names it does not define.
    pub fn own_attributes(&self, entity: &dyn Entity) -> Vec<String> {
        let mut names = Vec::new();
        if self.capture_all {
            for name in entity.attribute_names() {
                push_unique(&mut names, name);
            }
        }
        for name in &self.own {
            push_unique(&mut names, name.clone());
        }
        names.retain(|name| !self.excluded.contains(name));
        names
    }

    /// Relation paths and the attribute names captured at the end of each
    pub fn related_attribute_paths(&self) -> &[(RelationPath, Vec<String>)] {
        &self.related
    }

    pub fn captures_all(&self) -> bool {
        self.capture_all
    }

    /// Reject empty relation paths and empty names
    pub fn validate(&self) -> Result<()> {
        if self.own.iter().any(String::is_empty) {
            return Err(SnapshotError::validation("attribute names cannot be empty"));
        }
        for (path, attributes) in &self.related {
            if path.is_empty() {
                return Err(SnapshotError::validation("relation path cannot be empty"));
            }
            if path.iter().any(String::is_empty) {
                return Err(SnapshotError::validation(format!(
                    "relation path {path:?} contains an empty relation name"
                )));
            }
            if attributes.iter().any(String::is_empty) {
                return Err(SnapshotError::validation(format!(
                    "relation path {path:?} captures an empty attribute name"
                )));
            }
        }
        Ok(())
    }

    fn add_related<I: Iterator<Item = String>>(&mut self, path: RelationPath, attributes: I) {
        let index = match self.related.iter().position(|(existing, _)| *existing == path) {
            Some(index) => index,
            None => {
                self.related.push((path, Vec::new()));
                self.related.len() - 1
            }
        };
        for attribute in attributes {
            push_unique(&mut self.related[index].1, attribute);
        }
    }
}

/// A relation and the attributes captured on it, with optional nested relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    name: String,
    attributes: Vec<String>,
    nested: Vec<RelationDefinition>,
}

impl RelationDefinition {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn capture<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for attribute in attributes {
            push_unique(&mut self.attributes, attribute.into());
        }
        self
    }

    pub fn capture_relation(mut self, relation: RelationDefinition) -> Self {
        self.nested.push(relation);
        self
    }

    fn flatten_into(self, prefix: &mut RelationPath, definition: &mut SnapshotDefinition) {
        prefix.push(self.name);
        if !self.attributes.is_empty() {
            definition.add_related(prefix.clone(), self.attributes.into_iter());
        }
        for nested in self.nested {
            nested.flatten_into(prefix, definition);
        }
        prefix.pop();
    }
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}
