/*!
Attribute collection: turning a live entity into a flat [`AttributeMap`].

Collection composes three sources in order, later sources overwriting earlier
ones of the same name:

1. the entity's own attributes named by its [`SnapshotDefinition`]
2. attributes of related entities reached through each relation path
3. caller-supplied extra attributes

A relation path with an absent hop is skipped entirely: related data that does
not exist cannot be captured. Collection only reads; it never mutates the
entity or its relations.
*/

use crate::attribute::{AttributeMap, PlainAttribute, RelatedAttribute, VirtualAttribute};
use crate::cast::implied_cast;
use crate::definition::SnapshotDefinition;
use crate::entity::Entity;
use crate::store::EntityStore;
use crate::value::AttributeValue;
use crate::{Result, SnapshotError};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Collection abstraction used by the snapshot engine
pub trait AttributeCollector {
    /// Collect the attributes of `entity` described by `definition`
    ///
    /// # Arguments
    /// * `store` - Store used to resolve relation paths
    /// * `entity` - The entity to capture
    /// * `definition` - Own attributes and relation paths to capture
    /// * `extra` - Caller-supplied attributes, merged last
    ///
    /// # Errors
    /// * `SnapshotError::AttributeNotFound` - If an own or related attribute is not defined
    fn collect_attributes<S: EntityStore>(
        &self,
        store: &S,
        entity: &S::Entity,
        definition: &SnapshotDefinition,
        extra: AttributeMap,
    ) -> Result<AttributeMap>;
}

/// Collector driven by an entity's snapshot definition
#[derive(Debug, Clone)]
pub struct DefinitionCollector {
    warn_on_extra_collision: bool,
}

impl Default for DefinitionCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionCollector {
    pub fn new() -> Self {
        Self {
            warn_on_extra_collision: true,
        }
    }

    /// Log a warning when an extra attribute replaces a collected one
    pub fn warn_on_extra_collision(mut self, enabled: bool) -> Self {
        self.warn_on_extra_collision = enabled;
        self
    }

    fn collect_own<E: Entity>(
        &self,
        entity: &E,
        definition: &SnapshotDefinition,
        attributes: &mut AttributeMap,
    ) -> Result<()> {
        for name in definition.own_attributes(entity) {
            let value = read_attribute(entity, &name)?;
            attributes.insert(VirtualAttribute::Plain(PlainAttribute {
                cast: recorded_cast(entity.cast_tag(&name), &value),
                value,
                name,
            }));
        }
        Ok(())
    }

    fn collect_related<S: EntityStore>(
        &self,
        store: &S,
        entity: &S::Entity,
        definition: &SnapshotDefinition,
        attributes: &mut AttributeMap,
    ) -> Result<()> {
        for (path, names) in definition.related_attribute_paths() {
            let Some(related) = resolve_path(store, entity, path)? else {
                debug!(
                    "Skipping relation path {:?} of {}: relation is absent",
                    path,
                    entity.origin()
                );
                continue;
            };

            for name in names {
                let value = read_attribute(&related, name)?;
                attributes.insert(VirtualAttribute::Related(RelatedAttribute {
                    name: name.clone(),
                    cast: recorded_cast(related.cast_tag(name), &value),
                    value,
                    relation_path: path.clone(),
                }));
            }
        }
        Ok(())
    }
}

impl AttributeCollector for DefinitionCollector {
    fn collect_attributes<S: EntityStore>(
        &self,
        store: &S,
        entity: &S::Entity,
        definition: &SnapshotDefinition,
        extra: AttributeMap,
    ) -> Result<AttributeMap> {
        definition.validate()?;

        let mut attributes = AttributeMap::new();
        self.collect_own(entity, definition, &mut attributes)?;
        self.collect_related(store, entity, definition, &mut attributes)?;
        let collected = attributes.len();

        for attribute in extra {
            let attribute = match (attribute.cast(), implied_cast(attribute.value())) {
                (None, Some(tag)) => attribute.with_cast(tag),
                _ => attribute,
            };
            if let Some(replaced) = attributes.insert(attribute) {
                if self.warn_on_extra_collision {
                    warn!(
                        "Extra attribute '{}' overrides a collected attribute of {}",
                        replaced.name(),
                        entity.origin()
                    );
                }
            }
        }

        debug!(
            "Collected {} attributes from {} ({} extra)",
            attributes.len(),
            entity.origin(),
            attributes.len().saturating_sub(collected)
        );
        Ok(attributes)
    }
}

/// Follow `path` from `entity`, returning `None` as soon as a hop is absent
pub fn resolve_path<S: EntityStore>(
    store: &S,
    entity: &S::Entity,
    path: &[String],
) -> Result<Option<S::Entity>> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(None);
    };

    let mut current = match store.related(entity, first)? {
        Some(related) => related,
        None => return Ok(None),
    };
    for relation in rest {
        current = match store.related(&current, relation)? {
            Some(related) => related,
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// Collect several independent entities in parallel, each with its own definition
///
/// Results are returned in input order.
pub fn collect_batch<C, S>(
    collector: &C,
    store: &S,
    entities: &[S::Entity],
) -> Vec<Result<AttributeMap>>
where
    C: AttributeCollector + Sync,
    S: EntityStore + Sync,
    S::Entity: Sync,
{
    entities
        .par_iter()
        .map(|entity| {
            collector.collect_attributes(
                store,
                entity,
                entity.snapshot_definition(),
                AttributeMap::new(),
            )
        })
        .collect()
}

/// Declared cast tag, else the one the value needs to survive storage
fn recorded_cast(declared: Option<&str>, value: &AttributeValue) -> Option<String> {
    declared.or_else(|| implied_cast(value)).map(str::to_string)
}

fn read_attribute<E: Entity>(entity: &E, name: &str) -> Result<AttributeValue> {
    entity
        .get_attribute(name)
        .cloned()
        .ok_or_else(|| SnapshotError::attribute_not_found(entity.entity_type(), name))
}
