/*!
Attribute restoration: applying a stored snapshot back onto live entities.

A rewind runs as one store transaction. The snapshot's plain attributes are
applied to a working copy of the root entity; related attributes are grouped
by relation path, each path is walked from the root and the group is applied
to the entity at its end. Every touched entity is saved before the
transaction commits, so a failure anywhere leaves the store as it was.

Values are materialized with the target entity's current cast for the
attribute when it has one, otherwise with the cast recorded in the snapshot.
*/

use crate::attribute::{AttributeMap, VirtualAttribute};
use crate::codec::StorageCodec;
use crate::config::RelationPolicy;
use crate::entity::Entity;
use crate::events::{Flow, ObserverRegistry};
use crate::record::Snapshot;
use crate::store::EntityStore;
use crate::{Result, SnapshotError};
use tracing::{debug, info};

/// Counts of what a restore applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Attributes written to the root entity
    pub plain: usize,
    /// Attributes written to entities reached through relation paths
    pub related: usize,
    /// Attributes the target did not define
    pub skipped_attributes: usize,
    /// Relation paths that could not be resolved
    pub skipped_paths: usize,
}

/// Restoration abstraction used by the snapshot engine
pub trait AttributeRestorer {
    /// Apply decoded `attributes` to `entity` and the entities along their relation paths
    ///
    /// Must persist every entity it changes, `entity` included. Runs inside the
    /// caller's transaction.
    ///
    /// # Errors
    /// * `SnapshotError::Cast` / `SnapshotError::UnknownCast` - If a value cannot be materialized
    /// * `SnapshotError::Persistence` - If saving an entity fails
    fn restore<S, K>(
        &self,
        store: &mut S,
        entity: &mut S::Entity,
        attributes: &AttributeMap,
        codec: &K,
        restore_related: bool,
    ) -> Result<RestoreReport>
    where
        S: EntityStore,
        K: StorageCodec + ?Sized;

    /// Rewind `entity` to `snapshot` inside one transaction
    ///
    /// `entity` itself is never modified; the restored entity is returned.
    ///
    /// # Arguments
    /// * `store` - Store used to resolve relations and persist changes
    /// * `entity` - The origin entity of `snapshot`
    /// * `snapshot` - The snapshot to rewind to
    /// * `codec` - Codec the snapshot storage was written with
    /// * `observers` - Observers notified before and after the rewind
    /// * `restore_related` - Whether related attributes are restored
    ///
    /// # Returns
    /// The restored entity, or `None` if an observer cancelled the rewind
    ///
    /// # Errors
    /// * `SnapshotError::InvalidSnapshot` - If `snapshot` was not taken from `entity`
    /// * `SnapshotError::MalformedStorage` - If the snapshot storage cannot be decoded
    fn rewind_to<S, K>(
        &self,
        store: &mut S,
        entity: &S::Entity,
        snapshot: &Snapshot,
        codec: &K,
        observers: &ObserverRegistry<S::Entity>,
        restore_related: bool,
    ) -> Result<Option<S::Entity>>
    where
        S: EntityStore,
        K: StorageCodec + ?Sized,
    {
        if !snapshot.belongs_to(entity) {
            return Err(SnapshotError::InvalidSnapshot {
                expected: entity.origin(),
                actual: snapshot.origin(),
            });
        }

        let restored = store.transaction(|store| {
            if observers.before_rewind(entity) == Flow::Cancel {
                return Ok(None);
            }

            let attributes = snapshot.attributes(codec)?;
            let mut working = entity.clone();
            let report = self.restore(store, &mut working, &attributes, codec, restore_related)?;
            info!(
                "Rewound {} to snapshot {} ({} plain, {} related, {} paths skipped)",
                working.origin(),
                snapshot.id,
                report.plain,
                report.related,
                report.skipped_paths
            );
            Ok(Some(working))
        })?;

        if let Some(restored) = restored.as_ref() {
            observers.after_rewind(restored);
        }
        Ok(restored)
    }
}

/// Restorer that walks relation paths through the store
#[derive(Debug, Clone, Default)]
pub struct SnapshotRestorer {
    policy: RelationPolicy,
}

impl SnapshotRestorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what happens when a hop of a relation path is empty
    pub fn with_policy(mut self, policy: RelationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RelationPolicy {
        self.policy
    }

    /// Walk `path` from `root`, creating empty hops when the policy allows it
    ///
    /// Entities already changed by this restore are picked up from `dirty` so
    /// later groups build on earlier ones.
    fn walk<S: EntityStore>(
        &self,
        store: &mut S,
        root: &mut S::Entity,
        path: &[String],
        dirty: &mut Vec<S::Entity>,
    ) -> Result<Option<S::Entity>> {
        let mut current: Option<S::Entity> = None;

        for relation in path {
            let found = match current.as_ref() {
                Some(from) => store.related(from, relation)?,
                None => store.related(root, relation)?,
            };

            let next = match found {
                Some(next) => next,
                None if self.policy == RelationPolicy::CreateMissing => {
                    // `create_related` must persist the link itself (for a
                    // belongs-to hop, the foreign key on `from`). `replace_dirty`
                    // only refreshes copies this restore already changed, so an
                    // unsaved link on a clean intermediate would be lost.
                    let created = match current.as_mut() {
                        Some(from) => {
                            let created = store.create_related(from, relation)?;
                            replace_dirty(dirty, from);
                            created
                        }
                        None => store.create_related(root, relation)?,
                    };
                    match created {
                        Some(created) => created,
                        None => return Ok(None),
                    }
                }
                None => return Ok(None),
            };

            current = Some(
                dirty
                    .iter()
                    .find(|candidate| candidate.origin() == next.origin())
                    .cloned()
                    .unwrap_or(next),
            );
        }
        Ok(current)
    }
}

impl AttributeRestorer for SnapshotRestorer {
    fn restore<S, K>(
        &self,
        store: &mut S,
        entity: &mut S::Entity,
        attributes: &AttributeMap,
        codec: &K,
        restore_related: bool,
    ) -> Result<RestoreReport>
    where
        S: EntityStore,
        K: StorageCodec + ?Sized,
    {
        let mut report = RestoreReport::default();

        for attribute in attributes.plain() {
            if apply(entity, attribute, codec)? {
                report.plain += 1;
            } else {
                report.skipped_attributes += 1;
            }
        }

        let mut dirty: Vec<S::Entity> = Vec::new();
        if restore_related {
            for (path, group) in attributes.related_groups() {
                let Some(mut target) = self.walk(store, entity, path, &mut dirty)? else {
                    debug!(
                        "Skipping relation path {:?} of {}: relation is absent",
                        path,
                        entity.origin()
                    );
                    report.skipped_paths += 1;
                    continue;
                };

                if target.origin() == entity.origin() {
                    apply_group(entity, &group, codec, &mut report)?;
                } else {
                    apply_group(&mut target, &group, codec, &mut report)?;
                    replace_or_push(&mut dirty, target);
                }
            }
        } else {
            debug!("Related attributes of {} not restored", entity.origin());
        }

        for related in &dirty {
            store.save(related)?;
        }
        store.save(entity)?;
        Ok(report)
    }
}

/// Write one decoded attribute to `entity`
///
/// # Returns
/// `false` if `entity` does not define the attribute
fn apply<E, K>(entity: &mut E, attribute: &VirtualAttribute, codec: &K) -> Result<bool>
where
    E: Entity,
    K: StorageCodec + ?Sized,
{
    let name = attribute.name();
    if !entity.has_attribute(name) {
        debug!("{} does not define '{}', skipping", entity.origin(), name);
        return Ok(false);
    }

    let cast = entity.cast_tag(name).or(attribute.cast()).map(str::to_string);
    let value = codec.materialize(attribute, cast.as_deref())?;
    entity.set_attribute(name, value)?;
    Ok(true)
}

fn apply_group<E, K>(
    entity: &mut E,
    group: &[&VirtualAttribute],
    codec: &K,
    report: &mut RestoreReport,
) -> Result<()>
where
    E: Entity,
    K: StorageCodec + ?Sized,
{
    for attribute in group {
        if apply(entity, attribute, codec)? {
            report.related += 1;
        } else {
            report.skipped_attributes += 1;
        }
    }
    Ok(())
}

fn replace_dirty<E: Entity + Clone>(dirty: &mut [E], entity: &E) {
    if let Some(slot) = dirty
        .iter_mut()
        .find(|candidate| candidate.origin() == entity.origin())
    {
        *slot = entity.clone();
    }
}

fn replace_or_push<E: Entity>(dirty: &mut Vec<E>, entity: E) {
    match dirty
        .iter_mut()
        .find(|candidate| candidate.origin() == entity.origin())
    {
        Some(slot) => *slot = entity,
        None => dirty.push(entity),
    }
}
