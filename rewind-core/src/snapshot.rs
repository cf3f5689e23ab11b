/*!
Main snapshot engine that orchestrates taking, listing and rewinding snapshots.

The engine owns explicit collector, restorer and codec instances together with
the observer registry and configuration. It borrows the persistence
collaborator per call, so one engine can serve any number of stores.
*/

use crate::attribute::AttributeMap;
use crate::codec::{JsonStorageCodec, StorageCodec};
use crate::collector::{self, AttributeCollector, DefinitionCollector};
use crate::config::SnapshotConfig;
use crate::entity::Entity;
use crate::events::{Flow, ObserverRegistry, SnapshotObserver};
use crate::record::{Snapshot, NATIVE_ATTRIBUTES};
use crate::restorer::{AttributeRestorer, SnapshotRestorer};
use crate::store::EntityStore;
use crate::{Result, SnapshotError};
use tracing::{debug, info, warn};

/// Main engine for snapshot and rewind operations
///
/// # Example
/// ```rust
/// use rewind_core::{
///     create_default_engine, AttributeMap, AttributeValue, Entity, EntitySchema, EntityStore,
///     MemoryStore, Record, SnapshotDefinition,
/// };
///
/// let mut store = MemoryStore::new().with_schema(
///     EntitySchema::new("post")
///         .attributes(["title"])
///         .snapshot_definition(SnapshotDefinition::new().capture(["title"])),
/// );
/// let mut post = store.create("post", [("title", "first draft")])?;
/// let engine = create_default_engine::<Record>();
///
/// let snapshot = engine
///     .take_snapshot(&mut store, &post, AttributeMap::new())?
///     .expect("no observer cancels");
///
/// post.set_attribute("title", "second draft".into())?;
/// store.save(&post)?;
///
/// engine.rewind_to(&mut store, &mut post, &snapshot, true)?;
/// assert_eq!(post.value("title"), AttributeValue::from("first draft"));
/// # Ok::<(), rewind_core::SnapshotError>(())
/// ```
pub struct SnapshotEngine<E, C = DefinitionCollector, R = SnapshotRestorer, K = JsonStorageCodec>
where
    E: Entity + Clone,
    C: AttributeCollector,
    R: AttributeRestorer,
    K: StorageCodec,
{
    collector: C,
    restorer: R,
    codec: K,
    observers: ObserverRegistry<E>,
    config: SnapshotConfig,
}

impl<E, C, R, K> SnapshotEngine<E, C, R, K>
where
    E: Entity + Clone,
    C: AttributeCollector,
    R: AttributeRestorer,
    K: StorageCodec,
{
    /// Create a new engine from its collaborators, with the default configuration
    ///
    /// # Arguments
    /// * `collector` - Builds the attribute mapping of an entity
    /// * `restorer` - Applies a decoded mapping back onto entities
    /// * `codec` - Encodes and decodes the storage column
    pub fn new(collector: C, restorer: R, codec: K) -> Self {
        Self {
            collector,
            restorer,
            codec,
            observers: ObserverRegistry::new(),
            config: SnapshotConfig::default(),
        }
    }

    /// Replace the configuration
    ///
    /// Only the settings read by the engine itself apply here; collector,
    /// restorer and codec keep the settings they were built with.
    pub fn with_config(mut self, config: SnapshotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn codec(&self) -> &K {
        &self.codec
    }

    pub fn observers(&self) -> &ObserverRegistry<E> {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut ObserverRegistry<E> {
        &mut self.observers
    }

    /// Register an observer for one entity type
    pub fn observe<S, O>(&mut self, entity_type: S, observer: O) -> &mut Self
    where
        S: Into<String>,
        O: SnapshotObserver<E> + 'static,
    {
        self.observers.observe(entity_type, observer);
        self
    }

    /// Collect the attributes a snapshot of `entity` would store
    ///
    /// # Arguments
    /// * `store` - Store used to resolve relation paths
    /// * `entity` - The entity to capture
    /// * `extra` - Additional attributes; they win over collected ones of the same name
    pub fn collect_snapshot_attributes<S>(
        &self,
        store: &S,
        entity: &E,
        extra: AttributeMap,
    ) -> Result<AttributeMap>
    where
        S: EntityStore<Entity = E>,
    {
        self.collector
            .collect_attributes(store, entity, entity.snapshot_definition(), extra)
    }

    /// Capture `entity` and store the snapshot
    ///
    /// # Returns
    /// The stored snapshot, or `None` if an observer cancelled it
    ///
    /// # Errors
    /// * `SnapshotError::AttributeNotFound` - If the definition names an undefined attribute
    /// * `SnapshotError::UnknownCast` / `SnapshotError::Cast` - If a value cannot be encoded
    /// * `SnapshotError::Persistence` - If the store rejects the snapshot record
    pub fn take_snapshot<S>(
        &self,
        store: &mut S,
        entity: &E,
        extra: AttributeMap,
    ) -> Result<Option<Snapshot>>
    where
        S: EntityStore<Entity = E>,
    {
        if self.observers.before_snapshot(entity) == Flow::Cancel {
            #[cfg(feature = "metrics")]
            crate::observability::with_metrics(|metrics| metrics.record_snapshot_cancelled());
            return Ok(None);
        }

        let mut attributes = self.collect_snapshot_attributes(store, entity, extra)?;
        for native in NATIVE_ATTRIBUTES {
            if attributes.remove(native).is_some() {
                warn!(
                    "Attribute '{}' of {} is a snapshot column and is not stored",
                    native,
                    entity.origin()
                );
            }
        }

        let storage = self.codec.encode(&attributes)?;
        let snapshot = Snapshot::new(entity.origin(), storage);
        store.insert_snapshot(&snapshot)?;

        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|metrics| {
            metrics.record_snapshot(attributes.len(), snapshot.storage.len())
        });

        info!(
            "Took snapshot {} of {} ({} attributes)",
            snapshot.id,
            entity.origin(),
            attributes.len()
        );
        self.observers.after_snapshot(entity, &snapshot);
        Ok(Some(snapshot))
    }

    /// Rewind `entity` to `snapshot`
    ///
    /// The whole restore runs in one store transaction. `entity` is updated
    /// only once the transaction has committed.
    ///
    /// # Arguments
    /// * `store` - Store holding `entity` and its relations
    /// * `entity` - The origin entity of `snapshot`
    /// * `snapshot` - The snapshot to rewind to
    /// * `restore_related` - Whether attributes of related entities are restored
    ///
    /// # Returns
    /// The restored entity, or `None` if an observer cancelled the rewind
    ///
    /// # Errors
    /// * `SnapshotError::InvalidSnapshot` - If `snapshot` was not taken from `entity`
    /// * `SnapshotError::MalformedStorage` - If the snapshot storage cannot be decoded
    /// * `SnapshotError::Persistence` - If saving any entity fails; nothing is kept
    pub fn rewind_to<S>(
        &self,
        store: &mut S,
        entity: &mut E,
        snapshot: &Snapshot,
        restore_related: bool,
    ) -> Result<Option<E>>
    where
        S: EntityStore<Entity = E>,
    {
        debug!("Rewinding {} to snapshot {}", entity.origin(), snapshot.id);
        let outcome = self.restorer.rewind_to(
            store,
            entity,
            snapshot,
            &self.codec,
            &self.observers,
            restore_related,
        );

        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|metrics| match &outcome {
            Ok(Some(_)) => metrics.record_rewind(),
            Ok(None) => metrics.record_rewind_cancelled(),
            Err(_) => metrics.record_rewind_failed(),
        });

        let restored = outcome?;
        if let Some(restored) = restored.as_ref() {
            *entity = restored.clone();
        }
        Ok(restored)
    }

    /// Rewind using the configured `restore_related` default
    pub fn rewind<S>(&self, store: &mut S, entity: &mut E, snapshot: &Snapshot) -> Result<Option<E>>
    where
        S: EntityStore<Entity = E>,
    {
        self.rewind_to(store, entity, snapshot, self.config.restore_related)
    }

    /// Restore the origin of `snapshot`, related attributes included
    ///
    /// # Returns
    /// The refreshed origin entity; unchanged if an observer cancelled the rewind
    ///
    /// # Errors
    /// * `SnapshotError::OriginNotFound` - If the origin entity no longer exists
    pub fn sync<S>(&self, store: &mut S, snapshot: &Snapshot) -> Result<E>
    where
        S: EntityStore<Entity = E>,
    {
        let origin = snapshot.origin();
        let mut entity = store
            .find(&origin)?
            .ok_or(SnapshotError::OriginNotFound(origin))?;
        self.rewind_to(store, &mut entity, snapshot, true)?;
        Ok(entity)
    }

    /// All snapshots of `entity`, oldest first
    pub fn snapshots<S>(&self, store: &S, entity: &E) -> Result<Vec<Snapshot>>
    where
        S: EntityStore<Entity = E>,
    {
        store.snapshots(&entity.origin())
    }

    /// Most recently created snapshot of `entity`
    ///
    /// Among snapshots with the same creation time the last stored one wins.
    pub fn latest_snapshot<S>(&self, store: &S, entity: &E) -> Result<Option<Snapshot>>
    where
        S: EntityStore<Entity = E>,
    {
        Ok(self
            .snapshots(store, entity)?
            .into_iter()
            .max_by_key(|snapshot| snapshot.created_at))
    }

    /// First created snapshot of `entity`
    pub fn oldest_snapshot<S>(&self, store: &S, entity: &E) -> Result<Option<Snapshot>>
    where
        S: EntityStore<Entity = E>,
    {
        Ok(self
            .snapshots(store, entity)?
            .into_iter()
            .min_by_key(|snapshot| snapshot.created_at))
    }

    /// Collect several independent entities in parallel
    ///
    /// Results are returned in input order.
    pub fn collect_batch<S>(&self, store: &S, entities: &[E]) -> Vec<Result<AttributeMap>>
    where
        S: EntityStore<Entity = E> + Sync,
        C: Sync,
        E: Sync,
    {
        collector::collect_batch(&self.collector, store, entities)
    }
}

/// Create an engine with the default collector, restorer and JSON codec
///
/// # Example
/// ```rust
/// use rewind_core::{create_default_engine, Record};
///
/// let engine = create_default_engine::<Record>();
/// assert!(engine.config().restore_related);
/// ```
pub fn create_default_engine<E: Entity + Clone>() -> SnapshotEngine<E> {
    SnapshotEngine::new(
        DefinitionCollector::new(),
        SnapshotRestorer::new(),
        JsonStorageCodec::new(),
    )
}

/// Create an engine whose collaborators follow `config`
///
/// # Errors
/// * `SnapshotError::Validation` - If the configuration is inconsistent
pub fn create_engine_from_config<E: Entity + Clone>(
    config: SnapshotConfig,
) -> Result<SnapshotEngine<E>> {
    config.validate()?;
    let engine = SnapshotEngine::new(
        DefinitionCollector::new().warn_on_extra_collision(config.warn_on_extra_collision),
        SnapshotRestorer::new().with_policy(config.relation_policy),
        JsonStorageCodec::new().pretty(config.pretty_storage),
    );
    Ok(engine.with_config(config))
}
