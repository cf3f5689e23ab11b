/*!
Persistence collaborator for snapshot operations.

This module defines the port the collector and restorer talk to: loading
entities and their relations, saving entities inside a transaction, and storing
snapshot records. The surrounding object-relational layer provides the adapter;
[`MemoryStore`] is the in-memory reference adapter.
*/

#[cfg(feature = "memory")]
pub mod memory;

use crate::entity::{Entity, Origin};
use crate::record::Snapshot;
use crate::Result;
use tracing::{error, warn};

/// Storage abstraction for entities, relations and snapshot records
pub trait EntityStore {
    /// Entity representation handed out by this store
    type Entity: Entity + Clone;

    /// Load an entity by origin
    ///
    /// # Returns
    /// The entity, or `None` if no entity with that origin exists
    fn find(&self, origin: &Origin) -> Result<Option<Self::Entity>>;

    /// Resolve a to-one relation of `entity`
    ///
    /// # Returns
    /// The related entity, or `None` if the relation is empty or unknown
    fn related(&self, entity: &Self::Entity, relation: &str) -> Result<Option<Self::Entity>>;

    /// Create and persist an empty related entity for a relation that is currently empty
    ///
    /// Any change to `entity` needed to link the new entity (e.g. a foreign key)
    /// is applied to `entity` and persisted as well.
    ///
    /// # Returns
    /// The new related entity, or `None` if the relation cannot be created on demand
    fn create_related(
        &mut self,
        entity: &mut Self::Entity,
        relation: &str,
    ) -> Result<Option<Self::Entity>>;

    /// Persist the current attribute values of `entity`
    fn save(&mut self, entity: &Self::Entity) -> Result<()>;

    /// Open a transaction
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction
    fn commit(&mut self) -> Result<()>;

    /// Discard every change made since `begin`
    fn rollback(&mut self) -> Result<()>;

    /// Store a new snapshot record
    fn insert_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// All snapshots of an origin, oldest first
    fn snapshots(&self, origin: &Origin) -> Result<Vec<Snapshot>>;

    /// Run `f` inside a transaction, committing on success and rolling back on error
    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                warn!("Rolling back transaction: {}", e);
                if let Err(rollback_error) = self.rollback() {
                    error!("Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }
}

#[cfg(feature = "memory")]
pub use memory::{EntitySchema, MemoryStore, Record, RelationKind};
