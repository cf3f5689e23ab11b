/*!
# Rewind Core Engine

Point-in-time snapshots of entity attributes with failure-atomic restore.

This crate captures an entity's attributes, including attributes reached
through related entities, into a single storage blob, and later rewinds the
entity (and those related entities) to a chosen snapshot:

- An [`AttributeCollector`] turns a live entity and its [`SnapshotDefinition`]
  into an ordered [`AttributeMap`] of [`VirtualAttribute`]s
- A [`StorageCodec`] encodes that map into the snapshot's storage column,
  keeping each attribute's cast tag and relation path
- An [`AttributeRestorer`] applies a stored map back onto the entity and its
  relations inside one store transaction

## Architecture

Entities are accessed through the [`Entity`] capability trait and persisted
through the [`EntityStore`] port; the surrounding object-relational layer
provides both. [`MemoryStore`] is the in-memory adapter used by tests and
examples. Observers registered on the engine can veto snapshots and rewinds.

## Usage

```rust
use rewind_core::{
    create_default_engine, AttributeMap, EntitySchema, MemoryStore, Record, SnapshotDefinition,
};

let mut store = MemoryStore::new().with_schema(
    EntitySchema::new("post")
        .attributes(["title", "body"])
        .snapshot_definition(SnapshotDefinition::new().capture(["title", "body"])),
);
let mut post = store.create("post", [("title", "hello"), ("body", "world")])?;

let engine = create_default_engine::<Record>();
let extra = AttributeMap::new().with("reason", "before edit");
if let Some(snapshot) = engine.take_snapshot(&mut store, &post, extra)? {
    engine.rewind(&mut store, &mut post, &snapshot)?;
}
# Ok::<(), rewind_core::SnapshotError>(())
```
*/

pub mod attribute;
pub mod cast;
pub mod codec;
pub mod collector;
pub mod config;
pub mod definition;
pub mod entity;
pub mod error;
pub mod events;
pub mod observability;
pub mod record;
pub mod restorer;
pub mod snapshot;
pub mod store;
pub mod value;


pub use attribute::{AttributeMap, PlainAttribute, RelatedAttribute, RelationPath, VirtualAttribute};
pub use cast::{implied_cast, Cast, CastRegistry};
pub use codec::{JsonStorageCodec, StorageCodec};
pub use collector::{collect_batch, AttributeCollector, DefinitionCollector};
pub use config::{RelationPolicy, SnapshotConfig};
pub use definition::{RelationDefinition, SnapshotDefinition};
pub use entity::{Entity, Origin};
pub use error::{Result, SnapshotError};
pub use events::{Flow, ObserverRegistry, SnapshotObserver};
pub use record::{Snapshot, NATIVE_ATTRIBUTES, STORAGE_COLUMN};
pub use restorer::{AttributeRestorer, RestoreReport, SnapshotRestorer};
pub use snapshot::{create_default_engine, create_engine_from_config, SnapshotEngine};
pub use store::EntityStore;
#[cfg(feature = "memory")]
pub use store::{EntitySchema, MemoryStore, Record, RelationKind};
pub use value::AttributeValue;
