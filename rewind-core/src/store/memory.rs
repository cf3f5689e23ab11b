/*!
In-memory entity store.

Entity types are registered as [`EntitySchema`]s: their attributes, cast tags,
to-one relations and snapshot definition. Rows live in memory; writes made
inside a transaction are recorded in an undo log so `rollback` can restore the
exact previous state.
*/

use super::EntityStore;
use crate::definition::SnapshotDefinition;
use crate::entity::{Entity, Origin};
use crate::record::Snapshot;
use crate::value::AttributeValue;
use crate::{Result, SnapshotError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type Row = HashMap<String, AttributeValue>;
type RowKey = (String, String);
type WriteConstraint = Arc<dyn Fn(&Record) -> std::result::Result<(), String> + Send + Sync>;

/// How a relation links two entity types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// The owning entity stores the related entity's id in `foreign_key`
    BelongsTo { target: String, foreign_key: String },
    /// The related entity stores the owning entity's id in `foreign_key`
    HasOne { target: String, foreign_key: String },
}

/// Registration of one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    attributes: Vec<String>,
    casts: HashMap<String, String>,
    relations: HashMap<String, RelationKind>,
    definition: SnapshotDefinition,
}

impl EntitySchema {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            casts: HashMap::new(),
            relations: HashMap::new(),
            definition: SnapshotDefinition::default(),
        }
    }

    pub fn attribute<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();
        if !self.attributes.contains(&name) {
            self.attributes.push(name);
        }
        self
    }

    pub fn attributes<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, Self::attribute)
    }

    /// Declare an attribute with a cast tag
    pub fn cast<S1, S2>(mut self, name: S1, tag: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let name = name.into();
        self.casts.insert(name.clone(), tag.into());
        self.attribute(name)
    }

    /// Declare a belongs-to relation; `foreign_key` becomes an attribute of this type
    pub fn belongs_to<S1, S2, S3>(mut self, relation: S1, target: S2, foreign_key: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let foreign_key = foreign_key.into();
        self.relations.insert(
            relation.into(),
            RelationKind::BelongsTo {
                target: target.into(),
                foreign_key: foreign_key.clone(),
            },
        );
        self.attribute(foreign_key)
    }

    /// Declare a has-one relation; `foreign_key` must be an attribute of `target`
    pub fn has_one<S1, S2, S3>(mut self, relation: S1, target: S2, foreign_key: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        self.relations.insert(
            relation.into(),
            RelationKind::HasOne {
                target: target.into(),
                foreign_key: foreign_key.into(),
            },
        );
        self
    }

    pub fn snapshot_definition(mut self, definition: SnapshotDefinition) -> Self {
        self.definition = definition;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relation(&self, name: &str) -> Option<&RelationKind> {
        self.relations.get(name)
    }
}

/// An entity instance backed by a registered schema
#[derive(Clone)]
pub struct Record {
    schema: Arc<EntitySchema>,
    id: String,
    values: Row,
}

impl Record {
    fn from_row(schema: Arc<EntitySchema>, id: String, values: Row) -> Self {
        Self { schema, id, values }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Current value of an attribute, `Null` when undefined
    pub fn value(&self, name: &str) -> AttributeValue {
        self.values.get(name).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.schema.name)
            .field("id", &self.id)
            .field("values", &self.values)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.id == other.id && self.values == other.values
    }
}

impl Entity for Record {
    fn entity_type(&self) -> &str {
        &self.schema.name
    }

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn attribute_names(&self) -> Vec<String> {
        self.schema.attributes.clone()
    }

    fn get_attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    fn set_attribute(&mut self, name: &str, value: AttributeValue) -> Result<()> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(SnapshotError::attribute_not_found(&self.schema.name, name)),
        }
    }

    fn cast_tag(&self, name: &str) -> Option<&str> {
        self.schema.casts.get(name).map(String::as_str)
    }

    fn snapshot_definition(&self) -> &SnapshotDefinition {
        &self.schema.definition
    }
}

/// Reversible write recorded while a transaction is open
#[derive(Debug, Clone)]
enum Change {
    UpsertRow { key: RowKey, previous: Option<Row> },
    InsertSnapshot { id: Uuid },
}

/// In-memory [`EntityStore`] with undo-log transactions
#[derive(Default)]
pub struct MemoryStore {
    schemas: HashMap<String, Arc<EntitySchema>>,
    rows: BTreeMap<RowKey, Row>,
    next_ids: HashMap<String, u64>,
    snapshots: Vec<Snapshot>,
    constraints: HashMap<String, Vec<WriteConstraint>>,
    journal: Option<Vec<Change>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type, replacing any previous registration with that name
    pub fn register(&mut self, schema: EntitySchema) -> &mut Self {
        self.schemas
            .insert(schema.name.clone(), Arc::new(schema));
        self
    }

    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.register(schema);
        self
    }

    /// Reject writes of `entity_type` records for which `constraint` returns an error
    pub fn add_constraint<S, F>(&mut self, entity_type: S, constraint: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&Record) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.constraints
            .entry(entity_type.into())
            .or_default()
            .push(Arc::new(constraint));
        self
    }

    pub fn schema(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        self.schemas.get(entity_type).cloned().ok_or_else(|| {
            SnapshotError::validation(format!("entity type '{entity_type}' is not registered"))
        })
    }

    /// Create and persist a new entity with the given attribute values
    ///
    /// Attributes not listed start out as `Null`.
    pub fn create<I, S, V>(&mut self, entity_type: &str, values: I) -> Result<Record>
    where
        I: IntoIterator<Item = (S, V)>,
        S: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let schema = self.schema(entity_type)?;
        let counter = self.next_ids.entry(entity_type.to_string()).or_insert(0);
        *counter += 1;
        let id = counter.to_string();

        let row = schema
            .attributes
            .iter()
            .map(|name| (name.clone(), AttributeValue::Null))
            .collect();
        let mut record = Record::from_row(schema, id, row);
        for (name, value) in values {
            record.set_attribute(name.as_ref(), value.into())?;
        }

        self.write(&record)?;
        Ok(record)
    }

    /// Every stored entity of a type, ordered by id
    pub fn records(&self, entity_type: &str) -> Result<Vec<Record>> {
        let schema = self.schema(entity_type)?;
        Ok(self
            .rows
            .iter()
            .filter(|((row_type, _), _)| row_type == entity_type)
            .map(|((_, id), row)| Record::from_row(Arc::clone(&schema), id.clone(), row.clone()))
            .collect())
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        let schema = self.schema(record.entity_type())?;
        if let Some(constraints) = self.constraints.get(schema.name()) {
            for constraint in constraints {
                constraint(record).map_err(|reason| {
                    SnapshotError::persistence(format!("cannot save {}: {reason}", record.origin()))
                })?;
            }
        }

        let key = (record.entity_type().to_string(), record.entity_id().to_string());
        let previous = self.rows.insert(key.clone(), record.values.clone());
        self.record_change(Change::UpsertRow { key, previous });
        Ok(())
    }

    fn record_change(&mut self, change: Change) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }

    fn load(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        let schema = self.schema(entity_type)?;
        let key = (entity_type.to_string(), id.to_string());
        Ok(self
            .rows
            .get(&key)
            .map(|row| Record::from_row(schema, id.to_string(), row.clone())))
    }
}

/// Render a key-like attribute value as an id
fn key_of(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Text(id) => Some(id.clone()),
        AttributeValue::Integer(id) => Some(id.to_string()),
        _ => None,
    }
}

impl EntityStore for MemoryStore {
    type Entity = Record;

    fn find(&self, origin: &Origin) -> Result<Option<Record>> {
        if !self.schemas.contains_key(&origin.origin_type) {
            return Ok(None);
        }
        self.load(&origin.origin_type, &origin.origin_id)
    }

    fn related(&self, entity: &Record, relation: &str) -> Result<Option<Record>> {
        let Some(kind) = entity.schema.relation(relation) else {
            debug!("{} has no relation '{}'", entity.origin(), relation);
            return Ok(None);
        };

        match kind {
            RelationKind::BelongsTo {
                target,
                foreign_key,
            } => match entity.get_attribute(foreign_key).and_then(key_of) {
                Some(id) => self.load(target, &id),
                None => Ok(None),
            },
            RelationKind::HasOne {
                target,
                foreign_key,
            } => {
                let owner_id = entity.entity_id();
                Ok(self.records(target)?.into_iter().find(|candidate| {
                    candidate
                        .get_attribute(foreign_key)
                        .and_then(key_of)
                        .is_some_and(|id| id == owner_id)
                }))
            }
        }
    }

    fn create_related(&mut self, entity: &mut Record, relation: &str) -> Result<Option<Record>> {
        let Some(kind) = entity.schema.relation(relation).cloned() else {
            return Ok(None);
        };

        match kind {
            RelationKind::BelongsTo {
                target,
                foreign_key,
            } => {
                let related = self.create(&target, std::iter::empty::<(&str, AttributeValue)>())?;
                entity.set_attribute(&foreign_key, AttributeValue::from(related.entity_id()))?;
                self.write(entity)?;
                debug!("Created {} for {}.{}", related.origin(), entity.origin(), relation);
                Ok(Some(related))
            }
            RelationKind::HasOne {
                target,
                foreign_key,
            } => {
                let owner_id = AttributeValue::from(entity.entity_id());
                let related = self.create(&target, [(foreign_key, owner_id)])?;
                debug!("Created {} for {}.{}", related.origin(), entity.origin(), relation);
                Ok(Some(related))
            }
        }
    }

    fn save(&mut self, entity: &Record) -> Result<()> {
        self.write(entity)
    }

    fn begin(&mut self) -> Result<()> {
        if self.journal.is_some() {
            return Err(SnapshotError::transaction("a transaction is already open"));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or_else(|| SnapshotError::transaction("commit without an open transaction"))
    }

    fn rollback(&mut self) -> Result<()> {
        let journal = self
            .journal
            .take()
            .ok_or_else(|| SnapshotError::transaction("rollback without an open transaction"))?;

        for change in journal.into_iter().rev() {
            match change {
                Change::UpsertRow {
                    key,
                    previous: Some(row),
                } => {
                    self.rows.insert(key, row);
                }
                Change::UpsertRow {
                    key,
                    previous: None,
                } => {
                    self.rows.remove(&key);
                }
                Change::InsertSnapshot { id } => {
                    self.snapshots.retain(|snapshot| snapshot.id != id);
                }
            }
        }
        Ok(())
    }

    fn insert_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        snapshot.validate()?;
        self.snapshots.push(snapshot.clone());
        self.record_change(Change::InsertSnapshot { id: snapshot.id });
        Ok(())
    }

    fn snapshots(&self, origin: &Origin) -> Result<Vec<Snapshot>> {
        let mut snapshots: Vec<Snapshot> = self
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.origin_type == origin.origin_type && snapshot.origin_id == origin.origin_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.created_at);
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_store() -> MemoryStore {
        MemoryStore::new()
            .with_schema(
                EntitySchema::new("post")
                    .attributes(["title"])
                    .belongs_to("author", "user", "author_id"),
            )
            .with_schema(
                EntitySchema::new("user")
                    .attributes(["name"])
                    .has_one("profile", "profile", "user_id"),
            )
            .with_schema(EntitySchema::new("profile").attributes(["bio", "user_id"]))
    }

    #[test]
    fn test_create_and_find() {
        let mut store = blog_store();
        let post = store.create("post", [("title", "hello")]).unwrap();

        let found = store.find(&post.origin()).unwrap().unwrap();
        assert_eq!(found, post);
        assert_eq!(found.value("title"), AttributeValue::from("hello"));
        assert_eq!(found.value("author_id"), AttributeValue::Null);
    }

    #[test]
    fn test_create_rejects_unknown_attribute() {
        let mut store = blog_store();
        let result = store.create("post", [("subtitle", "x")]);
        assert!(matches!(result, Err(SnapshotError::AttributeNotFound { .. })));
    }

    #[test]
    fn test_relations_resolve() {
        let mut store = blog_store();
        let user = store.create("user", [("name", "ada")]).unwrap();
        store
            .create("profile", [("bio", "hi"), ("user_id", user.entity_id())])
            .unwrap();
        let post = store
            .create("post", [("title", "t"), ("author_id", user.entity_id())])
            .unwrap();

        let author = store.related(&post, "author").unwrap().unwrap();
        assert_eq!(author.value("name"), AttributeValue::from("ada"));

        let profile = store.related(&author, "profile").unwrap().unwrap();
        assert_eq!(profile.value("bio"), AttributeValue::from("hi"));

        assert!(store.related(&post, "editor").unwrap().is_none());
    }

    #[test]
    fn test_create_related_links_both_sides() {
        let mut store = blog_store();
        let mut post = store.create("post", [("title", "t")]).unwrap();

        let author = store.create_related(&mut post, "author").unwrap().unwrap();
        assert_eq!(post.value("author_id"), AttributeValue::from(author.entity_id()));
        assert_eq!(store.related(&post, "author").unwrap(), Some(author.clone()));

        let mut author = author;
        let profile = store.create_related(&mut author, "profile").unwrap().unwrap();
        assert_eq!(store.related(&author, "profile").unwrap(), Some(profile));
    }

    #[test]
    fn test_rollback_restores_rows_and_snapshots() {
        let mut store = blog_store();
        let mut post = store.create("post", [("title", "before")]).unwrap();

        store.begin().unwrap();
        post.set_attribute("title", "after".into()).unwrap();
        store.save(&post).unwrap();
        store.create("user", [("name", "temp")]).unwrap();
        store
            .insert_snapshot(&Snapshot::new(post.origin(), "{}"))
            .unwrap();
        store.rollback().unwrap();

        let found = store.find(&post.origin()).unwrap().unwrap();
        assert_eq!(found.value("title"), AttributeValue::from("before"));
        assert!(store.records("user").unwrap().is_empty());
        assert!(store.snapshots(&post.origin()).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_misuse() {
        let mut store = blog_store();
        assert!(matches!(store.commit(), Err(SnapshotError::Transaction(_))));

        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(SnapshotError::Transaction(_))));
        store.commit().unwrap();
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_constraint_rejects_write() {
        let mut store = blog_store();
        store.add_constraint("post", |record| match record.value("title") {
            AttributeValue::Null => Err("title is required".to_string()),
            _ => Ok(()),
        });

        assert!(matches!(
            store.create("post", [("title", AttributeValue::Null)]),
            Err(SnapshotError::Persistence(_))
        ));
        assert!(store.create("post", [("title", "ok")]).is_ok());
    }
}
