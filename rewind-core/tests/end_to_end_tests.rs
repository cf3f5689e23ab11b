/*!
End-to-end integration tests for the Rewind core.
These tests drive the complete pipeline from attribute collection through
storage encoding to failure-atomic restoration, using the in-memory store.
*/

use chrono::{Duration, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rewind_core::{
    create_default_engine, create_engine_from_config, AttributeMap, AttributeRestorer,
    AttributeValue, Entity, EntitySchema, EntityStore, Flow, JsonStorageCodec, MemoryStore,
    Record, RelationDefinition, Snapshot, SnapshotConfig, SnapshotDefinition, SnapshotError,
    SnapshotObserver, SnapshotRestorer, StorageCodec, VirtualAttribute,
};
use serde_json::json;

fn blog_store() -> MemoryStore {
    MemoryStore::new()
        .with_schema(
            EntitySchema::new("post")
                .attributes(["title", "body"])
                .cast("published_at", "datetime")
                .cast("views", "integer")
                .cast("score", "float")
                .belongs_to("author", "user", "author_id")
                .snapshot_definition(
                    SnapshotDefinition::new()
                        .capture(["title", "body", "published_at", "views", "score"])
                        .capture_relation(
                            RelationDefinition::new("author")
                                .capture(["name"])
                                .capture_relation(RelationDefinition::new("profile").capture(["bio"])),
                        ),
                ),
        )
        .with_schema(
            EntitySchema::new("user")
                .attributes(["name"])
                .has_one("profile", "profile", "user_id"),
        )
        .with_schema(
            EntitySchema::new("profile")
                .attributes(["user_id"])
                .cast("bio", "stringable"),
        )
}

fn seeded_post(store: &mut MemoryStore) -> (Record, Record, Record) {
    let user = store.create("user", [("name", "ada")]).unwrap();
    let profile = store
        .create(
            "profile",
            [
                ("bio", AttributeValue::from("analyst")),
                ("user_id", AttributeValue::from(user.entity_id())),
            ],
        )
        .unwrap();
    let post = store
        .create(
            "post",
            [
                ("title", AttributeValue::from("notes")),
                ("body", AttributeValue::from("on the engine")),
                (
                    "published_at",
                    AttributeValue::from(Utc.with_ymd_and_hms(1843, 9, 1, 0, 0, 0).unwrap()),
                ),
                ("views", AttributeValue::from(12)),
                ("score", AttributeValue::from(4.5)),
                ("author_id", AttributeValue::from(user.entity_id())),
            ],
        )
        .unwrap();
    (post, user, profile)
}

fn edit(store: &mut MemoryStore, entity: &Record, values: &[(&str, AttributeValue)]) -> Record {
    let mut edited = entity.clone();
    for (name, value) in values {
        edited.set_attribute(name, value.clone()).unwrap();
    }
    store.save(&edited).unwrap();
    edited
}

fn reload(store: &MemoryStore, entity: &Record) -> Record {
    store.find(&entity.origin()).unwrap().unwrap()
}

#[test]
fn test_collect_encode_restore_scenario() {
    let mut store = MemoryStore::new().with_schema(
        EntitySchema::new("item")
            .attributes(["a", "b", "c"])
            .snapshot_definition(SnapshotDefinition::new().capture(["a", "b"])),
    );
    let mut item = store.create("item", [("a", "x"), ("b", "y"), ("c", "")]).unwrap();
    let engine = create_default_engine::<Record>();
    let codec = JsonStorageCodec::new();

    let collected = engine
        .collect_snapshot_attributes(&store, &item, AttributeMap::new().with("c", "z"))
        .unwrap();
    assert_eq!(collected.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    for attribute in &collected {
        assert_eq!(attribute.cast(), None);
        assert!(!attribute.is_related());
    }
    assert_eq!(codec.decode(&codec.encode(&collected).unwrap()).unwrap(), collected);

    let snapshot = engine
        .take_snapshot(&mut store, &item, AttributeMap::new().with("c", "z"))
        .unwrap()
        .unwrap();

    item = edit(
        &mut store,
        &item,
        &[("a", "".into()), ("b", "".into())],
    );
    engine.rewind_to(&mut store, &mut item, &snapshot, true).unwrap();

    assert_eq!(item.value("a"), AttributeValue::from("x"));
    assert_eq!(item.value("b"), AttributeValue::from("y"));
    assert_eq!(item.value("c"), AttributeValue::from("z"));
    assert_eq!(reload(&store, &item), item);
}

#[test]
fn test_restore_onto_entity_without_extra_attribute() {
    let mut store = MemoryStore::new()
        .with_schema(EntitySchema::new("draft").attributes(["a", "b"]));
    let mut draft = store.create("draft", [("a", ""), ("b", "")]).unwrap();
    let attributes = AttributeMap::new().with("a", "x").with("b", "y").with("c", "z");

    let report = SnapshotRestorer::new()
        .restore(&mut store, &mut draft, &attributes, &JsonStorageCodec::new(), true)
        .unwrap();

    assert_eq!(report.plain, 2);
    assert_eq!(report.skipped_attributes, 1);
    assert_eq!(draft.value("a"), AttributeValue::from("x"));
    assert_eq!(draft.value("b"), AttributeValue::from("y"));
}

#[test]
fn test_full_rewind_with_related_entities() {
    let mut store = blog_store();
    let (mut post, user, profile) = seeded_post(&mut store);
    let original_post = post.clone();
    let engine = create_default_engine::<Record>();

    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();
    let stored = snapshot.attributes(engine.codec()).unwrap();
    assert_eq!(stored.len(), 7);
    assert_eq!(stored.get("bio").unwrap().cast(), Some("stringable"));

    post = edit(
        &mut store,
        &post,
        &[("title", "rewritten".into()), ("views", 99.into())],
    );
    edit(&mut store, &user, &[("name", "grace".into())]);
    edit(&mut store, &profile, &[("bio", "admiral".into())]);

    engine.rewind_to(&mut store, &mut post, &snapshot, true).unwrap();

    assert_eq!(post, original_post);
    assert_eq!(reload(&store, &user).value("name"), AttributeValue::from("ada"));
    assert_eq!(reload(&store, &profile).value("bio"), AttributeValue::from("analyst"));
}

#[test]
fn test_rewind_without_related_attributes() {
    let mut store = blog_store();
    let (mut post, user, _) = seeded_post(&mut store);
    let engine = create_engine_from_config::<Record>(
        SnapshotConfig::default().with_restore_related(false),
    )
    .unwrap();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();

    post = edit(&mut store, &post, &[("title", "rewritten".into())]);
    edit(&mut store, &user, &[("name", "grace".into())]);

    engine.rewind(&mut store, &mut post, &snapshot).unwrap();

    assert_eq!(post.value("title"), AttributeValue::from("notes"));
    assert_eq!(reload(&store, &user).value("name"), AttributeValue::from("grace"));
}

#[test]
fn test_restore_is_idempotent() {
    let mut store = blog_store();
    let (mut post, user, _) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();
    post = edit(&mut store, &post, &[("body", "gone".into())]);
    edit(&mut store, &user, &[("name", "grace".into())]);

    let once = engine
        .rewind_to(&mut store, &mut post, &snapshot, true)
        .unwrap()
        .unwrap();
    let user_once = reload(&store, &user);
    let twice = engine
        .rewind_to(&mut store, &mut post, &snapshot, true)
        .unwrap()
        .unwrap();

    assert_eq!(once, twice);
    assert_eq!(reload(&store, &user), user_once);
}

#[test]
fn test_cross_origin_rewind_is_rejected() {
    let mut store = blog_store();
    let (mut post, _, _) = seeded_post(&mut store);
    let other = store.create("post", [("title", "other")]).unwrap();
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &other, AttributeMap::new())
        .unwrap()
        .unwrap();
    let before = post.clone();

    let result = engine.rewind_to(&mut store, &mut post, &snapshot, true);

    match result {
        Err(SnapshotError::InvalidSnapshot { expected, actual }) => {
            assert_eq!(expected, post.origin());
            assert_eq!(actual, other.origin());
        }
        other => panic!("Expected InvalidSnapshot, got {other:?}"),
    }
    assert_eq!(post, before);
    assert_eq!(reload(&store, &post), before);
}

struct BlockRewinds;

impl SnapshotObserver<Record> for BlockRewinds {
    fn rewinding(&self, _entity: &Record) -> Flow {
        Flow::Cancel
    }
}

#[test]
fn test_vetoed_rewind_changes_nothing() {
    let mut store = blog_store();
    let (mut post, user, profile) = seeded_post(&mut store);
    let mut engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();
    post = edit(&mut store, &post, &[("title", "edited".into())]);
    let user = edit(&mut store, &user, &[("name", "grace".into())]);
    let before = post.clone();

    engine.observe("post", BlockRewinds);
    let result = engine.rewind_to(&mut store, &mut post, &snapshot, true).unwrap();

    assert!(result.is_none());
    assert_eq!(post, before);
    assert_eq!(reload(&store, &post), before);
    assert_eq!(reload(&store, &user), user);
    assert_eq!(reload(&store, &profile), profile);
}

#[test]
fn test_failed_restore_rolls_back_all_entities() {
    let mut store = blog_store();
    let (mut post, user, profile) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();

    post = edit(&mut store, &post, &[("title", "edited".into())]);
    let profile = edit(&mut store, &profile, &[("bio", "admiral".into())]);
    store.add_constraint("profile", |record| {
        if record.value("bio") == AttributeValue::from("analyst") {
            Err("bio is locked".to_string())
        } else {
            Ok(())
        }
    });
    let before = post.clone();

    let result = engine.rewind_to(&mut store, &mut post, &snapshot, true);

    assert!(matches!(result, Err(SnapshotError::Persistence(_))));
    assert_eq!(post, before);
    assert_eq!(reload(&store, &post), before);
    assert_eq!(reload(&store, &user), user);
    assert_eq!(reload(&store, &profile), profile);
    assert!(!store.in_transaction());
}

#[test]
fn test_missing_relations_are_created_on_demand() {
    let mut store = blog_store();
    let (post, user, _) = seeded_post(&mut store);
    let engine = create_engine_from_config::<Record>(SnapshotConfig::create_missing_relations())
        .unwrap();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();

    let mut orphan = edit(&mut store, &post, &[("author_id", AttributeValue::Null)]);
    engine.rewind_to(&mut store, &mut orphan, &snapshot, true).unwrap();

    let author = store.related(&orphan, "author").unwrap().unwrap();
    assert_ne!(author.origin(), user.origin());
    assert_eq!(author.value("name"), AttributeValue::from("ada"));
    let profile = store.related(&author, "profile").unwrap().unwrap();
    assert_eq!(profile.value("bio"), AttributeValue::from("analyst"));
    assert_eq!(store.records("user").unwrap().len(), 2);
    assert_eq!(reload(&store, &orphan), orphan);
}

#[test]
fn test_absent_relation_is_skipped() {
    let mut store = blog_store();
    let (post, _, _) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();

    let mut orphan = edit(
        &mut store,
        &post,
        &[("author_id", AttributeValue::Null), ("title", "orphaned".into())],
    );
    let users_before = store.records("user").unwrap();

    engine
        .rewind_to(&mut store, &mut orphan, &snapshot, true)
        .unwrap()
        .unwrap();

    assert_eq!(orphan.value("title"), AttributeValue::from("notes"));
    assert_eq!(store.records("user").unwrap(), users_before);
}

#[test]
fn test_latest_and_oldest_follow_creation_time() {
    let mut store = blog_store();
    let (post, _, _) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let storage = engine
        .codec()
        .encode(&engine.collect_snapshot_attributes(&store, &post, AttributeMap::new()).unwrap())
        .unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let snapshots: Vec<Snapshot> = [1, 0, 2]
        .into_iter()
        .map(|minutes| {
            Snapshot::new(post.origin(), storage.clone()).with_created_at(t0 + Duration::minutes(minutes))
        })
        .collect();
    for snapshot in &snapshots {
        store.insert_snapshot(snapshot).unwrap();
    }

    let latest = engine.latest_snapshot(&store, &post).unwrap().unwrap();
    let oldest = engine.oldest_snapshot(&store, &post).unwrap().unwrap();
    assert_eq!(latest.id, snapshots[2].id);
    assert_eq!(oldest.id, snapshots[1].id);

    let listed: Vec<_> = engine
        .snapshots(&store, &post)
        .unwrap()
        .into_iter()
        .map(|snapshot| snapshot.created_at)
        .collect();
    assert_eq!(
        listed,
        vec![t0, t0 + Duration::minutes(1), t0 + Duration::minutes(2)]
    );
}

#[test]
fn test_sync_refreshes_origin() {
    let mut store = blog_store();
    let (post, user, _) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();
    edit(&mut store, &post, &[("title", "edited".into())]);
    edit(&mut store, &user, &[("name", "grace".into())]);

    let synced = engine.sync(&mut store, &snapshot).unwrap();

    assert_eq!(synced, post);
    assert_eq!(reload(&store, &user).value("name"), AttributeValue::from("ada"));
}

fn typed_store() -> MemoryStore {
    MemoryStore::new().with_schema(
        EntitySchema::new("sample")
            .attributes(["title", "body", "stamp", "meta", "ratio"])
            .cast("published_at", "datetime")
            .cast("views", "integer")
            .cast("score", "float")
            .snapshot_definition(SnapshotDefinition::new().capture_all()),
    )
}

#[test]
fn test_rewind_restores_uncast_timestamp_and_json() {
    let mut store = typed_store();
    let stamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let mut sample = store
        .create(
            "sample",
            [
                ("stamp", AttributeValue::Timestamp(stamp)),
                ("meta", AttributeValue::Json(json!("x"))),
                ("ratio", AttributeValue::Float(3.0)),
            ],
        )
        .unwrap();
    let engine = create_default_engine::<Record>();
    let snapshot = engine
        .take_snapshot(&mut store, &sample, AttributeMap::new())
        .unwrap()
        .unwrap();
    sample = edit(
        &mut store,
        &sample,
        &[
            ("stamp", AttributeValue::Null),
            ("meta", AttributeValue::Json(json!(5))),
            ("ratio", AttributeValue::Float(0.5)),
        ],
    );

    engine.rewind(&mut store, &mut sample, &snapshot).unwrap().unwrap();

    let reloaded = reload(&store, &sample);
    assert_eq!(reloaded.value("stamp"), AttributeValue::Timestamp(stamp));
    assert_eq!(reloaded.value("meta"), AttributeValue::Json(json!("x")));
    assert_eq!(reloaded.value("ratio"), AttributeValue::Float(3.0));
    assert_eq!(sample, reloaded);
}

#[test]
fn test_randomized_round_trip() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let mut store = typed_store();
    let engine = create_default_engine::<Record>();

    for _ in 0..50 {
        let len = rng.gen_range(0..24);
        let title: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        let published = Utc
            .timestamp_opt(rng.gen_range(0..4_102_444_800), 0)
            .single()
            .unwrap();
        let stamp = Utc
            .timestamp_opt(
                rng.gen_range(0..4_102_444_800),
                rng.gen_range(0..1000u32) * 1_000_000,
            )
            .single()
            .unwrap();
        let meta = match rng.gen_range(0..4) {
            0 => json!(title.clone()),
            1 => json!(rng.gen_range(-100i64..100)),
            2 => json!({ "len": len, "tags": [title.clone(), "rewind"] }),
            _ => json!([rng.gen_bool(0.5), 1.5]),
        };
        let original = store
            .create(
                "sample",
                [
                    ("title", AttributeValue::from(title)),
                    ("body", AttributeValue::from(rng.gen_bool(0.5))),
                    ("stamp", AttributeValue::Timestamp(stamp)),
                    ("meta", AttributeValue::Json(meta)),
                    ("ratio", AttributeValue::Float(rng.gen_range(-1000i64..1000) as f64)),
                    ("published_at", AttributeValue::from(published)),
                    ("views", AttributeValue::from(rng.gen_range(-1_000_000i64..1_000_000))),
                    ("score", AttributeValue::from(rng.gen_range(-4_000_000i64..4_000_000) as f64 / 4.0)),
                ],
            )
            .unwrap();

        let collected = engine
            .collect_snapshot_attributes(&store, &original, AttributeMap::new())
            .unwrap();
        let decoded = engine
            .codec()
            .decode(&engine.codec().encode(&collected).unwrap())
            .unwrap();
        for attribute in &decoded {
            let live = engine.codec().materialize(attribute, attribute.cast()).unwrap();
            assert_eq!(Some(&live), original.get_attribute(attribute.name()));
        }

        let snapshot = engine
            .take_snapshot(&mut store, &original, AttributeMap::new())
            .unwrap()
            .unwrap();
        let cleared: Vec<(&str, AttributeValue)> = decoded
            .names()
            .map(|name| (name, AttributeValue::Null))
            .collect();
        let mut current = edit(&mut store, &original, &cleared);

        engine.rewind(&mut store, &mut current, &snapshot).unwrap().unwrap();

        assert_eq!(current, original);
        assert_eq!(reload(&store, &original), original);
    }
}

#[test]
fn test_parallel_collection() {
    let mut store = blog_store();
    let posts: Vec<Record> = (0..32)
        .map(|i| {
            store
                .create("post", [("title", format!("post {i}"))])
                .unwrap()
        })
        .collect();
    let engine = create_default_engine::<Record>();

    let batch = engine.collect_batch(&store, &posts);
    assert!(batch.iter().all(Result::is_ok));

    let titles: Vec<AttributeValue> = posts
        .par_iter()
        .map(|post| {
            engine
                .collect_snapshot_attributes(&store, post, AttributeMap::new())
                .unwrap()
                .get("title")
                .unwrap()
                .value()
                .clone()
        })
        .collect();
    for (i, title) in titles.into_iter().enumerate() {
        assert_eq!(title, AttributeValue::from(format!("post {i}")));
    }
}

#[test]
fn test_extra_attributes_with_casts_and_paths() {
    let mut store = blog_store();
    let (mut post, _, _) = seeded_post(&mut store);
    let engine = create_default_engine::<Record>();
    let extra = AttributeMap::new()
        .with_attribute(VirtualAttribute::plain("title", "from extras").with_cast("stringable"))
        .with("reason", "manual");

    let snapshot = engine
        .take_snapshot(&mut store, &post, extra)
        .unwrap()
        .unwrap();
    assert_eq!(
        snapshot.get("reason", engine.codec()).unwrap(),
        Some(AttributeValue::from("manual"))
    );

    engine.rewind_to(&mut store, &mut post, &snapshot, true).unwrap();
    assert_eq!(post.value("title"), AttributeValue::from("from extras"));
}

#[test]
fn test_pretty_storage_rewinds() {
    let mut store = blog_store();
    let (mut post, _, _) = seeded_post(&mut store);
    let engine = create_engine_from_config::<Record>(
        SnapshotConfig::default().with_pretty_storage(true),
    )
    .unwrap();

    let snapshot = engine
        .take_snapshot(&mut store, &post, AttributeMap::new())
        .unwrap()
        .unwrap();
    assert!(snapshot.storage.contains('\n'));

    post = edit(&mut store, &post, &[("title", "edited".into())]);
    engine.rewind_to(&mut store, &mut post, &snapshot, true).unwrap();
    assert_eq!(post.value("title"), AttributeValue::from("notes"));
}
