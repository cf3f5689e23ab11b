/*!
Lifecycle observers for snapshot and rewind operations.

Observers are registered per entity type (or for every type) on an
[`ObserverRegistry`]. The `snapshotting` and `rewinding` hooks run before any
work is done and may veto the operation by returning [`Flow::Cancel`]; the
`snapshot_taken` and `rewound` hooks are notifications only.
*/

use crate::entity::Entity;
use crate::record::Snapshot;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Outcome of a cancellable hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Cancel,
}

/// Hooks around snapshot creation and rewinding
///
/// All methods have no-op defaults, implement only the ones you need.
pub trait SnapshotObserver<E>: Send + Sync {
    /// Called before a snapshot of `entity` is collected
    fn snapshotting(&self, _entity: &E) -> Flow {
        Flow::Continue
    }

    /// Called after `snapshot` has been stored
    fn snapshot_taken(&self, _entity: &E, _snapshot: &Snapshot) {}

    /// Called before `entity` is rewound, inside the rewind transaction
    fn rewinding(&self, _entity: &E) -> Flow {
        Flow::Continue
    }

    /// Called after `entity` has been rewound and persisted
    fn rewound(&self, _entity: &E) {}
}

/// Observers keyed by entity type
pub struct ObserverRegistry<E> {
    by_type: HashMap<String, Vec<Arc<dyn SnapshotObserver<E>>>>,
    global: Vec<Arc<dyn SnapshotObserver<E>>>,
}

impl<E: Entity> ObserverRegistry<E> {
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            global: Vec::new(),
        }
    }

    /// Observe entities of one type
    pub fn observe<S, O>(&mut self, entity_type: S, observer: O) -> &mut Self
    where
        S: Into<String>,
        O: SnapshotObserver<E> + 'static,
    {
        self.by_type
            .entry(entity_type.into())
            .or_default()
            .push(Arc::new(observer));
        self
    }

    /// Observe entities of every type
    pub fn observe_all<O>(&mut self, observer: O) -> &mut Self
    where
        O: SnapshotObserver<E> + 'static,
    {
        self.global.push(Arc::new(observer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_type.values().all(Vec::is_empty)
    }

    /// Run `snapshotting` hooks, stopping at the first veto
    pub fn before_snapshot(&self, entity: &E) -> Flow {
        self.until_cancelled(entity, "snapshotting", |observer| observer.snapshotting(entity))
    }

    pub fn after_snapshot(&self, entity: &E, snapshot: &Snapshot) {
        for observer in self.observers_for(entity) {
            observer.snapshot_taken(entity, snapshot);
        }
    }

    /// Run `rewinding` hooks, stopping at the first veto
    pub fn before_rewind(&self, entity: &E) -> Flow {
        self.until_cancelled(entity, "rewinding", |observer| observer.rewinding(entity))
    }

    pub fn after_rewind(&self, entity: &E) {
        for observer in self.observers_for(entity) {
            observer.rewound(entity);
        }
    }

    fn until_cancelled<F>(&self, entity: &E, hook: &str, mut f: F) -> Flow
    where
        F: FnMut(&dyn SnapshotObserver<E>) -> Flow,
    {
        for observer in self.observers_for(entity) {
            if f(observer.as_ref()) == Flow::Cancel {
                info!("{} of {} cancelled by observer", hook, entity.origin());
                return Flow::Cancel;
            }
        }
        Flow::Continue
    }

    fn observers_for<'a>(
        &'a self,
        entity: &E,
    ) -> impl Iterator<Item = &'a Arc<dyn SnapshotObserver<E>>> + 'a {
        let typed = self
            .by_type
            .get(entity.entity_type())
            .map(Vec::as_slice)
            .unwrap_or_default();
        typed.iter().chain(self.global.iter())
    }
}

impl<E: Entity> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntitySchema, EntityStore, MemoryStore, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotObserver<Record> for Counter {
        fn rewinding(&self, _entity: &Record) -> Flow {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        }
    }

    struct Veto;

    impl SnapshotObserver<Record> for Veto {
        fn rewinding(&self, _entity: &Record) -> Flow {
            Flow::Cancel
        }
    }

    fn record(entity_type: &str) -> Record {
        let mut store = MemoryStore::new()
            .with_schema(EntitySchema::new("post").attributes(["title"]))
            .with_schema(EntitySchema::new("user").attributes(["name"]));
        let record = store.create(entity_type, std::iter::empty::<(&str, &str)>()).unwrap();
        store.find(&record.origin()).unwrap().unwrap()
    }

    #[test]
    fn test_observers_are_keyed_by_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ObserverRegistry::new();
        registry.observe(
            "post",
            Counter {
                calls: Arc::clone(&calls),
            },
        );

        assert_eq!(registry.before_rewind(&record("post")), Flow::Continue);
        assert_eq!(registry.before_rewind(&record("user")), Flow::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_veto_stops_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ObserverRegistry::new();
        registry.observe("post", Veto).observe_all(Counter {
            calls: Arc::clone(&calls),
        });

        assert_eq!(registry.before_rewind(&record("post")), Flow::Cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.before_rewind(&record("user")), Flow::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_hooks_continue() {
        struct Silent;
        impl SnapshotObserver<Record> for Silent {}

        let mut registry = ObserverRegistry::new();
        assert!(registry.is_empty());
        registry.observe_all(Silent);
        assert!(!registry.is_empty());
        assert_eq!(registry.before_snapshot(&record("post")), Flow::Continue);
    }
}
