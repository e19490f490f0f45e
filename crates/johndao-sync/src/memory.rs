//! In-process [`DocumentStore`].
//!
//! Used by tests and by clients that run without a backing database. A
//! write made outside any listener callback is delivered to every affected
//! listener before `set` returns, unless a concurrent writer is already
//! delivering to that listener, in which case that writer delivers it.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::store::{
    merge_fields, CollectionRef, DocumentListener, DocumentRef, DocumentSnapshot, DocumentStore,
    ListenerRegistration, ListenerRegistry, Query, QueryListener, QuerySnapshot,
    SharedDocumentListener, SharedQueryListener,
};

#[derive(Default)]
struct Docs {
    map: BTreeMap<DocumentRef, Value>,
    /// Bumped on every write.
    version: u64,
}

impl Docs {
    fn collection(&self, collection: &CollectionRef) -> Vec<(DocumentRef, Value)> {
        self.map
            .iter()
            .filter(|(doc, _)| doc.parent() == *collection)
            .map(|(doc, data)| (doc.clone(), data.clone()))
            .collect()
    }
}

/// Snapshots captured by one write, ready for delivery.
struct Pending {
    version: u64,
    documents: Vec<(SharedDocumentListener, DocumentSnapshot)>,
    queries: Vec<(SharedQueryListener, QuerySnapshot)>,
}

impl Pending {
    fn deliver(self) {
        for (listener, snapshot) in self.documents {
            listener.deliver(self.version, snapshot);
        }
        for (listener, snapshot) in self.queries {
            listener.deliver(self.version, snapshot);
        }
    }
}

/// A document store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<Docs>,
    listeners: ListenerRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Docs> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live listeners across documents and queries.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Applies `write` to `doc` and captures snapshots for every affected
    /// listener under the same lock. `write` returns whether anything
    /// changed.
    fn commit(
        &self,
        doc: &DocumentRef,
        write: impl FnOnce(&mut BTreeMap<DocumentRef, Value>) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let pending = {
            let mut docs = self.lock();
            if !write(&mut docs.map)? {
                return Ok(());
            }
            docs.version += 1;

            let collection = doc.parent();
            let doc_listeners = self.listeners.document_listeners(doc);
            let query_listeners = self.listeners.query_listeners(&collection);
            let data = docs.map.get(doc).cloned();
            let in_collection = if query_listeners.is_empty() {
                Vec::new()
            } else {
                docs.collection(&collection)
            };

            Pending {
                version: docs.version,
                documents: doc_listeners
                    .into_iter()
                    .map(|listener| {
                        let snapshot = DocumentSnapshot {
                            reference: doc.clone(),
                            data: data.clone(),
                        };
                        (listener, snapshot)
                    })
                    .collect(),
                queries: query_listeners
                    .into_iter()
                    .map(|(query, listener)| {
                        let snapshot = QuerySnapshot {
                            docs: query.apply(in_collection.clone()),
                        };
                        (listener, snapshot)
                    })
                    .collect(),
            }
        };
        pending.deliver();
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, doc: &DocumentRef) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().map.get(doc).cloned())
    }

    fn set(&self, doc: &DocumentRef, data: Value) -> Result<(), StoreError> {
        if !data.is_object() {
            return Err(StoreError::NotAnObject);
        }
        self.commit(doc, |map| {
            map.insert(doc.clone(), data);
            Ok(true)
        })
    }

    fn update(&self, doc: &DocumentRef, fields: Value) -> Result<(), StoreError> {
        self.commit(doc, |map| {
            let existing = map
                .get_mut(doc)
                .ok_or_else(|| StoreError::NotFound(doc.path().to_string()))?;
            merge_fields(existing, fields)?;
            Ok(true)
        })
    }

    fn delete(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        self.commit(doc, |map| Ok(map.remove(doc).is_some()))
    }

    fn query(&self, query: &Query) -> Result<Vec<(DocumentRef, Value)>, StoreError> {
        let docs = self.lock();
        Ok(query.apply(docs.collection(query.collection())))
    }

    fn listen_document(
        &self,
        doc: &DocumentRef,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        let (listener, registration) = self.listeners.add_document(doc, listener);
        let (version, data) = {
            let docs = self.lock();
            (docs.version, docs.map.get(doc).cloned())
        };
        listener.deliver(
            version,
            DocumentSnapshot {
                reference: doc.clone(),
                data,
            },
        );
        Ok(registration)
    }

    fn listen_collection(
        &self,
        query: &Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        let (listener, registration) = self.listeners.add_query(query, listener);
        let (version, docs) = {
            let docs = self.lock();
            (docs.version, query.apply(docs.collection(query.collection())))
        };
        listener.deliver(version, QuerySnapshot { docs });
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn users() -> CollectionRef {
        CollectionRef::new("users").unwrap()
    }

    #[test]
    fn set_get_update_delete() {
        let store = MemoryStore::new();
        let doc = users().doc("u1").unwrap();

        store.set(&doc, json!({ "name": "a" })).unwrap();
        store.update(&doc, json!({ "karma": 2 })).unwrap();
        assert_eq!(
            store.get(&doc).unwrap(),
            Some(json!({ "name": "a", "karma": 2 }))
        );

        store.delete(&doc).unwrap();
        assert_eq!(store.get(&doc).unwrap(), None);
        assert!(matches!(
            store.update(&doc, json!({ "karma": 3 })),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn set_rejects_non_objects() {
        let store = MemoryStore::new();
        let doc = users().doc("u1").unwrap();
        assert!(matches!(store.set(&doc, json!(5)), Err(StoreError::NotAnObject)));
    }

    #[test]
    fn document_listener_gets_initial_and_later_snapshots() {
        let store = MemoryStore::new();
        let doc = users().doc("u1").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let registration = store
            .listen_document(
                &doc,
                Box::new(move |snap: DocumentSnapshot| sink.lock().unwrap().push(snap.data)),
            )
            .unwrap();
        store.set(&doc, json!({ "n": 1 })).unwrap();
        store.delete(&doc).unwrap();
        drop(registration);
        store.set(&doc, json!({ "n": 2 })).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some(json!({ "n": 1 })), None]
        );
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn query_listener_tracks_matching_documents() {
        let store = MemoryStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let query = Query::new(users()).where_eq("creating_user", true);

        let _registration = store
            .listen_collection(
                &query,
                Box::new(move |snap: QuerySnapshot| {
                    let ids: Vec<String> =
                        snap.docs.iter().map(|(r, _)| r.id().to_string()).collect();
                    sink.lock().unwrap().push(ids);
                }),
            )
            .unwrap();

        store
            .set(&users().doc("a").unwrap(), json!({ "creating_user": true }))
            .unwrap();
        store
            .set(&users().doc("b").unwrap(), json!({ "creating_user": false }))
            .unwrap();
        store
            .update(&users().doc("a").unwrap(), json!({ "creating_user": false }))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Vec::<String>::new());
        assert_eq!(seen[1], vec!["a".to_string()]);
        assert_eq!(seen.last().unwrap(), &Vec::<String>::new());
    }

    #[test]
    fn writes_to_other_collections_do_not_notify() {
        let store = MemoryStore::new();
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let _registration = store
            .listen_collection(
                &Query::new(users()),
                Box::new(move |_| *sink.lock().unwrap() += 1),
            )
            .unwrap();

        let other = CollectionRef::new("backups").unwrap().doc("state").unwrap();
        store.set(&other, json!({ "t": 1 })).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
