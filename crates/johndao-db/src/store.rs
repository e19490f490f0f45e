//! SQLite-backed [`DocumentStore`].
//!
//! Every document is one row of the `documents` table holding its JSON
//! text. Listeners are kept in process: writes made through this store are
//! pushed to them after the write commits. Writes made by another process
//! sharing the file are seen by reads but not pushed.

use johndao_sync::{
    merge_fields, CollectionRef, DocumentListener, DocumentRef, DocumentSnapshot, DocumentStore,
    ListenerRegistration, ListenerRegistry, Query, QueryListener, QuerySnapshot,
    SharedDocumentListener, SharedQueryListener, StoreError,
};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DbError;
use crate::pool::DbPool;

/// Snapshots read right after one write, ready for delivery.
#[derive(Default)]
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

/// Document store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
    listeners: ListenerRegistry,
    /// Version of the last write made through this store. Held across each
    /// write and the snapshot reads that follow it.
    version: Arc<Mutex<u64>>,
}

impl SqliteDocumentStore {
    /// Wraps a pool whose schema is already migrated.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            listeners: ListenerRegistry::new(),
            version: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn lock_version(&self) -> MutexGuard<'_, u64> {
        self.version.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, doc: &DocumentRef) -> Result<Option<Value>, DbError> {
        let conn = self.pool.get()?;
        let text: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE path = ?1",
                [doc.path()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
    }

    fn write(&self, doc: &DocumentRef, data: &Value) -> Result<(), DbError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO documents (path, collection, doc_id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![doc.path(), doc.parent().path(), doc.id(), data.to_string()],
        )?;
        Ok(())
    }

    fn merge(&self, doc: &DocumentRef, fields: Value) -> Result<(), StoreError> {
        let mut conn = self.pool.get().map_err(DbError::from)?;
        let tx = conn.transaction().map_err(DbError::from)?;
        let text: Option<String> = tx
            .query_row(
                "SELECT data FROM documents WHERE path = ?1",
                [doc.path()],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)?;
        let Some(text) = text else {
            return Err(StoreError::NotFound(doc.path().to_string()));
        };

        let mut data: Value = serde_json::from_str(&text)?;
        merge_fields(&mut data, fields)?;
        tx.execute(
            "UPDATE documents SET data = ?2, updated_at = datetime('now') WHERE path = ?1",
            params![doc.path(), data.to_string()],
        )
        .map_err(DbError::from)?;
        tx.commit().map_err(DbError::from)?;
        Ok(())
    }

    fn remove(&self, doc: &DocumentRef) -> Result<bool, DbError> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM documents WHERE path = ?1", [doc.path()])?;
        Ok(removed > 0)
    }

    fn read_collection(&self, collection: &CollectionRef) -> Result<Vec<(DocumentRef, Value)>, DbError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT doc_id, data FROM documents WHERE collection = ?1 ORDER BY doc_id")?;
        let rows = stmt
            .query_map([collection.path()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::with_capacity(rows.len());
        for (id, text) in rows {
            let Ok(reference) = collection.doc(&id) else {
                tracing::warn!(collection = %collection, id = %id, "skipping row with invalid id");
                continue;
            };
            docs.push((reference, serde_json::from_str(&text)?));
        }
        Ok(docs)
    }

    /// Runs `write` on `doc` and, if it changed anything, reads snapshots
    /// for every affected listener before any other write can commit.
    fn commit(
        &self,
        doc: &DocumentRef,
        write: impl FnOnce() -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let pending = {
            let mut version = self.lock_version();
            if !write()? {
                return Ok(());
            }
            *version += 1;
            self.snapshots(doc, *version)
        };
        pending.deliver();
        Ok(())
    }

    fn snapshots(&self, doc: &DocumentRef, version: u64) -> Pending {
        let collection = doc.parent();
        let doc_listeners = self.listeners.document_listeners(doc);
        let query_listeners = self.listeners.query_listeners(&collection);
        let mut pending = Pending {
            version,
            ..Pending::default()
        };

        if !doc_listeners.is_empty() {
            match self.read(doc) {
                Ok(data) => {
                    pending.documents = doc_listeners
                        .into_iter()
                        .map(|listener| {
                            let snapshot = DocumentSnapshot {
                                reference: doc.clone(),
                                data: data.clone(),
                            };
                            (listener, snapshot)
                        })
                        .collect();
                }
                Err(e) => tracing::warn!(path = %doc, error = %e, "failed to read document for listeners"),
            }
        }

        if !query_listeners.is_empty() {
            match self.read_collection(&collection) {
                Ok(docs) => {
                    pending.queries = query_listeners
                        .into_iter()
                        .map(|(query, listener)| {
                            let snapshot = QuerySnapshot {
                                docs: query.apply(docs.clone()),
                            };
                            (listener, snapshot)
                        })
                        .collect();
                }
                Err(e) => tracing::warn!(collection = %collection, error = %e, "failed to read collection for listeners"),
            }
        }
        pending
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, doc: &DocumentRef) -> Result<Option<Value>, StoreError> {
        Ok(self.read(doc)?)
    }

    fn set(&self, doc: &DocumentRef, data: Value) -> Result<(), StoreError> {
        if !data.is_object() {
            return Err(StoreError::NotAnObject);
        }
        self.commit(doc, || {
            self.write(doc, &data)?;
            Ok(true)
        })
    }

    fn update(&self, doc: &DocumentRef, fields: Value) -> Result<(), StoreError> {
        self.commit(doc, || {
            self.merge(doc, fields)?;
            Ok(true)
        })
    }

    fn delete(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        self.commit(doc, || Ok(self.remove(doc)?))
    }

    fn query(&self, query: &Query) -> Result<Vec<(DocumentRef, Value)>, StoreError> {
        Ok(query.apply(self.read_collection(query.collection())?))
    }

    fn listen_document(
        &self,
        doc: &DocumentRef,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        let (listener, registration) = self.listeners.add_document(doc, listener);
        let (version, data) = {
            let version = self.lock_version();
            (*version, self.read(doc)?)
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
            let version = self.lock_version();
            (*version, DocumentStore::query(self, query)?)
        };
        listener.deliver(version, QuerySnapshot { docs });
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, DbRuntimeSettings};
    use serde_json::json;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;

    fn store() -> (tempfile::TempDir, SqliteDocumentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");
        let pool = create_pool(path.to_str().expect("utf-8"), DbRuntimeSettings::default())
            .expect("pool");
        run_migrations(&pool.get().expect("conn")).expect("migrations");
        (dir, SqliteDocumentStore::new(pool))
    }

    #[test]
    fn round_trips_documents() {
        let (_dir, store) = store();
        let doc = DocumentRef::new("users/u1").unwrap();

        assert_eq!(store.get(&doc).unwrap(), None);
        store.set(&doc, json!({ "name": "a", "karma": 1 })).unwrap();
        store.update(&doc, json!({ "karma": 2 })).unwrap();
        assert_eq!(
            store.get(&doc).unwrap(),
            Some(json!({ "name": "a", "karma": 2 }))
        );

        store.delete(&doc).unwrap();
        assert_eq!(store.get(&doc).unwrap(), None);
    }

    #[test]
    fn update_missing_document_is_not_found() {
        let (_dir, store) = store();
        let doc = DocumentRef::new("users/ghost").unwrap();
        assert!(matches!(
            store.update(&doc, json!({ "a": 1 })),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn query_reads_only_its_collection() {
        let (_dir, store) = store();
        let users = CollectionRef::new("users").unwrap();
        store.set(&users.doc("b").unwrap(), json!({ "canister_user_id": 2 })).unwrap();
        store.set(&users.doc("a").unwrap(), json!({ "canister_user_id": 1 })).unwrap();
        store
            .set(&DocumentRef::new("backups/state").unwrap(), json!({ "t": 0 }))
            .unwrap();

        let all = store.query(&Query::new(users.clone())).unwrap();
        let ids: Vec<&str> = all.iter().map(|(r, _)| r.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let one = store
            .query(&Query::new(users).where_eq("canister_user_id", 2))
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].0.id(), "b");
    }

    #[test]
    fn listeners_receive_committed_writes() {
        let (_dir, store) = store();
        let doc = DocumentRef::new("users/u1").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let registration = store
            .listen_document(&doc, Box::new(move |snap: DocumentSnapshot| sink.lock().unwrap().push(snap.data)))
            .unwrap();
        store.set(&doc, json!({ "n": 1 })).unwrap();
        registration.remove();
        store.set(&doc, json!({ "n": 2 })).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(json!({ "n": 1 }))]);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn concurrent_writes_reach_listeners_in_commit_order() {
        let (_dir, store) = store();
        let doc = DocumentRef::new("users/u1").unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        let _slow = store
            .listen_document(
                &doc,
                Box::new(move |snap: DocumentSnapshot| {
                    if snap.data == Some(json!({ "n": 1 })) {
                        entered_tx.lock().unwrap().send(()).unwrap();
                        release_rx.lock().unwrap().recv().unwrap();
                    }
                }),
            )
            .unwrap();
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        let _latest = store
            .listen_document(
                &doc,
                Box::new(move |snap: DocumentSnapshot| *sink.lock().unwrap() = snap.data),
            )
            .unwrap();

        let first = {
            let (store, doc) = (store.clone(), doc.clone());
            thread::spawn(move || store.set(&doc, json!({ "n": 1 })).unwrap())
        };
        entered_rx.recv().unwrap();
        store.set(&doc, json!({ "n": 2 })).unwrap();
        release_tx.send(()).unwrap();
        first.join().unwrap();

        assert_eq!(*last.lock().unwrap(), Some(json!({ "n": 2 })));
    }

    #[test]
    fn listener_opened_during_writes_ends_on_committed_state() {
        let (_dir, store) = store();
        let users = CollectionRef::new("users").unwrap();
        let query = Query::new(users.clone()).where_eq("creating_user", true);

        let writer = {
            let (store, users) = (store.clone(), users.clone());
            thread::spawn(move || {
                for i in 0..50 {
                    let doc = users.doc(&format!("u{i}")).unwrap();
                    store.set(&doc, json!({ "creating_user": true })).unwrap();
                }
            })
        };

        let mut watchers = Vec::new();
        for _ in 0..20 {
            let last = Arc::new(Mutex::new(Vec::new()));
            let sink = last.clone();
            let registration = store
                .listen_collection(
                    &query,
                    Box::new(move |snap: QuerySnapshot| *sink.lock().unwrap() = snap.docs),
                )
                .unwrap();
            watchers.push((last, registration));
        }
        writer.join().unwrap();

        let committed = store.query(&query).unwrap();
        assert_eq!(committed.len(), 50);
        for (last, _registration) in &watchers {
            assert_eq!(*last.lock().unwrap(), committed);
        }
    }
}
