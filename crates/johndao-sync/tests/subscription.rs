use johndao_sync::{
    doc_store, DocumentListener, DocumentRef, DocumentSnapshot, DocumentStore,
    ListenerRegistration, MemoryStore, Observable, Query, QueryListener, StoreError,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

// ── Scripted store ──

/// A store whose listeners only hear what the test pushes.
#[derive(Default)]
struct ScriptedStore {
    listener: Mutex<Option<Arc<dyn Fn(DocumentSnapshot) + Send + Sync>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedStore {
    fn push(&self, doc: &DocumentRef, data: Option<Value>) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(DocumentSnapshot {
                reference: doc.clone(),
                data,
            });
        }
    }
}

impl DocumentStore for ScriptedStore {
    fn get(&self, _doc: &DocumentRef) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    fn set(&self, _doc: &DocumentRef, _data: Value) -> Result<(), StoreError> {
        Err(StoreError::Backend("read only".to_string()))
    }

    fn update(&self, _doc: &DocumentRef, _fields: Value) -> Result<(), StoreError> {
        Err(StoreError::Backend("read only".to_string()))
    }

    fn delete(&self, _doc: &DocumentRef) -> Result<(), StoreError> {
        Err(StoreError::Backend("read only".to_string()))
    }

    fn query(&self, _query: &Query) -> Result<Vec<(DocumentRef, Value)>, StoreError> {
        Ok(Vec::new())
    }

    fn listen_document(
        &self,
        _doc: &DocumentRef,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.listener.lock().unwrap() = Some(Arc::from(listener));
        let released = self.released.clone();
        Ok(ListenerRegistration::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn listen_collection(
        &self,
        _query: &Query,
        _listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        Err(StoreError::Backend("not supported".to_string()))
    }
}

fn counter_doc() -> DocumentRef {
    DocumentRef::new("counters/main").unwrap()
}

// ── Snapshot properties ──

proptest! {
    #[test]
    fn value_tracks_latest_snapshot(
        initial in proptest::option::of(0i64..1000),
        snapshots in proptest::collection::vec(proptest::option::of(0i64..1000), 0..16),
    ) {
        let scripted = Arc::new(ScriptedStore::default());
        let store: Arc<dyn DocumentStore> = scripted.clone();
        let cell = doc_store::<Value>(Some(store), counter_doc(), initial.map(|n| json!({ "n": n })));
        let _sub = cell.subscribe(|_| {});

        prop_assert_eq!(cell.get(), initial.map(|n| json!({ "n": n })));

        for snapshot in &snapshots {
            scripted.push(&counter_doc(), snapshot.map(|n| json!({ "n": n })));
            prop_assert_eq!(cell.get(), snapshot.map(|n| json!({ "n": n })));
        }
    }
}

#[test]
fn deleted_document_reads_as_none() {
    let memory = Arc::new(MemoryStore::new());
    memory.set(&counter_doc(), json!({ "n": 1 })).unwrap();
    let store: Arc<dyn DocumentStore> = memory.clone();
    let cell = doc_store::<Value>(Some(store), "counters/main", None);
    let _sub = cell.subscribe(|_| {});

    assert_eq!(cell.get(), Some(json!({ "n": 1 })));
    memory.delete(&counter_doc()).unwrap();
    assert_eq!(cell.get(), None);
}

// ── Lifecycle ──

#[test]
fn listener_opened_once_and_released_once() {
    let scripted = Arc::new(ScriptedStore::default());
    let store: Arc<dyn DocumentStore> = scripted.clone();
    let cell = doc_store::<Value>(Some(store), counter_doc(), None);

    let a = cell.subscribe(|_| {});
    let b = cell.subscribe(|_| {});
    assert_eq!(scripted.opened.load(Ordering::SeqCst), 1);

    drop(a);
    assert_eq!(scripted.released.load(Ordering::SeqCst), 0);
    b.unsubscribe();
    assert_eq!(scripted.released.load(Ordering::SeqCst), 1);
}

#[test]
fn resubscribe_without_change_sees_same_value() {
    let memory = Arc::new(MemoryStore::new());
    memory
        .set(&counter_doc(), json!({ "n": 7, "label": "seven" }))
        .unwrap();
    let store: Arc<dyn DocumentStore> = memory.clone();
    let cell = doc_store::<Value>(Some(store), counter_doc(), None);

    let first = {
        let _sub = cell.subscribe(|_| {});
        cell.get()
    };
    assert_eq!(memory.listener_count(), 0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = cell.subscribe(move |v: &Option<Value>| sink.lock().unwrap().push(v.clone()));

    assert_eq!(cell.get(), first);
    assert_eq!(*seen.lock().unwrap(), vec![first]);
}

#[test]
fn subscribers_see_changes_in_order() {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn DocumentStore> = memory.clone();
    let cell = doc_store::<Value>(Some(store), counter_doc(), None);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = cell.subscribe(move |v: &Option<Value>| {
        sink.lock().unwrap().push(v.as_ref().and_then(|d| d["n"].as_i64()));
    });

    for n in 1..=3 {
        memory.set(&counter_doc(), json!({ "n": n })).unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec![None, Some(1), Some(2), Some(3)]);
}

#[test]
fn concurrent_writers_leave_cell_on_latest_value() {
    let memory = Arc::new(MemoryStore::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);

    // Registered ahead of the cell, so each write reaches it first.
    let _slow = memory
        .listen_document(
            &counter_doc(),
            Box::new(move |snap: DocumentSnapshot| {
                if snap.data == Some(json!({ "n": 1 })) {
                    entered_tx.lock().unwrap().send(()).unwrap();
                    release_rx.lock().unwrap().recv().unwrap();
                }
            }),
        )
        .unwrap();

    let store: Arc<dyn DocumentStore> = memory.clone();
    let cell = doc_store::<Value>(Some(store), counter_doc(), None);
    let _sub = cell.subscribe(|_| {});

    let first = {
        let memory = memory.clone();
        thread::spawn(move || memory.set(&counter_doc(), json!({ "n": 1 })).unwrap())
    };
    entered_rx.recv().unwrap();
    memory.set(&counter_doc(), json!({ "n": 2 })).unwrap();
    release_tx.send(()).unwrap();
    first.join().unwrap();

    assert_eq!(memory.get(&counter_doc()).unwrap(), Some(json!({ "n": 2 })));
    assert_eq!(cell.get(), Some(json!({ "n": 2 })));
}
