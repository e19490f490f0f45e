//! The document-store contract consumed by the subscription primitives.
//!
//! Documents are JSON objects addressed by slash-separated paths with an
//! even number of segments (`users/abc`). Collections have an odd number of
//! segments (`users`). Queries select documents of one collection by field
//! equality, with optional ordering and limit.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// Reference to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Parses a document path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is empty, has an empty
    /// segment, or has an odd number of segments.
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let segments = segment_count(&path)?;
        if segments % 2 != 0 {
            return Err(StoreError::InvalidPath(path));
        }
        Ok(Self { path })
    }

    /// Full slash-separated path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionRef {
        let parent = self
            .path
            .rsplit_once('/')
            .map(|(parent, _)| parent)
            .unwrap_or_default();
        CollectionRef {
            path: parent.to_string(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Reference to a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    /// Parses a collection path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is empty, has an empty
    /// segment, or has an even number of segments.
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let segments = segment_count(&path)?;
        if segments % 2 != 1 {
            return Err(StoreError::InvalidPath(path));
        }
        Ok(Self { path })
    }

    /// Full slash-separated path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reference to the document `id` in this collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `id` is empty or contains `/`.
    pub fn doc(&self, id: &str) -> Result<DocumentRef, StoreError> {
        if id.is_empty() || id.contains('/') {
            return Err(StoreError::InvalidPath(format!("{}/{}", self.path, id)));
        }
        Ok(DocumentRef {
            path: format!("{}/{}", self.path, id),
        })
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

fn segment_count(path: &str) -> Result<usize, StoreError> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path.split('/').count())
}

/// Sort direction for [`Query::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A query over one collection.
///
/// Without an explicit ordering, results come back ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionRef,
    filters: Vec<(String, Value)>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    /// Selects every document of `collection`.
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Keeps documents whose top-level `field` equals `value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Orders results by a top-level field.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The queried collection.
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Returns true if `doc` (a document of this collection) passes every filter.
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// Filters, orders, and limits the documents of this query's collection.
    ///
    /// `docs` must already be ordered by document id.
    pub fn apply(&self, docs: Vec<(DocumentRef, Value)>) -> Vec<(DocumentRef, Value)> {
        let mut selected: Vec<(DocumentRef, Value)> = docs
            .into_iter()
            .filter(|(_, data)| self.matches(data))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            // Stable sort keeps id order among equal keys.
            selected.sort_by(|(_, x), (_, y)| {
                let ord = compare_values(x.get(field), y.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

impl From<CollectionRef> for Query {
    fn from(collection: CollectionRef) -> Self {
        Self::new(collection)
    }
}

/// Orders JSON values: missing < null < bool < number < string < other.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// State of one document as observed by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub reference: DocumentRef,
    /// `None` when the document does not exist.
    pub data: Option<Value>,
}

/// Result set of a query as observed by a listener.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySnapshot {
    pub docs: Vec<(DocumentRef, Value)>,
}

/// Callback receiving document snapshots.
pub type DocumentListener = Box<dyn Fn(DocumentSnapshot) + Send + Sync>;

/// Callback receiving query snapshots.
pub type QueryListener = Box<dyn Fn(QuerySnapshot) + Send + Sync>;

/// Handle for a live listener. The listener is removed exactly once, on
/// [`ListenerRegistration::remove`] or on drop.
#[must_use = "dropping a ListenerRegistration removes the listener"]
pub struct ListenerRegistration {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    /// Wraps a removal action.
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the listener now.
    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// A realtime document store.
///
/// Listeners receive an initial snapshot when registered and a fresh one
/// after every write that affects them, in write order.
pub trait DocumentStore: Send + Sync {
    /// Reads one document.
    fn get(&self, doc: &DocumentRef) -> Result<Option<Value>, StoreError>;

    /// Creates or replaces a document.
    fn set(&self, doc: &DocumentRef, data: Value) -> Result<(), StoreError>;

    /// Merges top-level fields into an existing document.
    ///
    /// Returns [`StoreError::NotFound`] if the document does not exist.
    fn update(&self, doc: &DocumentRef, fields: Value) -> Result<(), StoreError>;

    /// Deletes a document. Deleting a missing document is not an error.
    fn delete(&self, doc: &DocumentRef) -> Result<(), StoreError>;

    /// Runs a query once.
    fn query(&self, query: &Query) -> Result<Vec<(DocumentRef, Value)>, StoreError>;

    /// Streams snapshots of one document until the registration is removed.
    fn listen_document(
        &self,
        doc: &DocumentRef,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError>;

    /// Streams snapshots of a query until the registration is removed.
    fn listen_collection(
        &self,
        query: &Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError>;
}

/// Merges the top-level fields of `fields` into `target`.
///
/// # Errors
///
/// Returns [`StoreError::NotAnObject`] if either value is not a JSON object.
pub fn merge_fields(target: &mut Value, fields: Value) -> Result<(), StoreError> {
    let Value::Object(fields) = fields else {
        return Err(StoreError::NotAnObject);
    };
    let Some(target) = target.as_object_mut() else {
        return Err(StoreError::NotAnObject);
    };
    for (key, value) in fields {
        target.insert(key, value);
    }
    Ok(())
}

struct Delivery<S> {
    latest: Option<u64>,
    pending: VecDeque<S>,
    delivering: bool,
}

/// A registered listener fed snapshots tagged with the store version they
/// were read at.
///
/// Snapshots reach the callback in version order. A snapshot older than
/// one already accepted is dropped. A snapshot arriving while another call
/// is delivering is queued and delivered by that call, so a listener that
/// writes to its own store does not deadlock.
pub struct OrderedListener<S> {
    callback: Box<dyn Fn(S) + Send + Sync>,
    delivery: Mutex<Delivery<S>>,
}

impl<S> OrderedListener<S> {
    fn new(callback: Box<dyn Fn(S) + Send + Sync>) -> Self {
        Self {
            callback,
            delivery: Mutex::new(Delivery {
                latest: None,
                pending: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Delivery<S>> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `snapshot`, read at store version `version`.
    pub fn deliver(&self, version: u64, snapshot: S) {
        {
            let mut delivery = self.lock();
            if delivery.latest.is_some_and(|latest| version < latest) {
                tracing::trace!(version, "dropping superseded snapshot");
                return;
            }
            delivery.latest = Some(version);
            delivery.pending.push_back(snapshot);
            if delivery.delivering {
                return;
            }
            delivery.delivering = true;
        }

        loop {
            let next = {
                let mut delivery = self.lock();
                match delivery.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        delivery.delivering = false;
                        return;
                    }
                }
            };
            (self.callback)(next);
        }
    }
}

/// Shared handle to a document listener.
pub type SharedDocumentListener = Arc<OrderedListener<DocumentSnapshot>>;

/// Shared handle to a query listener.
pub type SharedQueryListener = Arc<OrderedListener<QuerySnapshot>>;

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    documents: BTreeMap<u64, (DocumentRef, SharedDocumentListener)>,
    queries: BTreeMap<u64, (Query, SharedQueryListener)>,
}

/// Bookkeeping for live listeners, shared by store implementations.
///
/// Stores tag every snapshot with a version taken in the same critical
/// section as the write (or read) it reflects, then deliver it through
/// [`OrderedListener::deliver`] after releasing their own locks. Listeners
/// affected by a write must be looked up inside that critical section.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a document listener. Returns its shared handle and the
    /// registration that removes it.
    pub fn add_document(
        &self,
        doc: &DocumentRef,
        listener: DocumentListener,
    ) -> (SharedDocumentListener, ListenerRegistration) {
        let listener = Arc::new(OrderedListener::new(listener));
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.documents.insert(id, (doc.clone(), listener.clone()));
            id
        };
        let registry = self.clone();
        let registration = ListenerRegistration::new(move || {
            registry.lock().documents.remove(&id);
            tracing::debug!(listener_id = id, "document listener removed");
        });
        (listener, registration)
    }

    /// Registers a query listener.
    pub fn add_query(
        &self,
        query: &Query,
        listener: QueryListener,
    ) -> (SharedQueryListener, ListenerRegistration) {
        let listener = Arc::new(OrderedListener::new(listener));
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.queries.insert(id, (query.clone(), listener.clone()));
            id
        };
        let registry = self.clone();
        let registration = ListenerRegistration::new(move || {
            registry.lock().queries.remove(&id);
            tracing::debug!(listener_id = id, "query listener removed");
        });
        (listener, registration)
    }

    /// Listeners watching `doc`.
    pub fn document_listeners(&self, doc: &DocumentRef) -> Vec<SharedDocumentListener> {
        self.lock()
            .documents
            .values()
            .filter(|(watched, _)| watched == doc)
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Query listeners over `collection`.
    pub fn query_listeners(&self, collection: &CollectionRef) -> Vec<(Query, SharedQueryListener)> {
        self.lock()
            .queries
            .values()
            .filter(|(query, _)| query.collection() == collection)
            .map(|(query, listener)| (query.clone(), listener.clone()))
            .collect()
    }

    /// Total number of live listeners.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.documents.len() + state.queries.len()
    }

    /// Returns true when no listener is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_paths_need_even_segments() {
        let doc = DocumentRef::new("users/abc").unwrap();
        assert_eq!(doc.id(), "abc");
        assert_eq!(doc.parent().path(), "users");

        assert!(DocumentRef::new("users").is_err());
        assert!(DocumentRef::new("users//abc").is_err());
        assert!(DocumentRef::new("").is_err());
        assert!(CollectionRef::new("users/abc").is_err());
    }

    #[test]
    fn collection_doc_rejects_nested_ids() {
        let users = CollectionRef::new("users").unwrap();
        assert_eq!(users.doc("u1").unwrap().path(), "users/u1");
        assert!(users.doc("a/b").is_err());
        assert!(users.doc("").is_err());
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let users = CollectionRef::new("users").unwrap();
        let docs = vec![
            (users.doc("a").unwrap(), json!({ "karma": 3, "active": true })),
            (users.doc("b").unwrap(), json!({ "karma": 9, "active": true })),
            (users.doc("c").unwrap(), json!({ "karma": 5, "active": false })),
            (users.doc("d").unwrap(), json!({ "karma": 7, "active": true })),
        ];

        let query = Query::new(users)
            .where_eq("active", true)
            .order_by("karma", Direction::Descending)
            .limit(2);
        let ids: Vec<String> = query
            .apply(docs)
            .into_iter()
            .map(|(r, _)| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn merge_fields_overwrites_top_level_keys() {
        let mut doc = json!({ "a": 1, "b": { "x": 1 } });
        merge_fields(&mut doc, json!({ "b": 2, "c": 3 })).unwrap();
        assert_eq!(doc, json!({ "a": 1, "b": 2, "c": 3 }));
        assert!(matches!(
            merge_fields(&mut doc, json!([1])),
            Err(StoreError::NotAnObject)
        ));
    }

    #[test]
    fn registration_removes_listener_once() {
        let registry = ListenerRegistry::new();
        let doc = DocumentRef::new("users/a").unwrap();
        let (_, registration) = registry.add_document(&doc, Box::new(|_| {}));
        assert_eq!(registry.document_listeners(&doc).len(), 1);

        registration.remove();
        assert!(registry.is_empty());
    }

    #[test]
    fn ordered_listener_drops_superseded_snapshots() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = OrderedListener::new(Box::new(move |n: u64| sink.lock().unwrap().push(n)));

        listener.deliver(1, 10);
        listener.deliver(3, 30);
        listener.deliver(2, 20);
        listener.deliver(3, 31);

        assert_eq!(*seen.lock().unwrap(), vec![10, 30, 31]);
    }

    #[test]
    fn ordered_listener_queues_reentrant_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let slot: Arc<Mutex<Option<Arc<OrderedListener<u64>>>>> = Arc::default();
        let inner = slot.clone();

        let listener = Arc::new(OrderedListener::new(Box::new(move |n: u64| {
            sink.lock().unwrap().push(n);
            if n == 1 {
                let me = inner.lock().unwrap().clone();
                if let Some(me) = me {
                    me.deliver(2, 2);
                    // Delivered after this callback returns.
                    assert_eq!(sink.lock().unwrap().len(), 1);
                }
            }
        })));
        *slot.lock().unwrap() = Some(listener.clone());

        listener.deliver(1, 1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        slot.lock().unwrap().take();
    }
}
