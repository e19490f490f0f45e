//! Collection and query subscriptions.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::cell::{Callback, Cell, CellValue, Observable, Readable, StopFn, Subscription};
use crate::store::{CollectionRef, DocumentRef, DocumentStore, Query, QuerySnapshot};

/// Where a collection subscription points.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionLocator {
    /// A slash-separated collection path, parsed on use.
    Path(String),
    /// Every document of a collection.
    Collection(CollectionRef),
    /// A filtered, ordered or limited query.
    Query(Query),
}

impl From<&str> for CollectionLocator {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for CollectionLocator {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<CollectionRef> for CollectionLocator {
    fn from(collection: CollectionRef) -> Self {
        Self::Collection(collection)
    }
}

impl From<Query> for CollectionLocator {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

/// One decoded document of a collection snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: String,
    pub reference: DocumentRef,
    pub data: T,
}

/// Observable view of a collection or query.
pub struct CollectionCell<T> {
    query: Option<Query>,
    cell: Readable<Vec<Record<T>>>,
}

impl<T> Clone for CollectionCell<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: CellValue> CollectionCell<T> {
    /// The subscribed query; `None` for a static cell.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// The subscribed collection; `None` for a static cell.
    pub fn reference(&self) -> Option<&CollectionRef> {
        self.query.as_ref().map(Query::collection)
    }

    pub fn readable(&self) -> Readable<Vec<Record<T>>> {
        self.cell.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }
}

impl<T: CellValue> Observable<Vec<Record<T>>> for CollectionCell<T> {
    fn subscribe_with(&self, callback: Callback<Vec<Record<T>>>) -> Subscription {
        self.cell.subscribe_with(callback)
    }

    fn get(&self) -> Vec<Record<T>> {
        self.cell.get()
    }
}

fn decode<T: DeserializeOwned>(snapshot: QuerySnapshot) -> Vec<Record<T>> {
    snapshot
        .docs
        .into_iter()
        .filter_map(|(reference, data)| match serde_json::from_value::<T>(data) {
            Ok(data) => Some(Record {
                id: reference.id().to_string(),
                reference,
                data,
            }),
            Err(e) => {
                tracing::warn!(path = %reference, error = %e, "skipping undecodable document");
                None
            }
        })
        .collect()
}

/// Subscribes to a collection or query.
///
/// Every notification replaces the whole sequence, in the store's order.
/// Without a store, or with a malformed path, the result is a static cell
/// holding `start_with` with no reference.
pub fn collection_store<T>(
    store: Option<Arc<dyn DocumentStore>>,
    locator: impl Into<CollectionLocator>,
    start_with: Vec<Record<T>>,
) -> CollectionCell<T>
where
    T: CellValue + DeserializeOwned,
{
    let query = match locator.into() {
        CollectionLocator::Query(query) => Some(query),
        CollectionLocator::Collection(collection) => Some(Query::new(collection)),
        CollectionLocator::Path(path) => match CollectionRef::new(path.as_str()) {
            Ok(collection) => Some(Query::new(collection)),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "invalid collection path, using static value");
                None
            }
        },
    };

    let (Some(store), Some(watched)) = (store, query.clone()) else {
        if query.is_some() {
            tracing::warn!("document store unavailable, using static value");
        }
        return CollectionCell {
            query: None,
            cell: Cell::new(start_with).readable(),
        };
    };

    let cell = Cell::with_start(start_with, move |set| {
        let listener = Box::new(move |snapshot: QuerySnapshot| set.set(decode::<T>(snapshot)));
        match store.listen_collection(&watched, listener) {
            Ok(registration) => {
                tracing::debug!(collection = %watched.collection(), "collection listener opened");
                Some(Box::new(move || registration.remove()) as StopFn)
            }
            Err(e) => {
                tracing::warn!(collection = %watched.collection(), error = %e, "failed to open collection listener");
                None
            }
        }
    });

    CollectionCell {
        query,
        cell: cell.readable(),
    }
}
