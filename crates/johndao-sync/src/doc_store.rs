//! Single-document subscriptions.
//!
//! [`doc_store`] turns a document in a [`DocumentStore`] into an observable
//! cell of `Option<T>`. The remote listener is opened when the first
//! subscriber attaches and released when the last one leaves.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::cell::{Callback, Cell, CellValue, Observable, Readable, StopFn, Subscription};
use crate::store::{DocumentRef, DocumentSnapshot, DocumentStore};

/// Where a document subscription points.
#[derive(Debug, Clone, PartialEq)]
pub enum DocLocator {
    /// A slash-separated document path, parsed on use.
    Path(String),
    /// An already-built reference.
    Ref(DocumentRef),
}

impl From<&str> for DocLocator {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for DocLocator {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<DocumentRef> for DocLocator {
    fn from(reference: DocumentRef) -> Self {
        Self::Ref(reference)
    }
}

impl From<&DocumentRef> for DocLocator {
    fn from(reference: &DocumentRef) -> Self {
        Self::Ref(reference.clone())
    }
}

/// Observable view of one document.
///
/// The value is `None` while the document does not exist (or before the
/// first snapshot, when no initial value was given).
pub struct DocCell<T> {
    reference: Option<DocumentRef>,
    cell: Readable<Option<T>>,
}

impl<T> Clone for DocCell<T> {
    fn clone(&self) -> Self {
        Self {
            reference: self.reference.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: CellValue> DocCell<T> {
    /// The subscribed document, if a listener can be opened.
    pub fn reference(&self) -> Option<&DocumentRef> {
        self.reference.as_ref()
    }

    /// The document id, or an empty string for a static cell.
    pub fn id(&self) -> &str {
        self.reference.as_ref().map(DocumentRef::id).unwrap_or("")
    }

    /// The underlying read-only cell.
    pub fn readable(&self) -> Readable<Option<T>> {
        self.cell.clone()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }
}

impl<T: CellValue> Observable<Option<T>> for DocCell<T> {
    fn subscribe_with(&self, callback: Callback<Option<T>>) -> Subscription {
        self.cell.subscribe_with(callback)
    }

    fn get(&self) -> Option<T> {
        self.cell.get()
    }
}

/// Subscribes to one document.
///
/// Without a store, or with a malformed path, the result is a static cell
/// holding `start_with` with no reference and an empty id; a warning is
/// logged and nothing fails. Snapshots
/// that do not decode into `T` are logged and leave the value unchanged.
pub fn doc_store<T>(
    store: Option<Arc<dyn DocumentStore>>,
    locator: impl Into<DocLocator>,
    start_with: Option<T>,
) -> DocCell<T>
where
    T: CellValue + DeserializeOwned,
{
    let reference = match locator.into() {
        DocLocator::Ref(reference) => Some(reference),
        DocLocator::Path(path) => match DocumentRef::new(path.as_str()) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "invalid document path, using static value");
                None
            }
        },
    };

    let (Some(store), Some(doc)) = (store, reference.clone()) else {
        if reference.is_some() {
            tracing::warn!("document store unavailable, using static value");
        }
        return DocCell {
            reference: None,
            cell: Cell::new(start_with).readable(),
        };
    };

    let cell = Cell::with_start(start_with, move |set| {
        let path = doc.path().to_string();
        let listener = Box::new(move |snapshot: DocumentSnapshot| {
            match snapshot.data {
                None => set.set(None),
                Some(data) => match serde_json::from_value::<T>(data) {
                    Ok(value) => set.set(Some(value)),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "ignoring undecodable document snapshot");
                    }
                },
            }
        });

        match store.listen_document(&doc, listener) {
            Ok(registration) => {
                tracing::debug!(path = %doc.path(), "document listener opened");
                Some(Box::new(move || registration.remove()) as StopFn)
            }
            Err(e) => {
                tracing::warn!(path = %doc.path(), error = %e, "failed to open document listener");
                None
            }
        }
    });

    DocCell {
        reference,
        cell: cell.readable(),
    }
}
