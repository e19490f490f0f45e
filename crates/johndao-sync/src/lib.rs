//! Realtime state synchronization for John DAO.
//!
//! The building blocks are observable [`Cell`]s, cells [`derived`] from
//! other cells, and subscriptions that mirror a remote [`DocumentStore`]
//! into cells:
//!
//! - [`doc_store`] follows one document,
//! - [`collection_store`] follows a collection or a query.
//!
//! Remote listeners are opened lazily on the first subscriber and released
//! exactly once when the last subscriber leaves.

mod cell;
mod collection;
mod derived;
mod doc_store;
mod error;
mod memory;
mod store;

pub use cell::{Callback, Cell, CellValue, Observable, Readable, Setter, StopFn, Subscription};
pub use collection::{collection_store, CollectionCell, CollectionLocator, Record};
pub use derived::{derived, derived2, derived3, derived_with, distinct};
pub use doc_store::{doc_store, DocCell, DocLocator};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{
    merge_fields, CollectionRef, Direction, DocumentListener, DocumentRef, DocumentSnapshot,
    DocumentStore, ListenerRegistration, ListenerRegistry, OrderedListener, Query, QueryListener,
    QuerySnapshot, SharedDocumentListener, SharedQueryListener,
};
