//! Client-side state for John DAO.
//!
//! The [`AppContext`] ties the realtime document store, the sign-in flows
//! and the canister together:
//!
//! - [`SessionAuth`] tracks the signed-in user and provisions their
//!   session document;
//! - [`session_doc`] and [`session_actor`] resolve that document into a
//!   capability, and [`DelegatedLogin`] provides the alternative one;
//! - [`actor_selector`] picks the single active [`Actor`](johndao_canister::Actor);
//! - [`RefreshController`] keeps the user-scoped state in step with it,
//!   discarding fetches that were overtaken by a newer actor;
//! - [`ProposalFeed`] keeps the round's proposals loaded.

mod auth;
mod context;
mod identity;
mod notify;
mod proposals;
mod refresh;
mod selector;

pub use auth::{
    new_session_doc, AuthClient, AuthError, AuthProvider, ProviderKind, SessionAuth, SessionUser,
    UserCredential,
};
pub use context::{AppContext, ClientServices};
pub use identity::{session_actor, session_doc, DelegatedLogin};
pub use notify::{BroadcastNotifier, LogNotifier, Notifier, Toast, ToastKind};
pub use proposals::{sort_proposals, Filter, ProposalFeed};
pub use refresh::RefreshController;
pub use selector::{actor_selector, select_actor};
