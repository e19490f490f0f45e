//! The application context: every client-side cell, wired once.

use johndao_canister::{Actor, Agent};
use johndao_sync::{doc_store, DocCell, DocumentStore, Readable};
use johndao_types::{Principal, UserDoc, UserState, BLOCKLIST_DOC};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthClient, AuthProvider, ProviderKind, SessionAuth, SessionUser};
use crate::identity::{session_actor, session_doc, DelegatedLogin};
use crate::notify::{LogNotifier, Notifier};
use crate::proposals::ProposalFeed;
use crate::refresh::RefreshController;
use crate::selector::actor_selector;

/// External services the client is built on.
pub struct ClientServices {
    /// The realtime document store; `None` degrades every document cell to
    /// a static value.
    pub store: Option<Arc<dyn DocumentStore>>,
    pub agent: Arc<dyn Agent>,
    pub auth_provider: Arc<dyn AuthProvider>,
    pub auth_client: Arc<dyn AuthClient>,
    pub notifier: Arc<dyn Notifier>,
}

impl ClientServices {
    /// Services with a logging notifier.
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        agent: Arc<dyn Agent>,
        auth_provider: Arc<dyn AuthProvider>,
        auth_client: Arc<dyn AuthClient>,
    ) -> Self {
        Self {
            store,
            agent,
            auth_provider,
            auth_client,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Owns the client's cells and the controllers that drive them.
///
/// Control flows from the session user to the session document, from the
/// session document and the delegated login to the selected actor, and
/// from the selected actor to the user-scoped state and the proposal feed.
pub struct AppContext {
    canister_id: Principal,
    session: SessionAuth,
    user_doc: Readable<Option<UserDoc>>,
    session_actor: Readable<Option<Actor>>,
    delegated: DelegatedLogin,
    actor: Readable<Option<Actor>>,
    refresh: RefreshController,
    proposals: ProposalFeed,
    blocklist: DocCell<Value>,
    notifier: Arc<dyn Notifier>,
}

impl AppContext {
    /// Wires the context for `canister_id`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(canister_id: Principal, services: ClientServices) -> Self {
        let ClientServices {
            store,
            agent,
            auth_provider,
            auth_client,
            notifier,
        } = services;

        let session = SessionAuth::new(auth_provider, store.clone());
        let user_doc = session_doc(store.clone(), &session.user());
        let session_actor = session_actor(&user_doc, canister_id.clone(), agent.clone());
        let delegated = DelegatedLogin::new(auth_client, canister_id.clone(), agent.clone());
        let actor = actor_selector(&session_actor, &delegated.actor(), &user_doc);

        let refresh = RefreshController::new(&actor, notifier.clone());
        let proposals = ProposalFeed::new(&actor, Actor::anonymous(canister_id.clone(), agent));
        let blocklist = doc_store::<Value>(store, BLOCKLIST_DOC, None);

        tracing::info!(canister = %canister_id, "client context ready");
        Self {
            canister_id,
            session,
            user_doc,
            session_actor,
            delegated,
            actor,
            refresh,
            proposals,
            blocklist,
            notifier,
        }
    }

    pub fn canister_id(&self) -> &Principal {
        &self.canister_id
    }

    /// The signed-in session user.
    pub fn session_user(&self) -> Readable<Option<SessionUser>> {
        self.session.user()
    }

    pub fn session(&self) -> &SessionAuth {
        &self.session
    }

    /// The signed-in user's session document.
    pub fn user_doc(&self) -> Readable<Option<UserDoc>> {
        self.user_doc.clone()
    }

    /// The actor built from the session document's credential.
    pub fn session_actor(&self) -> Readable<Option<Actor>> {
        self.session_actor.clone()
    }

    pub fn delegated(&self) -> &DelegatedLogin {
        &self.delegated
    }

    /// The active actor.
    pub fn actor(&self) -> Readable<Option<Actor>> {
        self.actor.clone()
    }

    /// The user-scoped state.
    pub fn user_state(&self) -> Readable<UserState> {
        self.refresh.state()
    }

    pub fn refresh(&self) -> &RefreshController {
        &self.refresh
    }

    pub fn proposals(&self) -> &ProposalFeed {
        &self.proposals
    }

    pub fn blocklist(&self) -> &DocCell<Value> {
        &self.blocklist
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    /// Signs in with a session provider; failures are logged.
    pub async fn login_with(&self, kind: ProviderKind) -> Option<SessionUser> {
        self.session.login_with(kind).await
    }

    /// Runs the delegated login; failures are logged.
    pub async fn login_delegated(&self) -> Option<Actor> {
        self.delegated.login().await
    }

    /// Ends both sessions and resets the user-scoped state.
    pub async fn logout(&self) {
        if let Err(e) = self.session.sign_out().await {
            tracing::error!(error = %e, "session sign-out failed");
        }
        if let Err(e) = self.delegated.logout().await {
            tracing::error!(error = %e, "delegated logout failed");
        }
        self.refresh.refresh(None);
    }

    /// Waits for every outstanding fetch.
    pub async fn settle(&self) {
        self.refresh.settle().await;
        self.proposals.settle().await;
    }
}
