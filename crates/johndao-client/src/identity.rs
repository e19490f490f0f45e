//! Identity resolution: the two sources of a caller capability.
//!
//! The session-derived source turns the credential stored in the signed-in
//! user's session document into an [`Actor`]. The delegated source holds
//! the actor produced by an interactive [`AuthClient`] login.

use johndao_canister::{Actor, Agent};
use johndao_identity::{Identity, Secp256k1Identity};
use johndao_sync::{
    derived, derived_with, doc_store, Cell, DocumentStore, Observable, Readable, StopFn,
};
use johndao_types::{user_doc_path, Principal, UserDoc};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::{AuthClient, AuthError, SessionUser};

/// The session document of the signed-in user, or `None` when signed out.
///
/// Each change of user releases the previous user's document listener
/// before the next one opens.
pub fn session_doc<S>(
    store: Option<Arc<dyn DocumentStore>>,
    session_user: &S,
) -> Readable<Option<UserDoc>>
where
    S: Observable<Option<SessionUser>> + Clone + Send + Sync + 'static,
{
    derived_with(session_user, None, move |user: &Option<SessionUser>, set| {
        let Some(user) = user else {
            set.set(None);
            return None;
        };
        let doc = doc_store::<UserDoc>(store.clone(), user_doc_path(&user.uid), None);
        let set = set.clone();
        let subscription = doc.subscribe(move |value| set.set(value.clone()));
        Some(Box::new(move || drop(subscription)) as StopFn)
    })
}

/// The actor built from the session document's stored credential.
///
/// The actor is reused while the credential stays the same, so unrelated
/// edits of the session document do not produce a new capability.
pub fn session_actor(
    session_doc: &Readable<Option<UserDoc>>,
    canister_id: Principal,
    agent: Arc<dyn Agent>,
) -> Readable<Option<Actor>> {
    let cache: Mutex<Option<(Value, Actor)>> = Mutex::new(None);
    derived(session_doc, None, move |doc: &Option<UserDoc>| -> Option<Actor> {
        let credential = doc.as_ref()?.private_key_firebase.as_ref()?;

        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached, actor)) = cache.as_ref() {
            if cached == credential {
                return Some(actor.clone());
            }
        }

        match Secp256k1Identity::from_parsed_json(credential) {
            Ok(identity) => {
                let actor = Actor::new(canister_id.clone(), Arc::new(identity), agent.clone());
                tracing::debug!(principal = %actor.principal(), "session actor created");
                *cache = Some((credential.clone(), actor.clone()));
                Some(actor)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored credential is unusable");
                *cache = None;
                None
            }
        }
    })
}

/// The delegated login source.
///
/// Owns a writable cell holding the actor of the current delegated session.
pub struct DelegatedLogin {
    client: Arc<dyn AuthClient>,
    canister_id: Principal,
    agent: Arc<dyn Agent>,
    actor: Cell<Option<Actor>>,
}

impl DelegatedLogin {
    pub fn new(client: Arc<dyn AuthClient>, canister_id: Principal, agent: Arc<dyn Agent>) -> Self {
        Self {
            client,
            canister_id,
            agent,
            actor: Cell::new(None),
        }
    }

    /// The delegated actor, or `None`.
    pub fn actor(&self) -> Readable<Option<Actor>> {
        self.actor.readable()
    }

    /// Runs the interactive login. On failure the source is cleared.
    pub async fn login(&self) -> Option<Actor> {
        let actor = match self.client.login().await {
            Ok(identity) => Some(self.bind(identity)),
            Err(e) => {
                tracing::warn!(error = %e, "delegated login failed");
                None
            }
        };
        self.actor.set(actor.clone());
        actor
    }

    /// Logs out of the delegated session. The source is cleared even if
    /// the auth client reports an error.
    ///
    /// # Errors
    ///
    /// Returns the auth client's error.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let result = self.client.logout().await;
        self.actor.set(None);
        result
    }

    fn bind(&self, identity: Arc<dyn Identity>) -> Actor {
        let actor = Actor::new(self.canister_id.clone(), identity, self.agent.clone());
        tracing::info!(principal = %actor.principal(), "delegated login succeeded");
        actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use johndao_canister::{AgentError, CallKind};
    use johndao_sync::MemoryStore;
    use johndao_types::AuthMethod;
    use serde_json::json;

    struct NoAgent;

    #[async_trait]
    impl Agent for NoAgent {
        async fn call(
            &self,
            _kind: CallKind,
            _canister_id: &Principal,
            _method: &str,
            _args: Vec<Value>,
            _identity: &dyn Identity,
        ) -> Result<Value, AgentError> {
            Ok(Value::Null)
        }
    }

    fn canister() -> Principal {
        Principal::from_text("ryjl3-tyaaa-aaaaa-aaaba-cai").unwrap()
    }

    fn doc_with(credential: Option<Value>) -> UserDoc {
        UserDoc {
            name: None,
            uid: "u1".to_string(),
            creating_user: false,
            auth_provider_id: "1".to_string(),
            user_created: Utc::now(),
            confirmed_human: true,
            auth_method: AuthMethod::Firebase,
            private_key_firebase: credential,
            canister_user_id: None,
            user_creation_error: None,
            banned: None,
            user_backup: None,
            principal: None,
        }
    }

    #[test]
    fn session_actor_follows_credential() {
        let docs = Cell::new(None::<UserDoc>);
        let actor = session_actor(&docs.readable(), canister(), Arc::new(NoAgent));
        let _sub = actor.subscribe(|_| {});
        assert!(actor.get().is_none());

        let key = Secp256k1Identity::generate();
        docs.set(Some(doc_with(Some(key.to_json()))));
        let first = actor.get().expect("actor");
        assert_eq!(first.principal(), key.sender());

        let mut edited = doc_with(Some(key.to_json()));
        edited.canister_user_id = Some(3);
        docs.set(Some(edited));
        assert_eq!(actor.get(), Some(first.clone()));

        docs.set(Some(doc_with(Some(Secp256k1Identity::generate().to_json()))));
        assert_ne!(actor.get(), Some(first));
    }

    #[test]
    fn malformed_credential_yields_none() {
        let docs = Cell::new(Some(doc_with(Some(json!(["04zz", "01"])))));
        let actor = session_actor(&docs.readable(), canister(), Arc::new(NoAgent));
        let _sub = actor.subscribe(|_| {});
        assert!(actor.get().is_none());

        docs.set(Some(doc_with(None)));
        assert!(actor.get().is_none());
    }

    #[test]
    fn session_doc_follows_signed_in_user() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let path = johndao_sync::DocumentRef::new("users/u1").unwrap();
        store
            .set(&path, serde_json::to_value(doc_with(None)).unwrap())
            .unwrap();

        let user = Cell::new(None::<SessionUser>);
        let doc = session_doc(Some(store), &user.readable());
        let _sub = doc.subscribe(|_| {});
        assert!(doc.get().is_none());

        user.set(Some(SessionUser {
            uid: "u1".to_string(),
            display_name: None,
        }));
        assert_eq!(doc.get().map(|d| d.uid), Some("u1".to_string()));
        assert_eq!(memory.listener_count(), 1);

        user.set(None);
        assert!(doc.get().is_none());
        assert_eq!(memory.listener_count(), 0);
    }

    /// An auth client whose next login result the test controls.
    struct ScriptedClient {
        identity: Mutex<Option<Arc<dyn Identity>>>,
        reject_logout: bool,
    }

    impl ScriptedClient {
        fn new(identity: Option<Arc<dyn Identity>>, reject_logout: bool) -> Self {
            Self {
                identity: Mutex::new(identity),
                reject_logout,
            }
        }
    }

    #[async_trait]
    impl AuthClient for ScriptedClient {
        async fn login(&self) -> Result<Arc<dyn Identity>, AuthError> {
            self.identity.lock().unwrap().clone().ok_or(AuthError::Cancelled)
        }

        async fn logout(&self) -> Result<(), AuthError> {
            if self.reject_logout {
                return Err(AuthError::Provider("session expired".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_login_clears_delegated_actor() {
        let key: Arc<dyn Identity> = Arc::new(Secp256k1Identity::generate());
        let client = Arc::new(ScriptedClient::new(Some(key.clone()), false));
        let delegated = DelegatedLogin::new(client.clone(), canister(), Arc::new(NoAgent));
        let actor = delegated.actor();
        let _sub = actor.subscribe(|_| {});

        let first = delegated.login().await.expect("delegated actor");
        assert_eq!(first.principal(), key.sender());
        assert_eq!(actor.get(), Some(first));

        *client.identity.lock().unwrap() = None;
        assert!(delegated.login().await.is_none());
        assert!(actor.get().is_none());
    }

    #[tokio::test]
    async fn logout_clears_actor_even_when_client_fails() {
        let key: Arc<dyn Identity> = Arc::new(Secp256k1Identity::generate());
        let client = Arc::new(ScriptedClient::new(Some(key), true));
        let delegated = DelegatedLogin::new(client, canister(), Arc::new(NoAgent));
        let actor = delegated.actor();
        let _sub = actor.subscribe(|_| {});

        delegated.login().await.expect("delegated actor");
        assert!(actor.get().is_some());

        let result = delegated.logout().await;
        assert!(matches!(result, Err(AuthError::Provider(_))));
        assert!(actor.get().is_none());
    }
}
