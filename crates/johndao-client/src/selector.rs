//! Selection of the single active capability.

use johndao_canister::Actor;
use johndao_sync::{derived3, distinct, Readable};
use johndao_types::{AuthMethod, UserDoc};

/// Picks the active actor.
///
/// The session actor wins when the session document declares the stored
/// key as its auth method; otherwise the delegated actor, if any.
pub fn select_actor(
    session: &Option<Actor>,
    delegated: &Option<Actor>,
    doc: &Option<UserDoc>,
) -> Option<Actor> {
    let session_authoritative = doc
        .as_ref()
        .is_some_and(|doc| doc.auth_method == AuthMethod::Firebase);

    match (session, delegated) {
        (Some(actor), _) if session_authoritative => Some(actor.clone()),
        (_, Some(actor)) => Some(actor.clone()),
        _ => None,
    }
}

/// The active actor, recomputed synchronously on every input change.
///
/// Emits only when the selected actor changes, so intermediate recomputes
/// that land on the same actor do not start a new fetch downstream.
pub fn actor_selector(
    session: &Readable<Option<Actor>>,
    delegated: &Readable<Option<Actor>>,
    doc: &Readable<Option<UserDoc>>,
) -> Readable<Option<Actor>> {
    let selected = derived3(session, delegated, doc, None, select_actor);
    distinct(&selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use johndao_canister::{Agent, AgentError, CallKind};
    use johndao_identity::Identity;
    use johndao_sync::{Cell, Observable};
    use johndao_types::Principal;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

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

    fn actor() -> Actor {
        Actor::anonymous(Principal::anonymous(), Arc::new(NoAgent))
    }

    fn doc(auth_method: AuthMethod) -> UserDoc {
        UserDoc {
            name: None,
            uid: "u1".to_string(),
            creating_user: false,
            auth_provider_id: "1".to_string(),
            user_created: Utc::now(),
            confirmed_human: true,
            auth_method,
            private_key_firebase: None,
            canister_user_id: None,
            user_creation_error: None,
            banned: None,
            user_backup: None,
            principal: None,
        }
    }

    #[test]
    fn precedence_table() {
        let (s, d) = (actor(), actor());
        let firebase = Some(doc(AuthMethod::Firebase));
        let ii = Some(doc(AuthMethod::II));
        let (some_s, some_d) = (Some(s.clone()), Some(d.clone()));

        assert_eq!(select_actor(&some_s, &some_d, &firebase), Some(s.clone()));
        assert_eq!(select_actor(&some_s, &None, &firebase), Some(s.clone()));
        assert_eq!(select_actor(&some_s, &some_d, &ii), Some(d.clone()));
        assert_eq!(select_actor(&some_s, &None, &ii), None);
        assert_eq!(select_actor(&some_s, &some_d, &None), Some(d.clone()));
        assert_eq!(select_actor(&None, &some_d, &firebase), Some(d));
        assert_eq!(select_actor(&None, &None, &firebase), None);
        assert_eq!(select_actor(&None, &None, &None), None);
    }

    #[test]
    fn selector_recomputes_on_each_input() {
        let session = Cell::new(None::<Actor>);
        let delegated = Cell::new(None::<Actor>);
        let docs = Cell::new(None::<UserDoc>);
        let selected = actor_selector(&session.readable(), &delegated.readable(), &docs.readable());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = selected.subscribe(move |a: &Option<Actor>| log.lock().unwrap().push(a.clone()));

        let s = actor();
        session.set(Some(s.clone()));
        assert_eq!(selected.get(), None);

        docs.set(Some(doc(AuthMethod::Firebase)));
        assert_eq!(selected.get(), Some(s.clone()));

        let d = actor();
        delegated.set(Some(d.clone()));
        assert_eq!(selected.get(), Some(s.clone()));

        docs.set(Some(doc(AuthMethod::II)));
        assert_eq!(selected.get(), Some(d.clone()));

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(s), Some(d)]);
    }
}
