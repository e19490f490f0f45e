//! Session sign-in and the delegated login contract.
//!
//! [`SessionAuth`] signs users in through an external [`AuthProvider`] and
//! makes sure each signed-in user has a session document carrying a
//! freshly generated key pair. [`AuthClient`] is the contract of the
//! delegated interactive login used by [`DelegatedLogin`](crate::DelegatedLogin).

use async_trait::async_trait;
use chrono::Utc;
use johndao_identity::{Identity, Secp256k1Identity};
use johndao_sync::{Cell, DocumentRef, DocumentStore, Readable, StoreError};
use johndao_types::{user_doc_path, AuthMethod, UserDoc};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by sign-in flows.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The user closed or declined the interactive flow.
    #[error("sign-in was cancelled")]
    Cancelled,

    /// The provider reported a failure.
    #[error("auth provider error: {0}")]
    Provider(String),

    /// The session document could not be read or written.
    #[error("session document error: {0}")]
    Store(#[from] StoreError),

    /// The session document could not be encoded.
    #[error("failed to encode session document: {0}")]
    Encode(#[from] serde_json::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Interactive sign-in providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Twitter,
    Google,
}

/// The signed-in session user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub uid: String,
    pub display_name: Option<String>,
}

/// Result of a successful interactive sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub user: SessionUser,
    /// The user's id at the upstream provider (e.g. the Twitter user id).
    pub provider_uid: String,
}

/// An external session authentication provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Runs the provider's interactive sign-in. May fail or be cancelled.
    async fn sign_in_interactive(&self, kind: ProviderKind) -> Result<UserCredential, AuthError>;

    /// Ends the provider session.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// An external delegated login flow yielding a caller identity.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Runs the interactive login and returns the delegated identity.
    async fn login(&self) -> Result<Arc<dyn Identity>, AuthError>;

    /// Ends the delegated session.
    async fn logout(&self) -> Result<(), AuthError>;
}

/// Session sign-in state backed by an [`AuthProvider`].
pub struct SessionAuth {
    provider: Arc<dyn AuthProvider>,
    store: Option<Arc<dyn DocumentStore>>,
    user: Cell<Option<SessionUser>>,
}

impl SessionAuth {
    pub fn new(provider: Arc<dyn AuthProvider>, store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self {
            provider,
            store,
            user: Cell::new(None),
        }
    }

    /// The signed-in user, or `None`.
    pub fn user(&self) -> Readable<Option<SessionUser>> {
        self.user.readable()
    }

    /// Records a user restored by the provider outside an interactive flow.
    pub fn restore(&self, user: Option<SessionUser>) {
        self.user.set(user);
    }

    /// Signs in and creates the session document if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or a store error if the session
    /// document cannot be created.
    pub async fn try_login_with(&self, kind: ProviderKind) -> Result<SessionUser, AuthError> {
        let credential = self.provider.sign_in_interactive(kind).await?;
        if let Some(store) = &self.store {
            let created = ensure_session_doc(store.clone(), credential.clone()).await?;
            if created {
                tracing::info!(uid = %credential.user.uid, "created session document");
            }
        }
        self.user.set(Some(credential.user.clone()));
        Ok(credential.user)
    }

    /// Signs in, logging and swallowing any failure.
    pub async fn login_with(&self, kind: ProviderKind) -> Option<SessionUser> {
        match self.try_login_with(kind).await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(provider = ?kind, error = %e, "sign-in failed");
                None
            }
        }
    }

    /// Signs out of the provider and clears the session user.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the session user is cleared regardless.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.provider.sign_out().await;
        self.user.set(None);
        result
    }
}

/// A new session document for `credential` with a fresh key pair.
pub fn new_session_doc(credential: &UserCredential) -> UserDoc {
    UserDoc {
        name: credential.user.display_name.clone(),
        uid: credential.user.uid.clone(),
        creating_user: true,
        auth_provider_id: credential.provider_uid.clone(),
        user_created: Utc::now(),
        confirmed_human: false,
        auth_method: AuthMethod::Firebase,
        private_key_firebase: Some(Secp256k1Identity::generate().to_json()),
        canister_user_id: None,
        user_creation_error: None,
        banned: None,
        user_backup: None,
        principal: None,
    }
}

/// Creates `users/{uid}` unless it exists. Returns whether it was created.
async fn ensure_session_doc(
    store: Arc<dyn DocumentStore>,
    credential: UserCredential,
) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let doc = DocumentRef::new(user_doc_path(&credential.user.uid))?;
        if store.get(&doc)?.is_some() {
            return Ok(false);
        }
        let data = serde_json::to_value(new_session_doc(&credential))?;
        store.set(&doc, data)?;
        Ok(true)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_doc_carries_usable_key() {
        let credential = UserCredential {
            user: SessionUser {
                uid: "u1".to_string(),
                display_name: Some("John".to_string()),
            },
            provider_uid: "12345".to_string(),
        };
        let doc = new_session_doc(&credential);

        assert!(doc.creating_user);
        assert!(!doc.confirmed_human);
        assert_eq!(doc.auth_method, AuthMethod::Firebase);
        assert_eq!(doc.auth_provider_id, "12345");

        let key = doc.private_key_firebase.expect("credential");
        assert!(Secp256k1Identity::from_parsed_json(&key).is_ok());
    }
}
