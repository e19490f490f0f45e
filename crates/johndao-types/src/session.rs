//! Session-scoped documents and the user-scoped state variant.

use crate::{CanisterError, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding one session document per signed-in user.
pub const USERS_COLLECTION: &str = "users";

/// Path of the session document for `uid`.
pub fn user_doc_path(uid: &str) -> String {
    format!("{USERS_COLLECTION}/{uid}")
}

/// Which identity source a session document declares as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    /// The key pair embedded in the session document.
    #[serde(rename = "firebase")]
    Firebase,
    /// The delegated Internet Identity login.
    II,
}

/// The per-user session document (`users/{uid}`).
///
/// `private_key_firebase` is kept as raw JSON so a malformed credential
/// does not make the whole document unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDoc {
    pub name: Option<String>,
    pub uid: String,
    pub creating_user: bool,
    pub auth_provider_id: String,
    #[serde(rename = "userCreated")]
    pub user_created: DateTime<Utc>,
    #[serde(rename = "confirmedHuman")]
    pub confirmed_human: bool,
    #[serde(rename = "authMethod")]
    pub auth_method: AuthMethod,
    #[serde(rename = "privateKeyFirebase", default)]
    pub private_key_firebase: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canister_user_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_creation_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
    /// Last canister record copied by the backup job.
    #[serde(rename = "userBackup", default, skip_serializing_if = "Option::is_none")]
    pub user_backup: Option<User>,
    /// Canister principal recorded by the backup job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// State of the signed-in user as known to the canister.
///
/// Only the refresh controller moves this between variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UserState {
    /// No capability is active.
    #[default]
    NotLoggedIn,
    /// A fetch for the active capability is outstanding.
    Loading,
    /// The canister returned the user record.
    #[serde(rename = "user")]
    Loaded { user: User },
    /// The canister rejected the fetch with a domain error.
    Error { error: CanisterError },
}

impl UserState {
    /// The loaded user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Loaded { user } => Some(user),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_doc_reads_wire_names() {
        let doc: UserDoc = serde_json::from_value(json!({
            "name": "John",
            "uid": "abc",
            "creating_user": false,
            "auth_provider_id": "123",
            "userCreated": "2023-05-01T12:00:00Z",
            "confirmedHuman": true,
            "authMethod": "firebase",
            "privateKeyFirebase": ["04aa", "bb"],
            "canister_user_id": 4
        }))
        .unwrap();

        assert_eq!(doc.auth_method, AuthMethod::Firebase);
        assert_eq!(doc.canister_user_id, Some(4));
        assert!(doc.private_key_firebase.is_some());
        assert_eq!(doc.banned, None);
    }

    #[test]
    fn user_doc_without_credential() {
        let doc: UserDoc = serde_json::from_value(json!({
            "name": null,
            "uid": "abc",
            "creating_user": true,
            "auth_provider_id": "123",
            "userCreated": "2023-05-01T12:00:00Z",
            "confirmedHuman": false,
            "authMethod": "II"
        }))
        .unwrap();
        assert_eq!(doc.auth_method, AuthMethod::II);
        assert!(doc.private_key_firebase.is_none());
    }

    #[test]
    fn user_state_tags() {
        assert_eq!(
            serde_json::to_value(UserState::NotLoggedIn).unwrap(),
            json!({ "state": "notLoggedIn" })
        );
        assert_eq!(
            serde_json::to_value(UserState::Error {
                error: CanisterError::UserDoesNotExist
            })
            .unwrap(),
            json!({ "state": "error", "error": "UserDoesNotExist" })
        );
    }

    #[test]
    fn user_doc_path_format() {
        assert_eq!(user_doc_path("u1"), "users/u1");
    }
}
