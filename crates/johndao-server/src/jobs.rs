//! The scheduled glue functions between the document store, the canister
//! and the social feed.

use johndao_canister::{Actor, AgentError};
use johndao_identity::{Identity, IdentityError, Secp256k1Identity};
use johndao_sync::{
    collection_store, CollectionRef, DocumentRef, DocumentStore, Observable, Query, Record,
    StoreError, Subscription,
};
use johndao_types::{CanisterError, CreateUserArg, BACKUP_STATE_DOC, USERS_COLLECTION};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::twitter::{PosterError, TweetPoster};

/// Error stored on a session document whose canister user could not be created.
pub const USER_CREATION_ERROR: &str = "Failed user creation";

/// Errors raised by a scheduled function.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("canister call failed: {0}")]
    Agent(#[from] AgentError),

    #[error("canister returned an error: {0}")]
    Canister(#[from] CanisterError),

    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("unusable credential: {0}")]
    Credential(#[from] IdentityError),

    #[error("posting failed: {0}")]
    Poster(#[from] PosterError),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Runs a document store operation off the async threads.
async fn blocking<T, F>(store: &Arc<dyn DocumentStore>, f: F) -> Result<T, JobError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DocumentStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
}

// ── Create user trigger ──

/// The principal a session document's stored credential signs as.
fn credential_principal(data: &Value) -> Result<johndao_types::Principal, IdentityError> {
    let credential = data.get("privateKeyFirebase").ok_or_else(|| {
        IdentityError::MalformedCredential("missing privateKeyFirebase".to_string())
    })?;
    Ok(Secp256k1Identity::from_parsed_json(credential)?.sender())
}

/// Registers the owner of a new session document with the canister and
/// records the outcome on the document.
///
/// `creating_user` is cleared whatever happens. A transport failure leaves
/// the document without a user id or error so a later run can retry by
/// setting `creating_user` again.
pub async fn create_user_for(
    actor: &Actor,
    store: &Arc<dyn DocumentStore>,
    doc: DocumentRef,
    data: &Value,
) -> Result<Option<u32>, JobError> {
    let outcome = match credential_principal(data) {
        Ok(principal) => actor
            .create_user(CreateUserArg { principal })
            .await
            .map_err(JobError::from)
            .and_then(|reply| reply.map_err(JobError::from)),
        Err(e) => Err(e.into()),
    };

    let (mut patch, result) = match outcome {
        Ok(id) => {
            tracing::info!(path = %doc, id, "canister user created");
            (json!({ "canister_user_id": id }), Ok(Some(id)))
        }
        Err(e @ (JobError::Canister(_) | JobError::Credential(_))) => {
            tracing::error!(path = %doc, error = %e, "user creation failed");
            (json!({ "user_creation_error": USER_CREATION_ERROR }), Ok(None))
        }
        Err(e) => (json!({}), Err(e)),
    };
    patch["creating_user"] = Value::Bool(false);

    blocking(store, move |store| store.update(&doc, patch)).await?;
    result
}

struct Trigger {
    actor: Actor,
    store: Arc<dyn DocumentStore>,
    runtime: Handle,
    pending: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Trigger {
    fn observe(self: &Arc<Self>, records: &[Record<Value>]) {
        for record in records {
            let fresh = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.reference.path().to_string());
            if !fresh {
                continue;
            }

            let trigger = self.clone();
            let record = record.clone();
            let task = self.runtime.spawn(async move {
                let path = record.reference.path().to_string();
                if let Err(e) =
                    create_user_for(&trigger.actor, &trigger.store, record.reference, &record.data)
                        .await
                {
                    tracing::error!(%path, error = %e, "create user trigger failed");
                }
                trigger
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&path);
            });

            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|task| !task.is_finished());
            tasks.push(task);
        }
    }
}

/// Watches session documents with `creating_user == true` and creates
/// their canister users. Each document is handled once at a time.
pub struct CreateUserTrigger {
    trigger: Arc<Trigger>,
    _watch: Subscription,
}

impl CreateUserTrigger {
    /// Starts watching.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the users collection path is invalid.
    pub fn start(actor: Actor, store: Arc<dyn DocumentStore>) -> Result<Self, StoreError> {
        let query = Query::new(CollectionRef::new(USERS_COLLECTION)?).where_eq("creating_user", true);
        let trigger = Arc::new(Trigger {
            actor,
            store: store.clone(),
            runtime: Handle::current(),
            pending: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let users = collection_store::<Value>(Some(store), query, Vec::new());
        let observer = trigger.clone();
        let watch = users.subscribe(move |records: &Vec<Record<Value>>| observer.observe(records));
        tracing::info!("create user trigger watching session documents");

        Ok(Self {
            trigger,
            _watch: watch,
        })
    }

    /// Waits until every creation started so far has finished.
    pub async fn settle(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = self
                .trigger
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "create user task failed");
                }
            }
        }
    }
}

// ── Backup users ──

/// Outcome of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Users the canister reported as changed.
    pub changed: usize,
    /// Changed users whose session document was found and updated.
    pub matched: usize,
    /// Canister time the backup covers up to.
    pub backup_time: u64,
}

/// Copies users changed since the last backup onto their session documents.
///
/// Session documents are matched by `canister_user_id`. The backup time is
/// stored in the backup state document and reported back to the canister.
pub async fn backup_users(
    actor: &Actor,
    store: &Arc<dyn DocumentStore>,
) -> Result<BackupReport, JobError> {
    let state_doc = DocumentRef::new(BACKUP_STATE_DOC)?;
    let since = {
        let doc = state_doc.clone();
        blocking(store, move |store| store.get(&doc))
            .await?
            .and_then(|state| state.get("last_backup_time").and_then(Value::as_u64))
    };

    let changed = actor.get_changed_users(since).await?;
    let users = CollectionRef::new(USERS_COLLECTION)?;
    let mut matched = 0;

    for (principal, user) in &changed.users {
        let query = Query::new(users.clone())
            .where_eq("canister_user_id", user.id)
            .limit(1);
        let fields = json!({
            "userBackup": user,
            "principal": principal.to_text(),
        });
        let updated = blocking(store, move |store| {
            let Some((doc, _)) = store.query(&query)?.into_iter().next() else {
                return Ok(false);
            };
            store.update(&doc, fields)?;
            Ok(true)
        })
        .await?;

        if updated {
            matched += 1;
        } else {
            tracing::debug!(user_id = user.id, "no session document for changed user");
        }
    }

    let backup_time = changed.backup_time;
    blocking(store, move |store| {
        store.set(
            &state_doc,
            json!({
                "last_backup_time": backup_time,
                "updated_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
    })
    .await?;
    actor.update_last_backup_time(backup_time).await??;

    Ok(BackupReport {
        changed: changed.users.len(),
        matched,
        backup_time,
    })
}

// ── Schedule tweet ──

/// Posts the oldest unposted round winner and marks it posted.
///
/// Returns the round index posted, or `None` when nothing was waiting. A
/// posting failure leaves the entry unmarked for the next run.
pub async fn schedule_tweet(
    actor: &Actor,
    poster: &dyn TweetPoster,
) -> Result<Option<u64>, JobError> {
    let Some((index, tweet)) = actor.poll_untweeted().await? else {
        tracing::debug!("no tweet waiting");
        return Ok(None);
    };

    poster.post(&tweet).await?;
    tracing::info!(index, text = tweet.text(), "posted round winner");
    actor.post_tweet(index).await??;
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn principal_from_stored_credential() {
        let key = Secp256k1Identity::generate();
        let data = json!({ "privateKeyFirebase": key.to_json() });
        assert_eq!(credential_principal(&data).unwrap(), key.sender());

        assert!(matches!(
            credential_principal(&json!({})),
            Err(IdentityError::MalformedCredential(_))
        ));
    }
}
