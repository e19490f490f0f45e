//! Typed access to the voting canister.

use johndao_identity::{AnonymousIdentity, Identity};
use johndao_types::{
    CanisterError, CanisterResult, ChangedUsers, CreateProposalArg, CreateUserArg, LoginMethod,
    Principal, ProposalInfo, Settings, Tweet, User, Vote,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::{Agent, AgentError, CallKind};

/// Outcome of a canister method that can fail in the domain.
///
/// The outer `Result` is the transport; the inner one is the canister's
/// tagged reply.
pub type CallResult<T> = Result<Result<T, CanisterError>, AgentError>;

struct ActorInner {
    token: Uuid,
    canister_id: Principal,
    identity: Arc<dyn Identity>,
    agent: Arc<dyn Agent>,
}

/// A capability to call the canister as one identity.
///
/// Cloning shares the capability. Two actors are equal only if one is a
/// clone of the other: every [`Actor::new`] mints a fresh token.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl Actor {
    /// Binds `identity` to `canister_id` over `agent`.
    pub fn new(canister_id: Principal, identity: Arc<dyn Identity>, agent: Arc<dyn Agent>) -> Self {
        Self {
            inner: Arc::new(ActorInner {
                token: Uuid::new_v4(),
                canister_id,
                identity,
                agent,
            }),
        }
    }

    /// An actor calling as the anonymous principal.
    pub fn anonymous(canister_id: Principal, agent: Arc<dyn Agent>) -> Self {
        Self::new(canister_id, Arc::new(AnonymousIdentity), agent)
    }

    /// Unique token of this capability.
    pub fn token(&self) -> Uuid {
        self.inner.token
    }

    pub fn canister_id(&self) -> &Principal {
        &self.inner.canister_id
    }

    /// The principal calls are made as.
    pub fn principal(&self) -> Principal {
        self.inner.identity.sender()
    }

    pub fn identity(&self) -> Arc<dyn Identity> {
        self.inner.identity.clone()
    }

    async fn raw(&self, kind: CallKind, method: &str, args: Vec<Value>) -> Result<Value, AgentError> {
        self.inner
            .agent
            .call(
                kind,
                &self.inner.canister_id,
                method,
                args,
                self.inner.identity.as_ref(),
            )
            .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        kind: CallKind,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, AgentError> {
        let reply = self.raw(kind, method, args).await?;
        serde_json::from_value(reply).map_err(|source| AgentError::Decode {
            method: method.to_string(),
            source,
        })
    }

    async fn call_domain<T: DeserializeOwned>(
        &self,
        kind: CallKind,
        method: &str,
        args: Vec<Value>,
    ) -> CallResult<T> {
        let reply: CanisterResult<T> = self.call(kind, method, args).await?;
        Ok(reply.into())
    }

    // ── User ──

    /// Registers `arg.principal` as a new canister user; returns its id.
    pub async fn create_user(&self, arg: CreateUserArg) -> CallResult<u32> {
        let args = vec![encode("create_user", &arg)?];
        self.call_domain(CallKind::Update, "create_user", args).await
    }

    /// The caller's user record.
    pub async fn get_user(&self) -> CallResult<User> {
        self.call_domain(CallKind::Query, "get_user", Vec::new())
            .await
    }

    pub async fn update_username(&self, name: &str) -> CallResult<()> {
        let args = vec![encode("update_username", &name)?];
        self.call_domain(CallKind::Update, "update_username", args)
            .await
    }

    /// Stages a new principal for the caller, confirmed by logging in with it.
    pub async fn stage_new_principal(
        &self,
        principal: &Principal,
        method: &LoginMethod,
    ) -> CallResult<()> {
        let args = vec![
            encode("stage_new_principal", principal)?,
            encode("stage_new_principal", method)?,
        ];
        self.call_domain(CallKind::Update, "stage_new_principal", args)
            .await
    }

    /// Sets the ledger account rewards are paid to.
    pub async fn update_account_identifier(&self, account: &[u8]) -> CallResult<()> {
        let args = vec![encode("update_account_identifier", &account)?];
        self.call_domain(CallKind::Update, "update_account_identifier", args)
            .await
    }

    /// Pays out the caller's withdrawable balance; returns the ledger block.
    pub async fn claim_reward(&self) -> CallResult<u64> {
        self.call_domain(CallKind::Update, "claim_reward", Vec::new())
            .await
    }

    /// Top users by karma.
    pub async fn get_users_by_karma(&self, limit: u32) -> Result<Vec<User>, AgentError> {
        let args = vec![encode("get_users_by_karma", &limit)?];
        self.call(CallKind::Query, "get_users_by_karma", args).await
    }

    // ── Proposals ──

    pub async fn get_proposals_info(&self) -> Result<Vec<ProposalInfo>, AgentError> {
        self.call(CallKind::Query, "get_proposals_info", Vec::new())
            .await
    }

    /// Submits a proposal for the current round; returns its id.
    pub async fn create_proposal(&self, arg: CreateProposalArg) -> CallResult<u32> {
        let args = vec![encode("create_proposal", &arg)?];
        self.call_domain(CallKind::Update, "create_proposal", args)
            .await
    }

    pub async fn vote_for_proposal(&self, proposal_id: u32, vote: Vote) -> CallResult<()> {
        let args = vec![
            encode("vote_for_proposal", &proposal_id)?,
            encode("vote_for_proposal", &vote)?,
        ];
        self.call_domain(CallKind::Update, "vote_for_proposal", args)
            .await
    }

    pub async fn report_proposal(&self, proposal_id: u32) -> CallResult<()> {
        let args = vec![encode("report_proposal", &proposal_id)?];
        self.call_domain(CallKind::Update, "report_proposal", args)
            .await
    }

    pub async fn delete_proposal(&self, proposal_id: u32) -> CallResult<()> {
        let args = vec![encode("delete_proposal", &proposal_id)?];
        self.call_domain(CallKind::Update, "delete_proposal", args)
            .await
    }

    /// End of the current voting round, in nanoseconds since the epoch.
    pub async fn get_round_end_time_nano(&self) -> Result<u64, AgentError> {
        self.call(CallKind::Query, "get_round_end_time_nano", Vec::new())
            .await
    }

    // ── Administration ──

    /// Users changed since `since` (all users when `None`).
    pub async fn get_changed_users(&self, since: Option<u64>) -> Result<ChangedUsers, AgentError> {
        let args = vec![encode("get_changed_users", &since)?];
        let (users, backup_time): (Vec<(Principal, User)>, u64) = self
            .call(CallKind::Query, "get_changed_users", args)
            .await?;
        Ok(ChangedUsers { users, backup_time })
    }

    pub async fn update_last_backup_time(&self, time: u64) -> CallResult<()> {
        let args = vec![encode("update_last_backup_time", &time)?];
        self.call_domain(CallKind::Update, "update_last_backup_time", args)
            .await
    }

    pub async fn update_settings(&self, settings: &Settings) -> CallResult<()> {
        let args = vec![encode("update_settings", settings)?];
        self.call_domain(CallKind::Update, "update_settings", args)
            .await
    }

    /// The oldest winning proposal not yet posted, with its round index.
    pub async fn poll_untweeted(&self) -> Result<Option<(u64, Tweet)>, AgentError> {
        self.call(CallKind::Query, "poll_untweeted", Vec::new())
            .await
    }

    /// Marks the round result at `index` as posted.
    pub async fn post_tweet(&self, index: u64) -> CallResult<()> {
        let args = vec![encode("post_tweet", &index)?];
        self.call_domain(CallKind::Update, "post_tweet", args).await
    }
}

fn encode<T: Serialize + ?Sized>(method: &str, value: &T) -> Result<Value, AgentError> {
    serde_json::to_value(value).map_err(|source| AgentError::Encode {
        method: method.to_string(),
        source,
    })
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.token == other.inner.token
    }
}

impl Eq for Actor {}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("token", &self.inner.token)
            .field("canister_id", &self.inner.canister_id)
            .field("principal", &self.principal())
            .finish()
    }
}
