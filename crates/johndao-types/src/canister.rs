//! Records exchanged with the voting canister.

use crate::Principal;
use serde::{Deserialize, Serialize};

/// How a canister user authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginMethod {
    /// Signed in through the Internet Identity flow.
    II,
    /// Signed in through Twitter and a session-held key.
    Twitter,
    /// Any other method, by name.
    Other(String),
}

/// Human-verification state of a canister user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Bot,
}

/// Profile badges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Badge {
    #[serde(rename = "OG")]
    Og,
    Donated,
    Other(String),
}

/// A user record as stored by the canister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub user_name: Option<String>,
    pub login_method: LoginMethod,
    pub badges: Vec<Badge>,
    pub new_auth: Option<(Principal, LoginMethod)>,
    pub karma: i32,
    pub withdrawable_e8s: u64,
    pub deposit_address: Option<Vec<u8>>,
    pub payment_in_progress: bool,
    pub created_proposal: Option<u32>,
    pub upvotes: Vec<u32>,
    pub downvotes: Vec<u32>,
    pub verification_status: VerificationStatus,
    pub last_updated: u64,
    pub nr_posts_this_round: u32,
}

impl User {
    /// Display name, falling back to `Anon` for users without one.
    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or("Anon")
    }

    /// Hex form of the deposit account identifier, if set.
    pub fn deposit_address_hex(&self) -> Option<String> {
        self.deposit_address.as_ref().map(hex::encode)
    }
}

/// Content queued for the social feed once a proposal wins its round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tweet {
    /// Plain text.
    Tweet(String),
    /// Text with an image stored at `image_path` (a download URL).
    ImageTweet { tweet: String, image_path: String },
}

impl Tweet {
    /// The text part of the tweet.
    pub fn text(&self) -> &str {
        match self {
            Self::Tweet(text) => text,
            Self::ImageTweet { tweet, .. } => tweet,
        }
    }
}

/// The caller's vote on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpvoteStatus {
    Upvoted,
    Downvoted,
    NotVoted,
}

/// A vote cast on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Upvote,
    Downvote,
}

/// Proposal summary as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalInfo {
    pub id: u32,
    pub tweet: Tweet,
    pub points: i32,
    pub created_by: u32,
    pub created_at: u64,
    pub upvote_status: UpvoteStatus,
    pub nr_of_reports: u32,
    pub reported: bool,
}

/// Argument of `create_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserArg {
    pub principal: Principal,
}

/// Argument of `create_proposal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProposalArg {
    pub tweet: Tweet,
}

/// Canister-wide limits, changed through `update_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub round_duration_seconds: u64,
    pub max_state_size_bytes: u32,
    pub reward_per_round_e8s: u64,
    pub max_proposals_per_round: u32,
    pub max_proposals_per_user: u32,
    pub max_tweet_length: u32,
}

/// Result of `get_changed_users`: changed users plus the canister's backup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedUsers {
    pub users: Vec<(Principal, User)>,
    pub backup_time: u64,
}
