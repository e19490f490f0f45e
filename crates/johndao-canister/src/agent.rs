//! Transport to the canister.
//!
//! An [`Agent`] carries one method call, with positional JSON arguments,
//! from a caller identity to a canister and returns the JSON reply.
//! [`HttpAgent`] does so over an HTTP gateway with signed envelopes.

use async_trait::async_trait;
use johndao_identity::Identity;
use johndao_types::Principal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Domain separator prepended to the hash of every signed request.
pub const REQUEST_DOMAIN_SEPARATOR: &[u8] = b"\x0Aic-request";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INGRESS_EXPIRY: Duration = Duration::from_secs(240);

/// Whether a call reads (`query`) or may change canister state (`update`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Query,
    Update,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Update => "update",
        }
    }
}

/// Transport-level failures. Domain errors travel inside successful replies.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The gateway could not be reached or the connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with a non-success HTTP status.
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The canister rejected the call before running it.
    #[error("call rejected ({code}): {message}")]
    Rejected { code: u32, message: String },

    /// Arguments could not be encoded.
    #[error("failed to encode arguments for {method}: {source}")]
    Encode {
        method: String,
        source: serde_json::Error,
    },

    /// The reply did not have the expected shape.
    #[error("failed to decode reply of {method}: {source}")]
    Decode {
        method: String,
        source: serde_json::Error,
    },
}

/// A transport that delivers canister calls.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Calls `method` on `canister_id` as `identity` and returns the reply.
    async fn call(
        &self,
        kind: CallKind,
        canister_id: &Principal,
        method: &str,
        args: Vec<Value>,
        identity: &dyn Identity,
    ) -> Result<Value, AgentError>;
}

/// The signed part of a request.
#[derive(Debug, Serialize)]
struct CallContent<'a> {
    request_type: CallKind,
    canister_id: String,
    method_name: &'a str,
    arg: &'a [Value],
    sender: String,
    ingress_expiry: u64,
    nonce: String,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    content: CallContent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_sig: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallResponse {
    Replied { reply: Value },
    Rejected { reject_code: u32, reject_message: String },
}

/// Canister transport over an HTTP gateway.
///
/// Each call is a `POST {host}/canister/{canister_id}/{method}` whose body
/// is an envelope of the request content, the caller's DER public key, and
/// its signature over `domain separator || sha256(content)`. Anonymous
/// callers send no key or signature.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    host: String,
    ingress_expiry: Duration,
}

impl HttpAgent {
    /// Creates an agent for the gateway at `host` (e.g. `https://ic0.app`).
    pub fn new(host: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("johndao/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_client(host, client)
    }

    /// Creates an agent using a preconfigured HTTP client.
    pub fn with_client(host: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            ingress_expiry: DEFAULT_INGRESS_EXPIRY,
        }
    }

    /// The gateway base URL.
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// The bytes an identity signs for `content`.
fn signable(content: &[u8]) -> Vec<u8> {
    let mut message = REQUEST_DOMAIN_SEPARATOR.to_vec();
    message.extend_from_slice(&Sha256::digest(content));
    message
}

fn expiry_nanos(after: Duration) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from((now + after).as_nanos()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Agent for HttpAgent {
    async fn call(
        &self,
        kind: CallKind,
        canister_id: &Principal,
        method: &str,
        args: Vec<Value>,
        identity: &dyn Identity,
    ) -> Result<Value, AgentError> {
        let content = CallContent {
            request_type: kind,
            canister_id: canister_id.to_text(),
            method_name: method,
            arg: &args,
            sender: identity.sender().to_text(),
            ingress_expiry: expiry_nanos(self.ingress_expiry),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        };
        let content_bytes = serde_json::to_vec(&content).map_err(|source| AgentError::Encode {
            method: method.to_string(),
            source,
        })?;
        let signed = identity.sign(&signable(&content_bytes));
        let envelope = Envelope {
            content,
            sender_pubkey: signed.as_ref().map(|s| hex::encode(&s.public_key_der)),
            sender_sig: signed.as_ref().map(|s| hex::encode(&s.signature)),
        };

        let url = format!("{}/canister/{}/{}", self.host, canister_id, method);
        tracing::debug!(%url, kind = kind.as_str(), "canister call");

        let resp = self.client.post(&url).json(&envelope).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        match serde_json::from_slice::<CallResponse>(&body) {
            Ok(CallResponse::Replied { reply }) => Ok(reply),
            Ok(CallResponse::Rejected {
                reject_code,
                reject_message,
            }) => Err(AgentError::Rejected {
                code: reject_code,
                message: reject_message,
            }),
            Err(source) => Err(AgentError::Decode {
                method: method.to_string(),
                source,
            }),
        }
    }
}
