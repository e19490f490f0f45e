//! Caller identities for canister calls.
//!
//! An [`Identity`] names the caller (its [`Principal`]) and signs the
//! requests made on its behalf. Two kinds exist here:
//!
//! - [`Secp256k1Identity`], a locally held key pair. Session documents store
//!   it in the JSON credential form `[publicKeyHex, secretKeyHex]`.
//! - [`AnonymousIdentity`], which signs nothing and calls as the anonymous
//!   principal.
//!
//! Identities produced by an external interactive login implement the same
//! trait in the client crate.

mod anonymous;
mod secp256k1;

use johndao_types::Principal;
use thiserror::Error;

pub use anonymous::AnonymousIdentity;
pub use secp256k1::{Secp256k1Identity, SECP256K1_DER_PREFIX};

/// Errors produced while loading or using an identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The credential is not the two-element JSON array of hex strings.
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// A key component is not valid hex.
    #[error("credential is not valid hex")]
    InvalidHex,

    /// The secret key is not a valid secp256k1 scalar.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// The public key is not a valid SEC1 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The public key does not belong to the secret key.
    #[error("public key does not match secret key")]
    KeyMismatch,
}

/// A signature together with the public key that verifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    /// DER-encoded public key of the signer.
    pub public_key_der: Vec<u8>,
    /// Raw 64-byte `r || s` signature.
    pub signature: Vec<u8>,
}

/// A caller identity.
pub trait Identity: Send + Sync {
    /// The principal requests are sent as.
    fn sender(&self) -> Principal;

    /// DER public key, or `None` for identities that do not sign.
    fn public_key_der(&self) -> Option<Vec<u8>>;

    /// Signs `message`. Identities that do not sign return `None`.
    fn sign(&self, message: &[u8]) -> Option<SignedMessage>;
}
