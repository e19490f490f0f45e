use johndao_types::Principal;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde_json::Value;
use std::fmt;

use crate::{Identity, IdentityError, SignedMessage};

/// SubjectPublicKeyInfo header for an uncompressed secp256k1 key
/// (`id-ecPublicKey`, curve `secp256k1`, 65-byte bit string).
pub const SECP256K1_DER_PREFIX: [u8; 23] = [
    0x30, 0x56, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x0a, 0x03, 0x42, 0x00,
];

/// A secp256k1 key pair used as a caller identity.
#[derive(Clone)]
pub struct Secp256k1Identity {
    signing_key: SigningKey,
    /// Uncompressed SEC1 encoding, 65 bytes.
    public_key: Vec<u8>,
}

impl Secp256k1Identity {
    /// Generates a fresh key pair from the operating system RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self {
            signing_key,
            public_key,
        }
    }

    /// Builds an identity from a 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidSecretKey`] if the bytes are not a
    /// valid non-zero scalar.
    pub fn from_secret_key(secret: &[u8]) -> Result<Self, IdentityError> {
        let signing_key =
            SigningKey::from_slice(secret).map_err(|_| IdentityError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Parses the JSON credential text `["<public hex>", "<secret hex>"]`.
    ///
    /// # Errors
    ///
    /// See [`Secp256k1Identity::from_parsed_json`].
    pub fn from_json(text: &str) -> Result<Self, IdentityError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| IdentityError::MalformedCredential(e.to_string()))?;
        Self::from_parsed_json(&value)
    }

    /// Parses an already-decoded JSON credential.
    ///
    /// The public key may be compressed or uncompressed but must belong to
    /// the secret key.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] naming the first problem found.
    pub fn from_parsed_json(value: &Value) -> Result<Self, IdentityError> {
        let (public_hex, secret_hex): (String, String) = serde_json::from_value(value.clone())
            .map_err(|e| IdentityError::MalformedCredential(e.to_string()))?;

        let secret = hex::decode(secret_hex).map_err(|_| IdentityError::InvalidHex)?;
        let public = hex::decode(public_hex).map_err(|_| IdentityError::InvalidHex)?;

        let identity = Self::from_secret_key(&secret)?;
        let claimed =
            VerifyingKey::from_sec1_bytes(&public).map_err(|_| IdentityError::InvalidPublicKey)?;
        if &claimed != identity.signing_key.verifying_key() {
            return Err(IdentityError::KeyMismatch);
        }
        Ok(identity)
    }

    /// The JSON credential form, as stored in session documents.
    pub fn to_json(&self) -> Value {
        Value::Array(vec![
            Value::String(hex::encode(&self.public_key)),
            Value::String(hex::encode(self.signing_key.to_bytes())),
        ])
    }

    /// Uncompressed SEC1 public key.
    pub fn public_key_raw(&self) -> &[u8] {
        &self.public_key
    }

    /// DER (SubjectPublicKeyInfo) public key.
    pub fn der(&self) -> Vec<u8> {
        let mut der = Vec::with_capacity(SECP256K1_DER_PREFIX.len() + self.public_key.len());
        der.extend_from_slice(&SECP256K1_DER_PREFIX);
        der.extend_from_slice(&self.public_key);
        der
    }
}

impl Identity for Secp256k1Identity {
    fn sender(&self) -> Principal {
        Principal::self_authenticating(&self.der())
    }

    fn public_key_der(&self) -> Option<Vec<u8>> {
        Some(self.der())
    }

    fn sign(&self, message: &[u8]) -> Option<SignedMessage> {
        let signature: Signature = self.signing_key.sign(message);
        Some(SignedMessage {
            public_key_der: self.der(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

impl fmt::Debug for Secp256k1Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secp256k1Identity")
            .field("principal", &self.sender())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
