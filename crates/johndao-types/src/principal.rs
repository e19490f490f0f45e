//! Principals: the addresses of canisters and callers.
//!
//! The textual form is the one used across the network:
//! `base32(crc32_be(bytes) ++ bytes)`, lowercase, unpadded, grouped into
//! five-character chunks joined by `-`.

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha224};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a principal in bytes.
pub const MAX_PRINCIPAL_BYTES: usize = 29;

const SELF_AUTHENTICATING_TAG: u8 = 0x02;
const ANONYMOUS_TAG: u8 = 0x04;

/// An opaque identifier for a canister or a caller.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

/// Errors produced while parsing or constructing a principal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrincipalError {
    /// More than [`MAX_PRINCIPAL_BYTES`] bytes.
    #[error("principal is {0} bytes, limit is {MAX_PRINCIPAL_BYTES}")]
    TooLong(usize),
    /// Text is not valid base32.
    #[error("principal text is not valid base32: {0}")]
    InvalidBase32(String),
    /// Decoded text is too short to hold a checksum.
    #[error("principal text is too short")]
    TooShort,
    /// The embedded CRC32 does not match the bytes.
    #[error("principal checksum mismatch")]
    ChecksumMismatch,
    /// Text decodes, but is not in canonical form.
    #[error("principal text is not canonical, expected {0}")]
    NotCanonical(String),
}

impl Principal {
    /// The anonymous principal (`2vxsx-fae`).
    pub fn anonymous() -> Self {
        Self(vec![ANONYMOUS_TAG])
    }

    /// Builds a principal from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalError::TooLong`] if `bytes` exceeds the limit.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrincipalError> {
        if bytes.len() > MAX_PRINCIPAL_BYTES {
            return Err(PrincipalError::TooLong(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Derives the self-authenticating principal of a DER-encoded public key.
    ///
    /// Formula: `sha224(der) ++ 0x02`.
    pub fn self_authenticating(public_key_der: &[u8]) -> Self {
        let mut bytes = Sha224::digest(public_key_der).to_vec();
        bytes.push(SELF_AUTHENTICATING_TAG);
        Self(bytes)
    }

    /// Returns true for the anonymous principal.
    pub fn is_anonymous(&self) -> bool {
        self.0 == [ANONYMOUS_TAG]
    }

    /// Raw principal bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the canonical textual form.
    pub fn to_text(&self) -> String {
        let checksum = crc32fast::hash(&self.0).to_be_bytes();
        let mut buf = Vec::with_capacity(4 + self.0.len());
        buf.extend_from_slice(&checksum);
        buf.extend_from_slice(&self.0);

        let encoded = BASE32_NOPAD.encode(&buf).to_ascii_lowercase();
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(5)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        chunks.join("-")
    }

    /// Parses the canonical textual form.
    ///
    /// # Errors
    ///
    /// Returns a [`PrincipalError`] if the text is malformed, the checksum
    /// does not match, or the text is not canonical.
    pub fn from_text(text: &str) -> Result<Self, PrincipalError> {
        let compact: String = text
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let decoded = BASE32_NOPAD
            .decode(compact.as_bytes())
            .map_err(|e| PrincipalError::InvalidBase32(e.to_string()))?;
        if decoded.len() < 4 {
            return Err(PrincipalError::TooShort);
        }

        let (checksum, bytes) = decoded.split_at(4);
        if crc32fast::hash(bytes).to_be_bytes() != checksum {
            return Err(PrincipalError::ChecksumMismatch);
        }

        let principal = Self::from_slice(bytes)?;
        let canonical = principal.to_text();
        if canonical != text {
            return Err(PrincipalError::NotCanonical(canonical));
        }
        Ok(principal)
    }

    /// Hex encoding of the raw bytes, used in log fields.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.to_text())
    }
}

impl FromStr for Principal {
    type Err = PrincipalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_text(&text).map_err(serde::de::Error::custom)
    }
}
