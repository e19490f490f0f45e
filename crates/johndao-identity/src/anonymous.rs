use johndao_types::Principal;

use crate::{Identity, SignedMessage};

/// The identity of an unauthenticated caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

impl Identity for AnonymousIdentity {
    fn sender(&self) -> Principal {
        Principal::anonymous()
    }

    fn public_key_der(&self) -> Option<Vec<u8>> {
        None
    }

    fn sign(&self, _message: &[u8]) -> Option<SignedMessage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_calls_as_anonymous_principal() {
        let identity = AnonymousIdentity;
        assert_eq!(identity.sender().to_text(), "2vxsx-fae");
        assert!(identity.sign(b"request").is_none());
        assert!(identity.public_key_der().is_none());
    }
}
