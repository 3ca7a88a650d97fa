//! X25519 key agreement (RFC 7748).
//!
//! Node identities, session header/payload keys and the per-layer ephemeral
//! sender keys are all X25519 keys. [`onion_cipher`] turns one agreement into
//! the symmetric key used to encrypt or decrypt an onion layer.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::blake3::{self, contexts};

/// An X25519 static secret key.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct X25519StaticSecret {
    inner: StaticSecret,
}

/// An X25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey {
    bytes: [u8; 32],
}

/// An X25519 shared secret.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl X25519StaticSecret {
    /// Generate a new random static secret.
    pub fn random() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Get the raw bytes of this secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Compute the corresponding public key.
    pub fn public_key(&self) -> X25519PublicKey {
        let pk = PublicKey::from(&self.inner);
        X25519PublicKey {
            bytes: pk.to_bytes(),
        }
    }

    /// Perform Diffie-Hellman key agreement.
    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> SharedSecret {
        let pk = PublicKey::from(their_public.bytes);
        let shared = self.inner.diffie_hellman(&pk);
        SharedSecret {
            bytes: *shared.as_bytes(),
        }
    }
}

impl std::fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519StaticSecret")
            .field("public", &self.public_key())
            .finish()
    }
}

impl X25519PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Get the raw bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl SharedSecret {
    /// Get the raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Derive the symmetric onion cipher shared by `ours` and `theirs`.
///
/// `cipher = BLAKE3::derive_key("Strata v1 onion-cipher", X25519(ours, theirs))`
///
/// Both ends compute the same key: the sender from its ephemeral secret and the
/// receiver's public key, the receiver from its own secret and the sender's
/// public key carried in the layer.
pub fn onion_cipher(ours: &X25519StaticSecret, theirs: &X25519PublicKey) -> [u8; 32] {
    let shared = ours.diffie_hellman(theirs);
    blake3::derive_key(contexts::ONION_CIPHER, shared.as_bytes())
}

/// Derive the per-link packet cipher for the segmentation layer.
pub fn packet_cipher(ours: &X25519StaticSecret, theirs: &X25519PublicKey) -> [u8; 32] {
    let shared = ours.diffie_hellman(theirs);
    blake3::derive_key(contexts::PACKET_CIPHER, shared.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        let sender = X25519StaticSecret::random();
        let relay = X25519StaticSecret::random();
        let a = sender.diffie_hellman(&relay.public_key());
        let b = relay.diffie_hellman(&sender.public_key());
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(
            onion_cipher(&sender, &relay.public_key()),
            onion_cipher(&relay, &sender.public_key())
        );
    }

    #[test]
    fn test_onion_and_packet_ciphers_differ() {
        let sender = X25519StaticSecret::random();
        let relay = X25519StaticSecret::random().public_key();
        assert_ne!(onion_cipher(&sender, &relay), packet_cipher(&sender, &relay));
    }

    #[test]
    fn test_secret_survives_byte_round_trip() {
        let secret = X25519StaticSecret::random();
        let restored = X25519StaticSecret::from_bytes(secret.to_bytes());
        assert_eq!(secret.public_key(), restored.public_key());
    }

    #[test]
    fn test_debug_hides_secret() {
        let secret = X25519StaticSecret::from_bytes([9; 32]);
        let shown = format!("{secret:?}");
        assert!(!shown.contains(&format!("{:?}", [9u8; 32])));
        assert!(shown.contains("public"));
    }

    #[test]
    fn test_rfc7748_public_key() {
        let private = hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
            .expect("valid hex");
        let public = hex::decode("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a")
            .expect("valid hex");
        let bytes: [u8; 32] = private.try_into().expect("32 bytes");
        let computed = X25519StaticSecret::from_bytes(bytes).public_key();
        assert_eq!(computed.as_bytes().as_slice(), public.as_slice());
    }
}
