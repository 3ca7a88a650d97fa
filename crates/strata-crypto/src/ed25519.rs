//! Ed25519 advertisement signatures (RFC 8032).
//!
//! Peer, address and intro ads are signed over a domain-separated digest of
//! their unsigned encoding ([`ad_digest`]). A receiver checks the signature
//! against the key the ad itself declares ([`verify_ad`]); Ed25519 has no key
//! recovery, so the declared key is the only candidate.

use ed25519_dalek::{Signer, Verifier};

use crate::blake3::{self, contexts};
use crate::{CryptoError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// A node's advertisement key. The seed is wiped on drop.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

/// The public half of a [`SigningKey`], as carried in ads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign the unsigned encoding of an advertisement.
    pub fn sign_ad(&self, unsigned: &[u8]) -> Signature {
        Signature(self.0.sign(&ad_digest(unsigned)))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SigningKey").field(&self.verifying_key()).finish()
    }
}

impl VerifyingKey {
    /// Fails if `bytes` is not a valid curve point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LEN]) -> Result<Self> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LEN]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }
}

/// `derive_key("Strata v1 ad-signature", unsigned)`
pub fn ad_digest(unsigned: &[u8]) -> [u8; 32] {
    blake3::derive_key(contexts::AD_SIGNATURE, unsigned)
}

/// Check an ad signature against the key the ad declares.
pub fn verify_ad(key: &[u8; PUBLIC_KEY_LEN], unsigned: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
    let key = VerifyingKey::from_bytes(key)?;
    key.0
        .verify(&ad_digest(unsigned), &Signature::from_bytes(signature).0)
        .map_err(|_| CryptoError::SignatureVerification)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ad_signature_verifies() {
        let sk = SigningKey::generate();
        let sig = sk.sign_ad(b"adpr body");
        verify_ad(&sk.verifying_key().to_bytes(), b"adpr body", &sig.to_bytes()).expect("valid ad");
    }

    #[test]
    fn test_ad_with_changed_body_fails() {
        let sk = SigningKey::generate();
        let sig = sk.sign_ad(b"adpr body");
        let err = verify_ad(&sk.verifying_key().to_bytes(), b"adpr bodY", &sig.to_bytes());
        assert!(matches!(err, Err(CryptoError::SignatureVerification)));
    }

    #[test]
    fn test_ad_under_other_declared_key_fails() {
        let sig = SigningKey::generate().sign_ad(b"body");
        let other = SigningKey::generate().verifying_key().to_bytes();
        assert!(matches!(
            verify_ad(&other, b"body", &sig.to_bytes()),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn test_signature_is_over_digest_not_body() {
        let sk = SigningKey::from_seed(&[5; 32]);
        let body = b"adad body";
        let raw = sk.0.sign(body);
        assert_ne!(sk.sign_ad(body).0, raw);
        assert_ne!(&ad_digest(body), ::blake3::hash(body).as_bytes());
    }

    #[test]
    fn test_seed_fixes_key() {
        let a = SigningKey::from_seed(&[42; 32]);
        assert_eq!(a.verifying_key(), SigningKey::from_seed(&[42; 32]).verifying_key());
        assert_ne!(a.verifying_key(), SigningKey::from_seed(&[43; 32]).verifying_key());
    }

    #[test]
    fn test_debug_shows_public_half_only() {
        let sk = SigningKey::from_seed(&[1; 32]);
        assert!(format!("{sk:?}").starts_with("SigningKey(VerifyingKey("));
    }
}
