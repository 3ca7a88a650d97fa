//! Symmetric encryption layer.
//!
//! ```text
//! "crpt" | iv [12] | cloak(to) [8] | sender pub [32]
//! ```
//!
//! Everything after the layer is ChaCha20-encrypted under
//! `onion_cipher(sender, to)`. The recipient finds its key by testing the
//! cloak against the keys it holds, derives the same cipher from the carried
//! sender key and decrypts in place.

use strata_crypto::chacha20::apply_keystream;
use strata_crypto::cloak::{self, Cloak};
use strata_crypto::x25519::{onion_cipher, X25519PublicKey, X25519StaticSecret};
use strata_types::{Iv, Magic, Splice, CLOAK_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use super::Seal;
use crate::Result;

pub const CRYPT_MAGIC: Magic = *b"crpt";
pub const CRYPT_LEN: usize = MAGIC_LEN + IV_LEN + CLOAK_LEN + KEY_LEN;

#[derive(Clone, Debug)]
pub struct Crypt {
    pub iv: Iv,
    pub cloak: Cloak,
    /// The sender's ephemeral public key.
    pub from: X25519PublicKey,
    /// Present on layers built for sending; decoded layers have none.
    pub seal: Option<Seal>,
}

impl Crypt {
    /// A layer that encrypts what follows it to `to`.
    pub fn sealed(to: &X25519PublicKey, from: X25519StaticSecret, iv: Iv, depth: usize) -> Self {
        Self {
            iv,
            cloak: cloak::cloak(to),
            from: from.public_key(),
            seal: Some(Seal {
                to: *to,
                from,
                depth,
            }),
        }
    }

    pub fn is_for(&self, key: &X25519PublicKey) -> bool {
        cloak::matches(&self.cloak, key)
    }

    /// Decrypt (or encrypt) `data` with the cipher shared with the sender.
    pub fn open(&self, ours: &X25519StaticSecret, data: &mut [u8]) {
        apply_keystream(&onion_cipher(ours, &self.from), &self.iv, data);
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&CRYPT_MAGIC)
            .iv(&self.iv)
            .bytes(&self.cloak)
            .bytes(self.from.as_bytes());
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            iv: s.read_iv()?,
            cloak: s.read_array::<CLOAK_LEN>()?,
            from: X25519PublicKey::from_bytes(s.read_array::<KEY_LEN>()?),
            seal: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use strata_types::new_iv;

    use super::*;

    #[test]
    fn test_encode_decode() {
        let to = X25519StaticSecret::random();
        let from = X25519StaticSecret::random();
        let iv = new_iv();
        let c = Crypt::sealed(&to.public_key(), from.clone(), iv, 0);

        let mut s = Splice::new(CRYPT_LEN);
        c.encode(&mut s);
        let mut d = Splice::load(s.into_bytes());
        d.read_magic().expect("magic");
        let got = Crypt::decode(&mut d).expect("decode");

        assert_eq!(got.iv, iv);
        assert_eq!(got.cloak, c.cloak);
        assert_eq!(got.from, from.public_key());
        assert!(got.seal.is_none());
        assert!(got.is_for(&to.public_key()));
        assert!(!got.is_for(&from.public_key()));
    }

    #[test]
    fn test_open_matches_sender_cipher() {
        let to = X25519StaticSecret::random();
        let from = X25519StaticSecret::random();
        let c = Crypt::sealed(&to.public_key(), from.clone(), new_iv(), 0);

        let mut data = b"inner layers".to_vec();
        // Sender side: cipher from its ephemeral secret and the recipient key.
        apply_keystream(&onion_cipher(&from, &to.public_key()), &c.iv, &mut data);
        c.open(&to, &mut data);
        assert_eq!(data, b"inner layers");
    }
}
