//! Hidden service rendezvous request.
//!
//! ```text
//! "rout" | cloak(service) [8] | sender pub [32] | iv [12]
//! sealed: id [8] | 3 ciphers [32] | 3 nonces [12] | reply header ...
//! ```
//!
//! Everything after the clear header, including the requester's reply header,
//! is encrypted to the hidden service key.

use strata_crypto::cloak::{self, Cloak};
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_types::{Id, Iv, Magic, Splice, CLOAK_LEN, ID_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use super::{read_reply_keys, write_reply_keys, Ciphers, Nonces, Seal};
use crate::Result;

pub const ROUTE_MAGIC: Magic = *b"rout";
pub const ROUTE_CLEAR_LEN: usize = MAGIC_LEN + CLOAK_LEN + KEY_LEN + IV_LEN;
pub const ROUTE_BODY_LEN: usize = ID_LEN + 3 * KEY_LEN + 3 * IV_LEN;
pub const ROUTE_LEN: usize = ROUTE_CLEAR_LEN + ROUTE_BODY_LEN;

/// The encrypted part of a route request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteBody {
    pub id: Id,
    pub ciphers: Ciphers,
    pub nonces: Nonces,
}

impl RouteBody {
    pub fn encode(&self, s: &mut Splice) {
        s.id(&self.id);
        write_reply_keys(s, &self.ciphers, &self.nonces);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        let id = s.read_id()?;
        let (ciphers, nonces) = read_reply_keys(s)?;
        Ok(Self { id, ciphers, nonces })
    }
}

#[derive(Clone, Debug)]
pub struct Route {
    pub cloak: Cloak,
    pub from: X25519PublicKey,
    pub iv: Iv,
    /// Meaningful only once the sealed region has been opened.
    pub body: RouteBody,
    pub seal: Option<Seal>,
}

impl Route {
    pub fn sealed(service: &X25519PublicKey, from: X25519StaticSecret, iv: Iv, body: RouteBody) -> Self {
        Self {
            cloak: cloak::cloak(service),
            from: from.public_key(),
            iv,
            body,
            seal: Some(Seal {
                to: *service,
                from,
                depth: 0,
            }),
        }
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&ROUTE_MAGIC)
            .bytes(&self.cloak)
            .bytes(self.from.as_bytes())
            .iv(&self.iv);
        self.body.encode(s);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            cloak: s.read_array::<CLOAK_LEN>()?,
            from: X25519PublicKey::from_bytes(s.read_array::<KEY_LEN>()?),
            iv: s.read_iv()?,
            body: RouteBody::decode(s)?,
            seal: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use strata_types::new_iv;

    use super::*;

    #[test]
    fn test_encode_decode_clear() {
        let service = X25519StaticSecret::random();
        let from = X25519StaticSecret::random();
        let body = RouteBody {
            id: Id::random(),
            ciphers: [[7; 32], [8; 32], [9; 32]],
            nonces: [[1; 12], [2; 12], [3; 12]],
        };
        let r = Route::sealed(&service.public_key(), from.clone(), new_iv(), body.clone());

        let mut s = Splice::new(ROUTE_LEN);
        r.encode(&mut s);
        assert_eq!(s.len(), ROUTE_LEN);

        let mut d = Splice::load(s.into_bytes());
        d.read_magic().expect("magic");
        let got = Route::decode(&mut d).expect("decode");
        assert!(cloak::matches(&got.cloak, &service.public_key()));
        assert_eq!(got.from, from.public_key());
        assert_eq!(got.iv, r.iv);
        // Not yet encrypted: encryption happens when the whole onion is encoded.
        assert_eq!(got.body, body);
    }
}
