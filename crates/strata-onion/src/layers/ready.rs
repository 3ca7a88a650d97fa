//! Hidden service answer to a route request.
//!
//! Carries the service's own reply header and keys so the requester can reach
//! it later without learning where it is.

use strata_crypto::x25519::X25519PublicKey;
use strata_types::{Id, Magic, Splice, ID_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use super::{read_reply_keys, write_reply_keys, Ciphers, Nonces};
use crate::{OnionError, Result, REVERSE_HEADER_LEN};

pub const READY_MAGIC: Magic = *b"redy";
pub const READY_LEN: usize = MAGIC_LEN + ID_LEN + KEY_LEN + REVERSE_HEADER_LEN + 3 * KEY_LEN + 3 * IV_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ready {
    pub id: Id,
    pub service: X25519PublicKey,
    /// Reply header leading back to the service. Exactly three slots.
    pub header: Vec<u8>,
    pub ciphers: Ciphers,
    pub nonces: Nonces,
}

impl Ready {
    pub fn new(id: Id, service: X25519PublicKey, header: Vec<u8>, ciphers: Ciphers, nonces: Nonces) -> Result<Self> {
        if header.len() != REVERSE_HEADER_LEN {
            return Err(OnionError::InvalidOnion(format!(
                "reply header is {} bytes, expected {REVERSE_HEADER_LEN}",
                header.len()
            )));
        }
        Ok(Self {
            id,
            service,
            header,
            ciphers,
            nonces,
        })
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&READY_MAGIC)
            .id(&self.id)
            .bytes(self.service.as_bytes())
            .bytes(&self.header);
        write_reply_keys(s, &self.ciphers, &self.nonces);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        let id = s.read_id()?;
        let service = X25519PublicKey::from_bytes(s.read_array::<KEY_LEN>()?);
        let header = s.read_vec(REVERSE_HEADER_LEN)?;
        let (ciphers, nonces) = read_reply_keys(s)?;
        Ok(Self {
            id,
            service,
            header,
            ciphers,
            nonces,
        })
    }
}
