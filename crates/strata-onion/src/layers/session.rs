//! Session purchase: hands a relay the key pair for one paid hop.
//!
//! The relay hashes the two private keys into the payment preimage and only
//! installs the session if a payment with that preimage is waiting.

use strata_crypto::x25519::X25519StaticSecret;
use strata_types::{Magic, Splice, KEY_LEN, MAGIC_LEN};

use crate::session::preimage_hash;
use crate::Result;

pub const SESSION_MAGIC: Magic = *b"sess";
pub const SESSION_LEN: usize = MAGIC_LEN + 1 + 2 * KEY_LEN;

#[derive(Clone, Debug)]
pub struct Session {
    pub hop: u8,
    pub header: X25519StaticSecret,
    pub payload: X25519StaticSecret,
}

impl Session {
    pub fn preimage(&self) -> [u8; 32] {
        preimage_hash(&self.header, &self.payload)
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&SESSION_MAGIC)
            .byte(self.hop)
            .bytes(&self.header.to_bytes())
            .bytes(&self.payload.to_bytes());
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            hop: s.read_byte()?,
            header: X25519StaticSecret::from_bytes(s.read_array::<KEY_LEN>()?),
            payload: X25519StaticSecret::from_bytes(s.read_array::<KEY_LEN>()?),
        })
    }
}
