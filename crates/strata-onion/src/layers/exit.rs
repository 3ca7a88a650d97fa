//! Exit request: deliver a payload to a local service and send back its reply.

use strata_types::{Id, Magic, Splice, ID_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use super::{read_reply_keys, write_reply_keys, Ciphers, Nonces};
use crate::Result;

pub const EXIT_MAGIC: Magic = *b"exit";

/// Fixed part: magic, port, reply keys, id and the payload length prefix.
pub const EXIT_LEN: usize = MAGIC_LEN + 2 + 3 * KEY_LEN + 3 * IV_LEN + ID_LEN + 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exit {
    pub port: u16,
    pub ciphers: Ciphers,
    pub nonces: Nonces,
    pub id: Id,
    pub payload: Vec<u8>,
}

impl Exit {
    pub fn len(&self) -> usize {
        EXIT_LEN + self.payload.len()
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&EXIT_MAGIC).uint16(self.port);
        write_reply_keys(s, &self.ciphers, &self.nonces);
        s.id(&self.id).payload(&self.payload);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        let port = s.read_uint16()?;
        let (ciphers, nonces) = read_reply_keys(s)?;
        Ok(Self {
            port,
            ciphers,
            nonces,
            id: s.read_id()?,
            payload: s.read_payload()?,
        })
    }
}
