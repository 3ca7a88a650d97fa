//! Session balance query and answer.
//!
//! `GetBalance` travels like an exit request: the relay at the pivot position
//! reports what remains of the session it was reached through, and sends a
//! `Balance` back over the supplied reply header. `id` correlates the reply;
//! `conf_id` names the session.

use strata_types::{Amount, Id, Magic, Splice, ID_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use super::{read_reply_keys, write_reply_keys, Ciphers, Nonces};
use crate::Result;

pub const BALANCE_MAGIC: Magic = *b"bala";
pub const BALANCE_LEN: usize = MAGIC_LEN + 2 * ID_LEN + 8;

pub const GET_BALANCE_MAGIC: Magic = *b"gbal";
pub const GET_BALANCE_LEN: usize = MAGIC_LEN + 2 * ID_LEN + 3 * KEY_LEN + 3 * IV_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub id: Id,
    pub conf_id: Id,
    pub amount: Amount,
}

impl Balance {
    pub fn encode(&self, s: &mut Splice) {
        s.magic(&BALANCE_MAGIC)
            .id(&self.id)
            .id(&self.conf_id)
            .uint64(self.amount);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            conf_id: s.read_id()?,
            amount: s.read_uint64()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBalance {
    pub id: Id,
    pub conf_id: Id,
    pub ciphers: Ciphers,
    pub nonces: Nonces,
}

impl GetBalance {
    pub fn encode(&self, s: &mut Splice) {
        s.magic(&GET_BALANCE_MAGIC).id(&self.id).id(&self.conf_id);
        write_reply_keys(s, &self.ciphers, &self.nonces);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        let id = s.read_id()?;
        let conf_id = s.read_id()?;
        let (ciphers, nonces) = read_reply_keys(s)?;
        Ok(Self {
            id,
            conf_id,
            ciphers,
            nonces,
        })
    }
}
