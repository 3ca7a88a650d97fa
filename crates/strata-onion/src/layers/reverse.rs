//! Reply slot address.
//!
//! A `Reverse` layer is always followed by a `Crypt` layer; the pair forms one
//! slot of a reply header. The relay named by `addr` opens its slot, strips
//! one cipher from the reply payload and shifts the remaining slots up.

use std::net::SocketAddr;

use strata_types::{Magic, Splice, ADDR_LEN, MAGIC_LEN};

use crate::Result;

pub const REVERSE_MAGIC: Magic = *b"rvrs";
pub const REVERSE_LEN: usize = MAGIC_LEN + ADDR_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reverse {
    pub addr: SocketAddr,
}

impl Reverse {
    pub fn encode(&self, s: &mut Splice) {
        s.magic(&REVERSE_MAGIC).addr(&self.addr);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            addr: s.read_addr()?,
        })
    }
}
