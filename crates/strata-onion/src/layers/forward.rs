//! Forwarding instruction: send the rest of the onion to `addr`.

use std::net::SocketAddr;

use strata_types::{Magic, Splice, ADDR_LEN, MAGIC_LEN};

use crate::Result;

pub const FORWARD_MAGIC: Magic = *b"forw";
pub const FORWARD_LEN: usize = MAGIC_LEN + ADDR_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forward {
    pub addr: SocketAddr,
}

impl Forward {
    pub fn encode(&self, s: &mut Splice) {
        s.magic(&FORWARD_MAGIC).addr(&self.addr);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            addr: s.read_addr()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        for addr in ["192.0.2.7:9000", "[2001:db8::42]:65535"] {
            let f = Forward {
                addr: addr.parse().expect("addr"),
            };
            let mut s = Splice::new(FORWARD_LEN);
            f.encode(&mut s);
            assert_eq!(s.cursor(), FORWARD_LEN);

            let mut r = Splice::load(s.into_bytes());
            assert_eq!(&r.read_magic().expect("magic"), b"forw");
            assert_eq!(Forward::decode(&mut r).expect("decode"), f);
        }
    }
}
