//! A local service's reply, carried back to the requester.

use strata_types::{Id, Magic, Splice, ID_LEN, MAGIC_LEN};

use crate::Result;

pub const RESPONSE_MAGIC: Magic = *b"resp";

/// Fixed part: magic, id, port, load and the payload length prefix.
pub const RESPONSE_LEN: usize = MAGIC_LEN + ID_LEN + 2 + 1 + 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub id: Id,
    pub port: u16,
    /// Exit relay load hint, 0 idle to 255 saturated.
    pub load: u8,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn len(&self) -> usize {
        RESPONSE_LEN + self.payload.len()
    }

    pub fn encode(&self, s: &mut Splice) {
        s.magic(&RESPONSE_MAGIC)
            .id(&self.id)
            .uint16(self.port)
            .byte(self.load)
            .payload(&self.payload);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            port: s.read_uint16()?,
            load: s.read_byte()?,
            payload: s.read_payload()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_empty_payload() {
        let r = Response {
            id: Id::random(),
            port: 0,
            load: 0,
            payload: Vec::new(),
        };
        let mut s = Splice::new(r.len());
        r.encode(&mut s);
        assert_eq!(s.len(), RESPONSE_LEN);

        let mut d = Splice::load(s.into_bytes());
        d.read_magic().expect("magic");
        assert_eq!(Response::decode(&mut d).expect("decode"), r);
    }
}
