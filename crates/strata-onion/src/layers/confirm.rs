//! Session purchase confirmation.

use strata_types::{Id, Magic, Splice, ID_LEN, MAGIC_LEN};

use crate::Result;

pub const CONFIRM_MAGIC: Magic = *b"conf";
pub const CONFIRM_LEN: usize = MAGIC_LEN + ID_LEN + 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirm {
    pub id: Id,
    pub load: u8,
}

impl Confirm {
    pub fn encode(&self, s: &mut Splice) {
        s.magic(&CONFIRM_MAGIC).id(&self.id).byte(self.load);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            load: s.read_byte()?,
        })
    }
}
