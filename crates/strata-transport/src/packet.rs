//! Sealed packet shards.
//!
//! ## Wire format
//!
//! ```text
//! magic "SPKT" [4] | iv [12] | cloak(receiver) [8] | sender pub [32]
//! ChaCha20-Poly1305( seq u16 | length u32 | parity u8 | id [8] | data ) [..+16]
//! ```
//!
//! The clear header is the AEAD associated data, so any corruption anywhere in
//! the packet fails authentication and the shard is treated as lost.
//! `length` is the byte length of the whole message; with the shard size and
//! parity it fixes the segment layout on the receiving side.

use strata_crypto::chacha20::{self, TAG_SIZE};
use strata_crypto::cloak::{self, Cloak};
use strata_crypto::x25519::{packet_cipher, X25519PublicKey, X25519StaticSecret};
use strata_types::{new_iv, Id, Iv, Magic, Splice, CLOAK_LEN, ID_LEN, IV_LEN, KEY_LEN, MAGIC_LEN};

use crate::{Result, TransportError};

/// Protocol magic at the start of every packet.
pub const PACKET_MAGIC: Magic = *b"SPKT";

/// Clear header: magic, iv, cloak, sender key.
pub const PACKET_HEADER_LEN: usize = MAGIC_LEN + IV_LEN + CLOAK_LEN + KEY_LEN;

/// Sealed fields ahead of the shard data: seq, length, parity, id.
pub const PACKET_FIELDS_LEN: usize = 2 + 4 + 1 + ID_LEN;

/// Bytes a packet adds on top of its shard data.
pub const PACKET_OVERHEAD: usize = PACKET_HEADER_LEN + PACKET_FIELDS_LEN + TAG_SIZE;

/// One decoded shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub id: Id,
    pub seq: u16,
    /// Byte length of the whole message.
    pub length: u32,
    pub parity: u8,
    pub data: Vec<u8>,
}

/// Shards of one message, kept in sequence order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packets(Vec<Packet>);

impl Packets {
    pub fn new(packets: Vec<Packet>) -> Self {
        Self(packets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, packet: Packet) {
        self.0.push(packet);
    }

    /// Sort by sequence number. Stable, so duplicates keep arrival order.
    pub fn sort(&mut self) {
        self.0.sort_by_key(|p| p.seq);
    }

    /// Remove the packet at `index`, keeping the others in order.
    pub fn remove(&mut self, index: usize) -> Option<Packet> {
        (index < self.0.len()).then(|| self.0.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Packet] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Packet> {
        self.0
    }
}

/// Inputs for sealing one shard.
pub struct PacketParams<'a> {
    pub id: Id,
    pub to: &'a X25519PublicKey,
    pub from: &'a X25519StaticSecret,
    pub parity: u8,
    pub seq: u16,
    pub length: u32,
    pub data: &'a [u8],
}

/// The clear header of a received packet.
#[derive(Clone, Debug)]
pub struct PacketHeader {
    pub iv: Iv,
    pub to: Cloak,
    pub from: X25519PublicKey,
}

/// Seal one shard into packet bytes.
pub fn encode_packet(p: &PacketParams<'_>) -> Result<Vec<u8>> {
    let iv = new_iv();
    let mut header = Splice::new(PACKET_HEADER_LEN);
    header
        .magic(&PACKET_MAGIC)
        .iv(&iv)
        .bytes(&cloak::cloak(p.to))
        .bytes(p.from.public_key().as_bytes());

    let mut body = Splice::new(PACKET_FIELDS_LEN + p.data.len());
    body.uint16(p.seq)
        .uint32(p.length)
        .byte(p.parity)
        .id(&p.id)
        .bytes(p.data);

    let key = packet_cipher(p.from, p.to);
    let sealed = chacha20::seal(&key, &iv, body.as_bytes(), header.as_bytes())?;

    let mut out = header.into_bytes();
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Read the clear header of a packet.
pub fn packet_header(b: &[u8]) -> Result<PacketHeader> {
    let mut s = Splice::load(b.to_vec());
    s.check(PACKET_OVERHEAD, &PACKET_MAGIC)?;
    let magic = s.read_magic()?;
    if magic != PACKET_MAGIC {
        return Err(TransportError::InvalidPacket(format!(
            "bad magic {}",
            strata_types::magic_str(&magic)
        )));
    }
    Ok(PacketHeader {
        iv: s.read_iv()?,
        to: s.read_array::<CLOAK_LEN>()?,
        from: X25519PublicKey::from_bytes(s.read_array::<KEY_LEN>()?),
    })
}

/// Authenticate and open a packet addressed to `to`.
pub fn decode_packet(b: &[u8], to: &X25519StaticSecret) -> Result<Packet> {
    let header = packet_header(b)?;
    if !cloak::matches(&header.to, &to.public_key()) {
        return Err(TransportError::NotForUs);
    }

    let key = packet_cipher(to, &header.from);
    let (clear, sealed) = b.split_at(PACKET_HEADER_LEN);
    let body = chacha20::open(&key, &header.iv, sealed, clear)?;

    let mut s = Splice::load(body);
    s.check(PACKET_FIELDS_LEN, &PACKET_MAGIC)?;
    let seq = s.read_uint16()?;
    let length = s.read_uint32()?;
    let parity = s.read_byte()?;
    let id = s.read_id()?;
    Ok(Packet {
        id,
        seq,
        length,
        parity,
        data: s.rest().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u16) -> Packet {
        Packet {
            id: Id([1; ID_LEN]),
            seq,
            length: 10,
            parity: 0,
            data: vec![seq as u8],
        }
    }

    #[test]
    fn test_encode_decode() {
        let sender = X25519StaticSecret::random();
        let receiver = X25519StaticSecret::random();
        let id = Id::random();
        let data = b"shard payload".to_vec();

        let bytes = encode_packet(&PacketParams {
            id,
            to: &receiver.public_key(),
            from: &sender,
            parity: 64,
            seq: 513,
            length: 70_000,
            data: &data,
        })
        .expect("encode");
        assert_eq!(bytes.len(), data.len() + PACKET_OVERHEAD);

        let header = packet_header(&bytes).expect("header");
        assert_eq!(header.from, sender.public_key());

        let p = decode_packet(&bytes, &receiver).expect("decode");
        assert_eq!(
            p,
            Packet {
                id,
                seq: 513,
                length: 70_000,
                parity: 64,
                data,
            }
        );
    }

    #[test]
    fn test_wrong_receiver_is_not_for_us() {
        let sender = X25519StaticSecret::random();
        let receiver = X25519StaticSecret::random();
        let bytes = encode_packet(&PacketParams {
            id: Id::random(),
            to: &receiver.public_key(),
            from: &sender,
            parity: 0,
            seq: 0,
            length: 1,
            data: b"x",
        })
        .expect("encode");

        let stranger = X25519StaticSecret::random();
        assert!(matches!(
            decode_packet(&bytes, &stranger),
            Err(TransportError::NotForUs)
        ));
    }

    #[test]
    fn test_corruption_fails_authentication() {
        let sender = X25519StaticSecret::random();
        let receiver = X25519StaticSecret::random();
        let mut bytes = encode_packet(&PacketParams {
            id: Id::random(),
            to: &receiver.public_key(),
            from: &sender,
            parity: 0,
            seq: 0,
            length: 4,
            data: b"data",
        })
        .expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(matches!(
            decode_packet(&bytes, &receiver),
            Err(TransportError::Crypto(_))
        ));
    }

    #[test]
    fn test_truncated_is_too_short() {
        let err = packet_header(&[0u8; 10]).expect_err("short");
        assert!(matches!(
            err,
            TransportError::Splice(strata_types::SpliceError::TooShort { required, .. })
                if required == PACKET_OVERHEAD
        ));
    }

    #[test]
    fn test_sort_and_ordered_remove() {
        let mut packets = Packets::new(vec![sample(3), sample(0), sample(2), sample(1)]);
        packets.sort();
        let seqs: Vec<u16> = packets.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        let removed = packets.remove(1).expect("in range");
        assert_eq!(removed.seq, 1);
        let seqs: Vec<u16> = packets.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 2, 3]);
        assert!(packets.remove(10).is_none());
    }
}
