//! Signed advertisements.
//!
//! Ads are gossiped whole rather than relayed hop by hop. Each one is signed
//! with Ed25519 over everything before the signature, and is valid only while
//! `expiry` lies strictly in the future.
//!
//! | Ad | Announces |
//! |---|---|
//! | Peer | relay rate |
//! | Address | reachable socket address |
//! | Intro | a hidden service: its key, port and relay rate |

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use strata_crypto::ed25519::{verify_ad, SigningKey};
use strata_crypto::x25519::X25519PublicKey;
use strata_types::{Id, Magic, Splice, ADDR_LEN, ID_LEN, KEY_LEN, MAGIC_LEN, SIGNATURE_LEN, TIME_LEN};

use crate::Result;

pub const PEER_AD_MAGIC: Magic = *b"adpr";
pub const PEER_AD_LEN: usize = MAGIC_LEN + ID_LEN + KEY_LEN + 4 + TIME_LEN + SIGNATURE_LEN;

pub const ADDRESS_AD_MAGIC: Magic = *b"adad";
pub const ADDRESS_AD_LEN: usize = MAGIC_LEN + ID_LEN + KEY_LEN + ADDR_LEN + TIME_LEN + SIGNATURE_LEN;

pub const INTRO_AD_MAGIC: Magic = *b"adin";
pub const INTRO_AD_LEN: usize = MAGIC_LEN + ID_LEN + 2 * KEY_LEN + 4 + 2 + TIME_LEN + SIGNATURE_LEN;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_valid(key: &[u8; KEY_LEN], unsigned: &[u8], signature: &[u8; SIGNATURE_LEN], expiry: u64, now: u64) -> bool {
    expiry > now && verify_ad(key, unsigned, signature).is_ok()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAd {
    pub id: Id,
    pub key: [u8; KEY_LEN],
    pub relay_rate: u32,
    pub expiry: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

impl PeerAd {
    pub fn new(signer: &SigningKey, relay_rate: u32, expiry: u64) -> Self {
        let mut ad = Self {
            id: Id::random(),
            key: signer.verifying_key().to_bytes(),
            relay_rate,
            expiry,
            signature: [0; SIGNATURE_LEN],
        };
        ad.signature = signer.sign_ad(&ad.unsigned()).to_bytes();
        ad
    }

    fn unsigned(&self) -> Vec<u8> {
        let mut s = Splice::new(PEER_AD_LEN - SIGNATURE_LEN);
        s.magic(&PEER_AD_MAGIC)
            .id(&self.id)
            .bytes(&self.key)
            .uint32(self.relay_rate)
            .time(self.expiry);
        s.into_bytes()
    }

    pub fn validate(&self, now: u64) -> bool {
        is_valid(&self.key, &self.unsigned(), &self.signature, self.expiry, now)
    }

    pub fn encode(&self, s: &mut Splice) {
        s.bytes(&self.unsigned()).bytes(&self.signature);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            key: s.read_array()?,
            relay_rate: s.read_uint32()?,
            expiry: s.read_time()?,
            signature: s.read_array()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressAd {
    pub id: Id,
    pub key: [u8; KEY_LEN],
    pub addr: SocketAddr,
    pub expiry: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

impl AddressAd {
    pub fn new(signer: &SigningKey, addr: SocketAddr, expiry: u64) -> Self {
        let mut ad = Self {
            id: Id::random(),
            key: signer.verifying_key().to_bytes(),
            addr,
            expiry,
            signature: [0; SIGNATURE_LEN],
        };
        ad.signature = signer.sign_ad(&ad.unsigned()).to_bytes();
        ad
    }

    fn unsigned(&self) -> Vec<u8> {
        let mut s = Splice::new(ADDRESS_AD_LEN - SIGNATURE_LEN);
        s.magic(&ADDRESS_AD_MAGIC)
            .id(&self.id)
            .bytes(&self.key)
            .addr(&self.addr)
            .time(self.expiry);
        s.into_bytes()
    }

    pub fn validate(&self, now: u64) -> bool {
        is_valid(&self.key, &self.unsigned(), &self.signature, self.expiry, now)
    }

    pub fn encode(&self, s: &mut Splice) {
        s.bytes(&self.unsigned()).bytes(&self.signature);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            key: s.read_array()?,
            addr: s.read_addr()?,
            expiry: s.read_time()?,
            signature: s.read_array()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntroAd {
    pub id: Id,
    pub key: [u8; KEY_LEN],
    /// The hidden service key that route requests are cloaked to.
    pub introducer: X25519PublicKey,
    pub relay_rate: u32,
    pub port: u16,
    pub expiry: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

impl IntroAd {
    pub fn new(signer: &SigningKey, introducer: X25519PublicKey, relay_rate: u32, port: u16, expiry: u64) -> Self {
        let mut ad = Self {
            id: Id::random(),
            key: signer.verifying_key().to_bytes(),
            introducer,
            relay_rate,
            port,
            expiry,
            signature: [0; SIGNATURE_LEN],
        };
        ad.signature = signer.sign_ad(&ad.unsigned()).to_bytes();
        ad
    }

    fn unsigned(&self) -> Vec<u8> {
        let mut s = Splice::new(INTRO_AD_LEN - SIGNATURE_LEN);
        s.magic(&INTRO_AD_MAGIC)
            .id(&self.id)
            .bytes(&self.key)
            .bytes(self.introducer.as_bytes())
            .uint32(self.relay_rate)
            .uint16(self.port)
            .time(self.expiry);
        s.into_bytes()
    }

    pub fn validate(&self, now: u64) -> bool {
        is_valid(&self.key, &self.unsigned(), &self.signature, self.expiry, now)
    }

    pub fn encode(&self, s: &mut Splice) {
        s.bytes(&self.unsigned()).bytes(&self.signature);
    }

    pub fn decode(s: &mut Splice) -> Result<Self> {
        Ok(Self {
            id: s.read_id()?,
            key: s.read_array()?,
            introducer: X25519PublicKey::from_bytes(s.read_array()?),
            relay_rate: s.read_uint32()?,
            port: s.read_uint16()?,
            expiry: s.read_time()?,
            signature: s.read_array()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use strata_crypto::x25519::X25519StaticSecret;

    use super::*;

    fn reload(bytes: Vec<u8>) -> Splice {
        let mut s = Splice::load(bytes);
        s.read_magic().expect("magic");
        s
    }

    #[test]
    fn test_peer_ad_roundtrip_and_validate() {
        let signer = SigningKey::generate();
        let ad = PeerAd::new(&signer, 250, 1_000);
        let mut s = Splice::new(PEER_AD_LEN);
        ad.encode(&mut s);
        assert_eq!(s.len(), PEER_AD_LEN);

        let got = PeerAd::decode(&mut reload(s.into_bytes())).expect("decode");
        assert_eq!(got, ad);
        assert!(got.validate(999));
    }

    #[test]
    fn test_expiry_equal_to_now_is_invalid() {
        let signer = SigningKey::generate();
        let ad = PeerAd::new(&signer, 1, 1_000);
        assert!(!ad.validate(1_000));
        assert!(!ad.validate(1_001));
    }

    #[test]
    fn test_tampered_ad_is_invalid() {
        let signer = SigningKey::generate();
        let mut ad = AddressAd::new(&signer, "203.0.113.5:7000".parse().expect("addr"), unix_now() + 60);
        assert!(ad.validate(unix_now()));

        ad.addr = "203.0.113.6:7000".parse().expect("addr");
        assert!(!ad.validate(unix_now()));
    }

    #[test]
    fn test_wrong_declared_key_is_invalid() {
        let signer = SigningKey::generate();
        let mut ad = PeerAd::new(&signer, 5, unix_now() + 60);
        ad.key = SigningKey::generate().verifying_key().to_bytes();
        assert!(!ad.validate(unix_now()));
    }

    #[test]
    fn test_address_ad_roundtrip() {
        let signer = SigningKey::generate();
        let ad = AddressAd::new(&signer, "[2001:db8::9]:443".parse().expect("addr"), 77);
        let mut s = Splice::new(ADDRESS_AD_LEN);
        ad.encode(&mut s);
        assert_eq!(s.len(), ADDRESS_AD_LEN);
        assert_eq!(AddressAd::decode(&mut reload(s.into_bytes())).expect("decode"), ad);
    }

    #[test]
    fn test_intro_ad_roundtrip_and_validate() {
        let signer = SigningKey::generate();
        let service = X25519StaticSecret::random().public_key();
        let ad = IntroAd::new(&signer, service, 3, 8443, unix_now() + 3600);
        let mut s = Splice::new(INTRO_AD_LEN);
        ad.encode(&mut s);
        assert_eq!(s.len(), INTRO_AD_LEN);

        let got = IntroAd::decode(&mut reload(s.into_bytes())).expect("decode");
        assert_eq!(got, ad);
        assert!(got.validate(unix_now()));
    }
}
