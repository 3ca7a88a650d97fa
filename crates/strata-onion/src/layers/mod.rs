//! Onion layer variants.
//!
//! Every wire layer starts with a 4-byte magic. [`LayerKind`] carries that
//! magic as its discriminant, read as a little-endian `u32`, so the variant
//! set is closed and matched exhaustively by the dispatch loop.
//!
//! Layers are encoded flat, one after another. Encryption of what follows a
//! `Crypt` or `Route` layer is applied afterwards by
//! [`Onion::encode`](crate::onion::Onion::encode), which knows every layer's
//! offset.

use strata_crypto::chacha20::apply_keystream;
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_types::{magic_str, Iv, Magic, Splice, KEY_LEN};

use crate::{OnionError, Result};

pub mod ads;
pub mod balance;
pub mod confirm;
pub mod crypt;
pub mod exit;
pub mod forward;
pub mod ready;
pub mod response;
pub mod reverse;
pub mod route;
pub mod session;

use ads::{AddressAd, IntroAd, PeerAd};
use balance::{Balance, GetBalance};
use confirm::Confirm;
use crypt::Crypt;
use exit::Exit;
use forward::Forward;
use ready::Ready;
use response::Response;
use reverse::Reverse;
use route::Route;
use session::Session;

/// A symmetric key for one reply hop.
pub type Cipher = [u8; KEY_LEN];

/// Reply keys in the order they are applied: return hop first.
pub type Ciphers = [Cipher; 3];
pub type Nonces = [Iv; 3];

/// Encode-side instructions for encrypting the bytes after a layer.
#[derive(Clone, Debug)]
pub struct Seal {
    pub to: X25519PublicKey,
    pub from: X25519StaticSecret,
    /// Zero seals everything to the end of the onion. `d > 0` seals only
    /// `d - 1` reply slots, which is how reverse headers nest.
    pub depth: usize,
}

const fn tag(magic: &Magic) -> u32 {
    u32::from_le_bytes(*magic)
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Forward = tag(&forward::FORWARD_MAGIC),
    Reverse = tag(&reverse::REVERSE_MAGIC),
    Crypt = tag(&crypt::CRYPT_MAGIC),
    Route = tag(&route::ROUTE_MAGIC),
    Exit = tag(&exit::EXIT_MAGIC),
    Response = tag(&response::RESPONSE_MAGIC),
    Session = tag(&session::SESSION_MAGIC),
    Confirm = tag(&confirm::CONFIRM_MAGIC),
    Balance = tag(&balance::BALANCE_MAGIC),
    GetBalance = tag(&balance::GET_BALANCE_MAGIC),
    Ready = tag(&ready::READY_MAGIC),
    PeerAd = tag(&ads::PEER_AD_MAGIC),
    AddressAd = tag(&ads::ADDRESS_AD_MAGIC),
    IntroAd = tag(&ads::INTRO_AD_MAGIC),
    /// Terminal marker. Zero length, so never seen on the wire.
    End = 0,
}

impl LayerKind {
    /// Every kind that can appear on the wire.
    pub const WIRE: [LayerKind; 14] = [
        LayerKind::Forward,
        LayerKind::Reverse,
        LayerKind::Crypt,
        LayerKind::Route,
        LayerKind::Exit,
        LayerKind::Response,
        LayerKind::Session,
        LayerKind::Confirm,
        LayerKind::Balance,
        LayerKind::GetBalance,
        LayerKind::Ready,
        LayerKind::PeerAd,
        LayerKind::AddressAd,
        LayerKind::IntroAd,
    ];

    pub fn magic(self) -> Magic {
        (self as u32).to_le_bytes()
    }

    /// Smallest encoding of this kind, magic included.
    pub fn min_len(self) -> usize {
        match self {
            LayerKind::Forward => forward::FORWARD_LEN,
            LayerKind::Reverse => reverse::REVERSE_LEN,
            LayerKind::Crypt => crypt::CRYPT_LEN,
            LayerKind::Route => route::ROUTE_LEN,
            LayerKind::Exit => exit::EXIT_LEN,
            LayerKind::Response => response::RESPONSE_LEN,
            LayerKind::Session => session::SESSION_LEN,
            LayerKind::Confirm => confirm::CONFIRM_LEN,
            LayerKind::Balance => balance::BALANCE_LEN,
            LayerKind::GetBalance => balance::GET_BALANCE_LEN,
            LayerKind::Ready => ready::READY_LEN,
            LayerKind::PeerAd => ads::PEER_AD_LEN,
            LayerKind::AddressAd => ads::ADDRESS_AD_LEN,
            LayerKind::IntroAd => ads::INTRO_AD_LEN,
            LayerKind::End => 0,
        }
    }
}

/// One layer of an onion.
#[derive(Clone, Debug)]
pub enum Layer {
    Forward(Forward),
    Reverse(Reverse),
    Crypt(Crypt),
    Route(Route),
    Exit(Exit),
    Response(Response),
    Session(Session),
    Confirm(Confirm),
    Balance(Balance),
    GetBalance(GetBalance),
    Ready(Ready),
    PeerAd(PeerAd),
    AddressAd(AddressAd),
    IntroAd(IntroAd),
    End,
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Forward(_) => LayerKind::Forward,
            Layer::Reverse(_) => LayerKind::Reverse,
            Layer::Crypt(_) => LayerKind::Crypt,
            Layer::Route(_) => LayerKind::Route,
            Layer::Exit(_) => LayerKind::Exit,
            Layer::Response(_) => LayerKind::Response,
            Layer::Session(_) => LayerKind::Session,
            Layer::Confirm(_) => LayerKind::Confirm,
            Layer::Balance(_) => LayerKind::Balance,
            Layer::GetBalance(_) => LayerKind::GetBalance,
            Layer::Ready(_) => LayerKind::Ready,
            Layer::PeerAd(_) => LayerKind::PeerAd,
            Layer::AddressAd(_) => LayerKind::AddressAd,
            Layer::IntroAd(_) => LayerKind::IntroAd,
            Layer::End => LayerKind::End,
        }
    }

    pub fn magic(&self) -> Magic {
        self.kind().magic()
    }

    /// Exact encoded length of this layer.
    pub fn len(&self) -> usize {
        match self {
            Layer::Exit(x) => x.len(),
            Layer::Response(x) => x.len(),
            other => other.kind().min_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self, s: &mut Splice) {
        match self {
            Layer::Forward(x) => x.encode(s),
            Layer::Reverse(x) => x.encode(s),
            Layer::Crypt(x) => x.encode(s),
            Layer::Route(x) => x.encode(s),
            Layer::Exit(x) => x.encode(s),
            Layer::Response(x) => x.encode(s),
            Layer::Session(x) => x.encode(s),
            Layer::Confirm(x) => x.encode(s),
            Layer::Balance(x) => x.encode(s),
            Layer::GetBalance(x) => x.encode(s),
            Layer::Ready(x) => x.encode(s),
            Layer::PeerAd(x) => x.encode(s),
            Layer::AddressAd(x) => x.encode(s),
            Layer::IntroAd(x) => x.encode(s),
            Layer::End => {}
        }
    }

    /// Decode a layer of `kind` at the cursor.
    ///
    /// Checks the fixed length up front, so a truncated layer fails with
    /// `TooShort` naming its magic before any field is read.
    pub fn decode(kind: LayerKind, s: &mut Splice) -> Result<Self> {
        if kind == LayerKind::End {
            return Ok(Layer::End);
        }
        let expected = kind.magic();
        s.check(kind.min_len(), &expected)?;
        let magic = s.read_magic()?;
        if magic != expected {
            return Err(OnionError::InvalidOnion(format!(
                "expected {} found {}",
                magic_str(&expected),
                magic_str(&magic)
            )));
        }

        Ok(match kind {
            LayerKind::Forward => Layer::Forward(Forward::decode(s)?),
            LayerKind::Reverse => Layer::Reverse(Reverse::decode(s)?),
            LayerKind::Crypt => Layer::Crypt(Crypt::decode(s)?),
            LayerKind::Route => Layer::Route(Route::decode(s)?),
            LayerKind::Exit => Layer::Exit(Exit::decode(s)?),
            LayerKind::Response => Layer::Response(Response::decode(s)?),
            LayerKind::Session => Layer::Session(Session::decode(s)?),
            LayerKind::Confirm => Layer::Confirm(Confirm::decode(s)?),
            LayerKind::Balance => Layer::Balance(Balance::decode(s)?),
            LayerKind::GetBalance => Layer::GetBalance(GetBalance::decode(s)?),
            LayerKind::Ready => Layer::Ready(Ready::decode(s)?),
            LayerKind::PeerAd => Layer::PeerAd(PeerAd::decode(s)?),
            LayerKind::AddressAd => Layer::AddressAd(AddressAd::decode(s)?),
            LayerKind::IntroAd => Layer::IntroAd(IntroAd::decode(s)?),
            LayerKind::End => Layer::End,
        })
    }
}

pub(crate) fn write_reply_keys(s: &mut Splice, ciphers: &Ciphers, nonces: &Nonces) {
    for c in ciphers {
        s.bytes(c);
    }
    for n in nonces {
        s.iv(n);
    }
}

pub(crate) fn read_reply_keys(s: &mut Splice) -> Result<(Ciphers, Nonces)> {
    let ciphers = [
        s.read_array::<KEY_LEN>()?,
        s.read_array::<KEY_LEN>()?,
        s.read_array::<KEY_LEN>()?,
    ];
    let nonces = [s.read_iv()?, s.read_iv()?, s.read_iv()?];
    Ok((ciphers, nonces))
}

/// Apply the three reply keystreams to `data`.
///
/// Keystreams commute, so the reply hops can strip them in any order.
pub fn apply_reply_ciphers(ciphers: &Ciphers, nonces: &Nonces, data: &mut [u8]) {
    for (cipher, nonce) in ciphers.iter().zip(nonces) {
        apply_keystream(cipher, nonce, data);
    }
}
