//! Onion assembly and encoding.
//!
//! An [`Onion`] is a flat list of layers, outermost first, always ending in
//! `End`. [`Onion::encode`] writes every layer in order and then seals, from
//! the innermost layer outwards, whatever each `Crypt` or `Route` layer
//! covers. A relay peels one `Crypt` and sees the next layer in the clear.
//!
//! [`Skins`] builds layer lists and remembers which session each `Crypt`
//! belongs to, so the client can work out billing (see [`crate::account`]).
//! The shape functions at the bottom build the onions the client sends.
//!
//! ## Reply headers
//!
//! A reply header is three `Reverse` + `Crypt` slots. The first slot's
//! `Crypt` seals the next two slots, the second seals the third, and the
//! third seals nothing. Each reply hop opens its slot, shifts the rest of the
//! header up and pads the end with noise, so the header never shrinks.

use std::net::SocketAddr;

use rand::RngCore;
use strata_crypto::chacha20::apply_keystream;
use strata_crypto::x25519::{onion_cipher, X25519PublicKey, X25519StaticSecret};
use strata_types::{new_iv, Id, Iv, Splice};

use crate::layers::balance::GetBalance;
use crate::layers::confirm::Confirm;
use crate::layers::crypt::{Crypt, CRYPT_LEN};
use crate::layers::exit::Exit;
use crate::layers::forward::Forward;
use crate::layers::reverse::Reverse;
use crate::layers::route::{Route, RouteBody, ROUTE_CLEAR_LEN};
use crate::layers::session::Session;
use crate::layers::{Ciphers, Layer, Nonces};
use crate::session::{Node, SessionData};
use crate::{OnionError, Result, REVERSE_HEADER_LEN, REVERSE_LAYER_LEN};

#[derive(Clone, Debug)]
pub struct Onion {
    layers: Vec<Layer>,
}

/// Wire bytes of an onion plus the offset of every layer in them.
#[derive(Clone, Debug)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub offsets: Vec<usize>,
}

impl Onion {
    /// Terminate `layers` with `End`. Anything after an `End` is invalid.
    pub fn assemble(mut layers: Vec<Layer>) -> Result<Self> {
        match layers.iter().position(|l| matches!(l, Layer::End)) {
            Some(pos) if pos + 1 != layers.len() => {
                return Err(OnionError::InvalidOnion(format!(
                    "{} layers after End",
                    layers.len() - pos - 1
                )));
            }
            Some(_) => {}
            None => layers.push(Layer::End),
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Encoded length of the whole onion.
    pub fn len(&self) -> usize {
        self.len_from(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded length from layer `i` to the end.
    pub fn len_from(&self, i: usize) -> usize {
        self.layers.iter().skip(i).map(Layer::len).sum()
    }

    pub fn encode(&self) -> Encoded {
        let total = self.len();
        let mut s = Splice::new(total);
        let mut offsets = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            offsets.push(s.cursor());
            layer.encode(&mut s);
        }

        let mut bytes = s.into_bytes();
        for (layer, &offset) in self.layers.iter().zip(&offsets).rev() {
            let (seal, iv, start) = match layer {
                Layer::Crypt(Crypt { seal: Some(seal), iv, .. }) => (seal, iv, offset + CRYPT_LEN),
                Layer::Route(Route { seal: Some(seal), iv, .. }) => (seal, iv, offset + ROUTE_CLEAR_LEN),
                _ => continue,
            };
            let end = match seal.depth {
                0 => total,
                depth => (start + (depth - 1) * REVERSE_LAYER_LEN).min(total),
            };
            if let Some(region) = bytes.get_mut(start..end) {
                apply_keystream(&onion_cipher(&seal.from, &seal.to), iv, region);
            }
        }

        Encoded { bytes, offsets }
    }
}

/// An assembled onion and, per layer, the session its `Crypt` is sealed to.
#[derive(Clone, Debug)]
pub struct Assembled {
    pub onion: Onion,
    pub billing: Vec<Option<SessionData>>,
}

/// Layer list builder.
#[derive(Clone, Debug, Default)]
pub struct Skins {
    layers: Vec<Layer>,
    billing: Vec<Option<SessionData>>,
}

impl Skins {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, layer: Layer, session: Option<SessionData>) -> Self {
        self.layers.push(layer);
        self.billing.push(session);
        self
    }

    pub fn layer(self, layer: Layer) -> Self {
        self.push(layer, None)
    }

    pub fn forward(self, addr: SocketAddr) -> Self {
        self.layer(Layer::Forward(Forward { addr }))
    }

    pub fn reverse(self, addr: SocketAddr) -> Self {
        self.layer(Layer::Reverse(Reverse { addr }))
    }

    fn sealed_crypt(
        self,
        to: &X25519PublicKey,
        from: X25519StaticSecret,
        iv: Iv,
        depth: usize,
        session: Option<SessionData>,
    ) -> Self {
        self.push(Layer::Crypt(Crypt::sealed(to, from, iv, depth)), session)
    }

    /// Seal everything that follows to `to`.
    pub fn crypt(self, to: &X25519PublicKey, session: Option<SessionData>) -> Self {
        self.sealed_crypt(to, X25519StaticSecret::random(), new_iv(), 0, session)
    }

    /// Hand the rest of the onion to a session's relay.
    pub fn forward_crypt(self, session: &SessionData) -> Self {
        self.forward(session.node.addr)
            .crypt(&session.header_pub, Some(session.clone()))
    }

    /// One reply slot for `session`.
    pub fn reverse_crypt(self, session: &SessionData, from: X25519StaticSecret, iv: Iv, depth: usize) -> Self {
        self.reverse(session.node.addr)
            .sealed_crypt(&session.header_pub, from, iv, depth, Some(session.clone()))
    }

    pub fn assemble(self) -> Result<Assembled> {
        let Self { layers, mut billing } = self;
        let onion = Onion::assemble(layers)?;
        billing.resize(onion.layers().len(), None);
        Ok(Assembled { onion, billing })
    }
}

/// Key material for a three-hop reply path.
///
/// Reply hops are the two reverse relays and the sender's return session.
/// `ciphers`/`nonces` go to whoever produces the reply; the header built by
/// [`ReplyKeys::header`] lets each hop strip one of them.
pub struct ReplyKeys {
    sessions: [SessionData; 3],
    secrets: [X25519StaticSecret; 3],
    ivs: [Iv; 3],
    pub ciphers: Ciphers,
    pub nonces: Nonces,
}

impl ReplyKeys {
    pub fn new(first: &SessionData, second: &SessionData, ret: &SessionData) -> Self {
        let secrets = [
            X25519StaticSecret::random(),
            X25519StaticSecret::random(),
            X25519StaticSecret::random(),
        ];
        let ivs = [new_iv(), new_iv(), new_iv()];
        let ciphers = [
            onion_cipher(&secrets[2], &ret.payload_pub),
            onion_cipher(&secrets[1], &second.payload_pub),
            onion_cipher(&secrets[0], &first.payload_pub),
        ];
        let nonces = [ivs[2], ivs[1], ivs[0]];
        Self {
            sessions: [first.clone(), second.clone(), ret.clone()],
            secrets,
            ivs,
            ciphers,
            nonces,
        }
    }

    /// Append the three reply slots.
    pub fn header(self, skins: Skins) -> Skins {
        let [s0, s1, s2] = self.sessions;
        let [k0, k1, k2] = self.secrets;
        let [i0, i1, i2] = self.ivs;
        skins
            .reverse_crypt(&s0, k0, i0, 3)
            .reverse_crypt(&s1, k1, i1, 2)
            .reverse_crypt(&s2, k2, i2, 1)
    }
}

/// Open one reply slot at a reverse hop.
///
/// `buf` starts at the hop's own `Reverse` layer and `crypt` is the slot's
/// decoded `Crypt`. Returns the header shifted up one slot and padded with
/// noise, followed by the reply with this hop's cipher removed.
pub fn shift_reply_header(buf: &[u8], crypt: &Crypt, session: &SessionData) -> Result<Vec<u8>> {
    if buf.len() < REVERSE_HEADER_LEN {
        return Err(OnionError::InvalidOnion(format!(
            "reply of {} bytes is shorter than its header",
            buf.len()
        )));
    }
    let (header, reply) = buf.split_at(REVERSE_HEADER_LEN);
    let mut shifted = header[REVERSE_LAYER_LEN..].to_vec();
    crypt.open(&session.header, &mut shifted);

    let mut noise = vec![0u8; REVERSE_LAYER_LEN];
    rand::thread_rng().fill_bytes(&mut noise);
    shifted.extend_from_slice(&noise);

    let mut reply = reply.to_vec();
    crypt.open(&session.payload, &mut reply);
    shifted.extend_from_slice(&reply);
    Ok(shifted)
}

fn six(sessions: &[SessionData]) -> Result<&[SessionData; 6]> {
    sessions
        .try_into()
        .map_err(|_| OnionError::HopMismatch { hops: 6, sessions: sessions.len() })
}

/// Request to a service on the exit relay's `port`.
///
/// `sessions` are hops 0 to 4 and the return session.
pub fn exit_onion(sessions: &[SessionData], port: u16, id: Id, payload: Vec<u8>) -> Result<Assembled> {
    let [s0, s1, s2, s3, s4, ret] = six(sessions)?;
    let keys = ReplyKeys::new(s3, s4, ret);
    let exit = Exit {
        port,
        ciphers: keys.ciphers,
        nonces: keys.nonces,
        id,
        payload,
    };
    let skins = Skins::new()
        .forward_crypt(s0)
        .forward_crypt(s1)
        .forward_crypt(s2)
        .layer(Layer::Exit(exit));
    keys.header(skins).assemble()
}

/// Ask the hop 2 relay what remains of its session.
pub fn get_balance_onion(sessions: &[SessionData], id: Id) -> Result<Assembled> {
    let [s0, s1, s2, s3, s4, ret] = six(sessions)?;
    let keys = ReplyKeys::new(s3, s4, ret);
    let query = GetBalance {
        id,
        conf_id: s2.id,
        ciphers: keys.ciphers,
        nonces: keys.nonces,
    };
    let skins = Skins::new()
        .forward_crypt(s0)
        .forward_crypt(s1)
        .forward_crypt(s2)
        .layer(Layer::GetBalance(query));
    keys.header(skins).assemble()
}

/// Rendezvous request to a hidden service hosted at `host`.
///
/// `sessions` are hops 0, 1, 3, 4 and the return session.
pub fn route_onion(sessions: &[SessionData], host: SocketAddr, service: &X25519PublicKey, id: Id) -> Result<Assembled> {
    let [s0, s1, s3, s4, ret] = sessions else {
        return Err(OnionError::HopMismatch {
            hops: 5,
            sessions: sessions.len(),
        });
    };
    let keys = ReplyKeys::new(s3, s4, ret);
    let body = RouteBody {
        id,
        ciphers: keys.ciphers,
        nonces: keys.nonces,
    };
    let route = Route::sealed(service, X25519StaticSecret::random(), new_iv(), body);
    let skins = Skins::new()
        .forward_crypt(s0)
        .forward_crypt(s1)
        .forward(host)
        .layer(Layer::Route(route));
    keys.header(skins).assemble()
}

/// Deliver each session's keys to its relay, then a confirmation back to
/// `client`.
pub fn purchase_onion(sessions: &[SessionData], client: &Node, id: Id) -> Result<Assembled> {
    let mut skins = Skins::new();
    for s in sessions {
        skins = skins
            .forward(s.node.addr)
            .crypt(&s.node.identity, None)
            .layer(Layer::Session(Session {
                hop: s.hop,
                header: s.header.clone(),
                payload: s.payload.clone(),
            }));
    }
    skins
        .forward(client.addr)
        .crypt(&client.identity, None)
        .layer(Layer::Confirm(Confirm { id, load: 0 }))
        .assemble()
}

/// A standalone reply header and its keys, as a hidden service hands out
/// in `Ready`.
pub fn reply_header(first: &SessionData, second: &SessionData, ret: &SessionData) -> Result<(Vec<u8>, Ciphers, Nonces)> {
    let keys = ReplyKeys::new(first, second, ret);
    let (ciphers, nonces) = (keys.ciphers, keys.nonces);
    let header = keys.header(Skins::new()).assemble()?.onion.encode().bytes;
    Ok((header, ciphers, nonces))
}
