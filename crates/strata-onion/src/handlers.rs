//! Per-layer handlers run by the dispatch loop.
//!
//! A message is handled one layer at a time. Each handler either consumes
//! the message (sends it on, hands it to a service, resolves a pending
//! response) or returns the buffer with its cursor past what it handled,
//! plus the session the next layer is billed to.

use tracing::{debug, trace};

use strata_crypto::chacha20::apply_keystream;
use strata_crypto::x25519::onion_cipher;
use strata_types::{Id, Splice, KEY_LEN};

use crate::engine::Engine;
use crate::layers::ads::unix_now;
use crate::layers::balance::{Balance, GetBalance};
use crate::layers::crypt::Crypt;
use crate::layers::exit::Exit;
use crate::layers::forward::Forward;
use crate::layers::ready::Ready;
use crate::layers::response::Response;
use crate::layers::reverse::{Reverse, REVERSE_MAGIC};
use crate::layers::route::{Route, RouteBody, ROUTE_CLEAR_LEN};
use crate::layers::session::Session;
use crate::layers::{apply_reply_ciphers, Ciphers, Layer, LayerKind, Nonces};
use crate::onion::{reply_header, shift_reply_header};
use crate::session::{Intro, Node, SessionData};
use crate::{OnionError, REVERSE_HEADER_LEN, RETURN_HOP};

pub(crate) enum Flow {
    /// Keep dispatching at the buffer's cursor.
    Continue {
        buf: Splice,
        session: Option<SessionData>,
    },
    Done,
}

/// `header || body`, with the reply ciphers applied to the body.
fn sealed_reply(header: &[u8], body: &Layer, ciphers: &Ciphers, nonces: &Nonces) -> Splice {
    let mut s = Splice::new(header.len() + body.len());
    s.bytes(header);
    body.encode(&mut s);
    let mut bytes = s.into_bytes();
    if let Some(tail) = bytes.get_mut(header.len()..) {
        apply_reply_ciphers(ciphers, nonces, tail);
    }
    Splice::load(bytes)
}

fn encoded(layer: &Layer) -> Vec<u8> {
    let mut s = Splice::new(layer.len());
    layer.encode(&mut s);
    s.into_bytes()
}

impl Engine {
    /// Dispatch one inbound buffer until a handler consumes it or it is
    /// dropped. Errors only ever drop the message.
    pub(crate) async fn handle_message(&self, bytes: Vec<u8>) {
        let mut buf = Splice::load(bytes);
        let mut session: Option<SessionData> = None;
        loop {
            buf = buf.budge_up();
            let Some(kind) = self.registry.recognise(&buf) else {
                return;
            };
            let layer = match Layer::decode(kind, &mut buf) {
                Ok(layer) => layer,
                Err(e) => {
                    debug!(?kind, len = buf.len(), error = %e, "dropping malformed layer");
                    return;
                }
            };
            match self.handle_layer(layer, buf, session).await {
                Flow::Continue { buf: next, session: s } => {
                    buf = next;
                    session = s;
                }
                Flow::Done => return,
            }
        }
    }

    async fn handle_layer(&self, layer: Layer, buf: Splice, session: Option<SessionData>) -> Flow {
        match layer {
            Layer::Forward(fw) => self.on_forward(fw, buf, session),
            Layer::Crypt(c) => self.on_crypt(c, buf),
            Layer::Reverse(rv) => self.on_reverse(rv, buf),
            Layer::Exit(exit) => self.on_exit(exit, buf, session).await,
            Layer::GetBalance(q) => self.on_get_balance(q, buf, session),
            Layer::Route(route) => self.on_route(route, buf),
            Layer::Session(sess) => self.on_session(sess, buf),
            Layer::Response(resp) => self.on_response(resp, &buf),
            Layer::Confirm(conf) => {
                let id = conf.id;
                self.resolve_pending(id, &buf, encoded(&Layer::Confirm(conf)), |_| {})
            }
            Layer::Balance(bal) => {
                let (id, conf_id, amount) = (bal.id, bal.conf_id, bal.amount);
                self.resolve_pending(id, &buf, encoded(&Layer::Balance(bal)), |engine| {
                    engine.manager.set_remaining(&conf_id, amount);
                })
            }
            Layer::Ready(ready) => {
                let (id, bytes) = (ready.id, encoded(&Layer::Ready(ready.clone())));
                self.resolve_pending(id, &buf, bytes, move |engine| {
                    engine.hidden.add_rendezvous(ready);
                })
            }
            Layer::PeerAd(ad) => {
                if ad.validate(unix_now()) {
                    let rate = ad.relay_rate;
                    self.apply_ad(&ad.key, "peer", |n| n.relay_rate = rate);
                } else {
                    debug!(id = %ad.id, "invalid peer ad");
                }
                Flow::Done
            }
            Layer::AddressAd(ad) => {
                if ad.validate(unix_now()) {
                    let addr = ad.addr;
                    self.apply_ad(&ad.key, "address", |n| n.addr = addr);
                } else {
                    debug!(id = %ad.id, "invalid address ad");
                }
                Flow::Done
            }
            Layer::IntroAd(ad) => {
                if ad.validate(unix_now()) {
                    let intro = Intro {
                        key: ad.introducer,
                        port: ad.port,
                        relay_rate: ad.relay_rate,
                    };
                    self.apply_ad(&ad.key, "intro", |n| {
                        n.services.retain(|s| s.key != intro.key);
                        n.services.push(intro);
                    });
                } else {
                    debug!(id = %ad.id, "invalid intro ad");
                }
                Flow::Done
            }
            Layer::End => Flow::Done,
        }
    }

    fn apply_ad<F>(&self, signing: &[u8; KEY_LEN], what: &str, update: F)
    where
        F: FnOnce(&mut Node),
    {
        if !self.manager.update_node(signing, update) {
            trace!(what, "ad from unknown node");
        }
    }

    fn on_forward(&self, fw: Forward, buf: Splice, session: Option<SessionData>) -> Flow {
        if fw.addr == self.local.addr {
            return Flow::Continue { buf, session };
        }
        if let Some(s) = &session {
            self.manager.dec_session(&s.id, s.cost(buf.len()), "forward");
        }
        if let Err(e) = self.transport.send(fw.addr, buf.rest().to_vec()) {
            debug!(addr = %fw.addr, error = %e, "forward failed");
        }
        Flow::Done
    }

    fn on_crypt(&self, c: Crypt, mut buf: Splice) -> Flow {
        if c.is_for(&self.identity.public_key()) {
            c.open(&self.identity, buf.rest_mut());
            return Flow::Continue { buf, session: None };
        }
        match self.manager.find_cloaked(&c.cloak) {
            Some(s) => {
                c.open(&s.header, buf.rest_mut());
                Flow::Continue {
                    buf,
                    session: Some(s),
                }
            }
            None => {
                trace!("crypt layer not for us");
                Flow::Done
            }
        }
    }

    /// A reply slot. Ours: open it and shift the header. Otherwise pass the
    /// whole reply, slot included, to the named hop.
    fn on_reverse(&self, rv: Reverse, mut buf: Splice) -> Flow {
        if rv.addr != self.local.addr {
            if let Err(e) = self.transport.send(rv.addr, buf.as_bytes().to_vec()) {
                debug!(addr = %rv.addr, error = %e, "reverse relay failed");
            }
            return Flow::Done;
        }

        let crypt = match Layer::decode(LayerKind::Crypt, &mut buf) {
            Ok(Layer::Crypt(c)) => c,
            _ => {
                debug!(len = buf.len(), "reverse slot without crypt");
                return Flow::Done;
            }
        };
        let Some(session) = self.manager.find_cloaked(&crypt.cloak) else {
            trace!("reverse slot not for us");
            return Flow::Done;
        };
        let shifted = match shift_reply_header(buf.as_bytes(), &crypt, &session) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "dropping reply");
                return Flow::Done;
            }
        };
        self.manager.dec_session(&session.id, session.cost(shifted.len()), "reverse");

        let mut next = Splice::load(shifted);
        if next.peek_magic() != Some(REVERSE_MAGIC) {
            // Last slot: the reply body follows the spent header.
            next.set_cursor(REVERSE_HEADER_LEN);
        }
        Flow::Continue {
            buf: next,
            session: None,
        }
    }

    async fn on_exit(&self, exit: Exit, mut buf: Splice, session: Option<SessionData>) -> Flow {
        let Some(session) = session else {
            debug!(id = %exit.id, "exit without a session");
            return Flow::Done;
        };
        let request = buf.len();
        let header = match buf.read_vec(REVERSE_HEADER_LEN) {
            Ok(h) => h,
            Err(e) => {
                debug!(id = %exit.id, error = %e, "exit without reply header");
                return Flow::Done;
            }
        };

        let reply = self
            .services
            .exchange(exit.port, exit.payload, self.config.exit_timeout)
            .await;
        let response = Layer::Response(Response {
            id: exit.id,
            port: exit.port,
            load: self.load(),
            payload: reply,
        });
        let rb = sealed_reply(&header, &response, &exit.ciphers, &exit.nonces);
        self.manager
            .dec_session(&session.id, session.exit_cost(request, rb.len()), "exit");
        trace!(id = %exit.id, port = exit.port, request, reply = rb.len(), "exit served");
        Flow::Continue {
            buf: rb,
            session: None,
        }
    }

    fn on_get_balance(&self, q: GetBalance, mut buf: Splice, session: Option<SessionData>) -> Flow {
        let Some(session) = session.filter(|s| s.id == q.conf_id) else {
            debug!(id = %q.id, "balance query for another session");
            return Flow::Done;
        };
        let request = buf.len();
        let Ok(header) = buf.read_vec(REVERSE_HEADER_LEN) else {
            debug!(id = %q.id, "balance query without reply header");
            return Flow::Done;
        };

        let reply_len = REVERSE_HEADER_LEN + LayerKind::Balance.min_len();
        self.manager
            .dec_session(&session.id, session.exit_cost(request, reply_len), "balance");
        let amount = self
            .manager
            .session(&session.id)
            .map(|s| s.remaining)
            .unwrap_or(0);
        let balance = Layer::Balance(Balance {
            id: q.id,
            conf_id: q.conf_id,
            amount,
        });
        Flow::Continue {
            buf: sealed_reply(&header, &balance, &q.ciphers, &q.nonces),
            session: None,
        }
    }

    /// Rendezvous request for a hosted service: answer with a fresh reply
    /// header over the requester's own.
    fn on_route(&self, route: Route, mut buf: Splice) -> Flow {
        let Some(service) = self.hidden.find_cloaked(&route.cloak) else {
            trace!("route for a service not hosted here");
            return Flow::Done;
        };
        let cipher = onion_cipher(&service.key, &route.from);
        if let Some(sealed) = buf.as_bytes_mut().get_mut(ROUTE_CLEAR_LEN..) {
            apply_keystream(&cipher, &route.iv, sealed);
        }
        buf.set_cursor(ROUTE_CLEAR_LEN);
        let (body, header) = match RouteBody::decode(&mut buf)
            .and_then(|body| Ok((body, buf.read_vec(REVERSE_HEADER_LEN)?)))
        {
            Ok(parts) => parts,
            Err(e) => {
                debug!(error = %e, "dropping route");
                return Flow::Done;
            }
        };

        let ready = self
            .manager
            .select_hops(&[3, 4, RETURN_HOP], vec![None; 3])
            .and_then(|hops| match hops.as_slice() {
                [first, second, ret] => reply_header(first, second, ret),
                _ => Err(OnionError::NoEligibleHop(RETURN_HOP)),
            })
            .and_then(|(own, ciphers, nonces)| {
                Ready::new(body.id, service.key.public_key(), own, ciphers, nonces)
            });
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                debug!(id = %body.id, error = %e, "cannot answer route");
                return Flow::Done;
            }
        };
        debug!(id = %body.id, port = service.port, "answering route");
        Flow::Continue {
            buf: sealed_reply(&header, &Layer::Ready(ready), &body.ciphers, &body.nonces),
            session: None,
        }
    }

    fn on_session(&self, sess: Session, buf: Splice) -> Flow {
        let Some(payment) = self.manager.take_payment(&sess.preimage()) else {
            debug!(hop = sess.hop, "session without payment");
            return Flow::Done;
        };
        let session = SessionData::with_keys(
            payment.id,
            self.local.clone(),
            sess.hop,
            sess.header,
            sess.payload,
            self.config.relay_rate,
            payment.amount,
        );
        debug!(id = %payment.id, hop = session.hop, amount = payment.amount, "session installed");
        self.manager.add_session(session);
        Flow::Continue { buf, session: None }
    }

    fn on_response(&self, resp: Response, buf: &Splice) -> Flow {
        let (id, payload) = (resp.id, resp.payload);
        self.resolve_pending(id, buf, payload, |_| {})
    }

    /// Settle and complete the pending entry `id`. `apply` runs between the
    /// deferred debits and the callback.
    fn resolve_pending<F>(&self, id: Id, buf: &Splice, payload: Vec<u8>, apply: F) -> Flow
    where
        F: FnOnce(&Engine),
    {
        let Some(mut pending) = self.pending.take(&id) else {
            trace!(%id, "no pending response");
            return Flow::Done;
        };
        let received = REVERSE_HEADER_LEN + buf.len();
        pending.settle(&self.manager, received);
        apply(self);
        pending.complete(payload);
        Flow::Done
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_crypto::x25519::X25519StaticSecret;
    use strata_types::Id;

    use super::*;
    use crate::layers::confirm::{Confirm, CONFIRM_LEN};
    use crate::layers::forward::FORWARD_LEN;
    use crate::onion::{exit_onion, Skins};
    use crate::payment::PendingPayment;
    use crate::pending::PendingResponse;
    use crate::testing::{engine_at, node};

    fn confirm(id: Id) -> Layer {
        Layer::Confirm(Confirm { id, load: 0 })
    }

    /// A session this engine sells, as installed by a `Session` layer.
    fn sold(engine: &Engine, hop: u8, amount: u64) -> SessionData {
        let s = SessionData::with_keys(
            Id::random(),
            engine.local_node().clone(),
            hop,
            X25519StaticSecret::random(),
            X25519StaticSecret::random(),
            2,
            amount,
        );
        engine.manager().add_session(s.clone());
        s
    }

    #[tokio::test]
    async fn test_forward_bills_session_and_relays() {
        let (engine, recorder, _inbox) = engine_at(5100);
        let s = sold(&engine, 1, 10_000);
        let (next, _) = node(5101, 1);
        let id = Id::random();
        let built = Skins::new()
            .crypt(&s.header_pub, None)
            .forward(next.addr)
            .layer(confirm(id))
            .assemble()
            .expect("onion");
        engine.handle_message(built.onion.encode().bytes).await;

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, next.addr);
        assert_eq!(sent[0].1, encoded(&confirm(id)));
        let charged = 2 * (FORWARD_LEN + CONFIRM_LEN) as u64;
        assert_eq!(engine.manager().session(&s.id).expect("session").remaining, 10_000 - charged);
    }

    #[tokio::test]
    async fn test_crypt_not_for_us_dropped() {
        let (engine, recorder, _inbox) = engine_at(5110);
        let stranger = X25519StaticSecret::random();
        let built = Skins::new()
            .crypt(&stranger.public_key(), None)
            .forward(node(5111, 1).0.addr)
            .layer(confirm(Id::random()))
            .assemble()
            .expect("onion");
        engine.handle_message(built.onion.encode().bytes).await;
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_magic_dropped() {
        let (engine, recorder, _inbox) = engine_at(5115);
        engine.handle_message(b"zzzz and some more bytes".to_vec()).await;
        engine.handle_message(b"crp".to_vec()).await;
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_session_requires_payment() {
        let (engine, _, _inbox) = engine_at(5120);
        let header = X25519StaticSecret::random();
        let payload = X25519StaticSecret::random();
        let layer = Layer::Session(Session {
            hop: 2,
            header: header.clone(),
            payload: payload.clone(),
        });
        let bytes = || {
            Skins::new()
                .crypt(&engine.identity(), None)
                .layer(layer.clone())
                .assemble()
                .expect("onion")
                .onion
                .encode()
                .bytes
        };

        engine.handle_message(bytes()).await;
        assert_eq!(engine.manager().session_count(), 1);

        let id = Id::random();
        let preimage = crate::session::preimage_hash(&header, &payload);
        engine.manager().add_payment(PendingPayment {
            id,
            preimage,
            amount: 500,
        });
        engine.handle_message(bytes()).await;
        let s = engine.manager().session(&id).expect("installed");
        assert_eq!((s.hop, s.remaining, s.relay_rate), (2, 500, 1));
        assert_eq!(engine.manager().pending_payment_count(), 0);

        // A replay finds no payment.
        engine.handle_message(bytes()).await;
        assert_eq!(engine.manager().session_count(), 2);
    }

    #[tokio::test]
    async fn test_exit_serves_local_service() {
        let (engine, recorder, _inbox) = engine_at(5130);
        let mut sessions: Vec<SessionData> = (0..5u8)
            .map(|hop| SessionData::generate(node(5131 + u16::from(hop), 1).0, hop, 1_000))
            .collect();
        sessions[2] = sold(&engine, 2, 100_000);
        sessions.push(SessionData::generate(node(5140, 0).0, RETURN_HOP, 0));

        let mut service = engine.services().bind(7);
        tokio::spawn(async move {
            while let Some(req) = service.recv().await {
                let mut echo = b"echo:".to_vec();
                echo.extend_from_slice(&req);
                service.reply(echo).await;
            }
        });

        let id = Id::random();
        let built = exit_onion(&sessions, 7, id, b"ping".to_vec()).expect("onion");
        let mut s = Splice::load(built.onion.encode().bytes);
        // Peel the two outer hops by hand.
        for k in 0..2 {
            s = s.budge_up();
            let _ = Layer::decode(LayerKind::Forward, &mut s).expect("forward");
            let Layer::Crypt(c) = Layer::decode(LayerKind::Crypt, &mut s).expect("crypt") else {
                unreachable!("crypt");
            };
            c.open(&sessions[k].header, s.rest_mut());
        }
        let mut s = s.budge_up();
        let _ = Layer::decode(LayerKind::Forward, &mut s).expect("forward");
        let at_exit = s.rest().to_vec();
        let request = at_exit.len() - crate::layers::crypt::CRYPT_LEN;

        engine.handle_message(at_exit).await;

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, sessions[3].node.addr);
        let reply = &sent[0].1;
        let response = Response {
            id,
            port: 7,
            load: 0,
            payload: b"echo:ping".to_vec(),
        };
        assert_eq!(reply.len(), REVERSE_HEADER_LEN + response.len());
        let remaining = engine.manager().session(&sessions[2].id).expect("session").remaining;
        assert_eq!(remaining, 100_000 - sessions[2].exit_cost(request, reply.len()));
    }

    #[tokio::test]
    async fn test_confirm_resolves_once() {
        let (engine, _, _inbox) = engine_at(5150);
        let id = Id::random();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine.pending().add(PendingResponse::new(
            id,
            Duration::from_secs(5),
            Box::new(move |id, bytes| {
                let _ = tx.send((id, bytes));
            }),
        ));
        let bytes = Skins::new()
            .crypt(&engine.identity(), None)
            .layer(confirm(id))
            .assemble()
            .expect("onion")
            .onion
            .encode()
            .bytes;

        engine.handle_message(bytes.clone()).await;
        engine.handle_message(bytes).await;
        let (got, payload) = rx.recv().await.expect("callback");
        assert_eq!(got, id);
        assert_eq!(&payload[..4], b"conf");
        assert!(rx.try_recv().is_err());
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn test_ads_update_known_node() {
        let (engine, _, _inbox) = engine_at(5160);
        let (other, _, _) = engine_at(5161);
        let mut peer = other.local_node().clone();
        peer.relay_rate = 9;
        engine.add_peer(peer.clone());

        let ads = [
            Layer::PeerAd(other.peer_ad(Duration::from_secs(60))),
            Layer::AddressAd(other.address_ad(Duration::from_secs(60))),
            Layer::IntroAd(other.intro_ad(X25519StaticSecret::random().public_key(), 443, Duration::from_secs(60))),
            Layer::IntroAd(other.intro_ad(X25519StaticSecret::random().public_key(), 80, Duration::ZERO)),
        ];
        for ad in &ads {
            engine.handle_message(encoded(ad)).await;
        }

        let nodes = engine.manager().nodes();
        let known = nodes.iter().find(|n| n.signing == peer.signing).expect("node");
        assert_eq!(known.relay_rate, 1);
        assert_eq!(known.services.len(), 1);
        assert_eq!(known.services[0].port, 443);
    }
}
