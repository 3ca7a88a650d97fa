//! In-memory network for tests and local simulations.
//!
//! Nodes [`attach`](SimNetwork::attach) an address, their identity key and
//! the sender half of their inbound channel. By default a buffer is handed to
//! the receiver's channel as-is. With a [`LinkProfile`] every buffer instead
//! goes through the full packet path: split into sealed FEC packets, some of
//! them dropped, the rest decoded with the receiver's key and reassembled.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use strata_crypto::x25519::X25519StaticSecret;
use strata_types::Id;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::fec::{join_packets, split_to_packets, Reassembler, SplitParams, REASSEMBLY_TTL};
use crate::packet::{decode_packet, Packets};
use crate::{Result, Transport, TransportError};

/// Packetisation applied to every link of a [`SimNetwork`].
#[derive(Clone, Copy, Debug)]
pub struct LinkProfile {
    pub segment_size: usize,
    pub parity: u8,
    /// Drop every n-th packet sent on the network. Zero drops nothing.
    pub drop_every: usize,
}

struct Peer {
    inbound: mpsc::Sender<Vec<u8>>,
    identity: X25519StaticSecret,
    reassembler: Reassembler,
}

/// A shared in-memory network. Cloning gives another handle to the same one.
#[derive(Clone, Default)]
pub struct SimNetwork {
    peers: Arc<Mutex<HashMap<SocketAddr, Peer>>>,
    link: Option<LinkProfile>,
    sent_packets: Arc<AtomicUsize>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network whose links carry packets rather than whole buffers.
    pub fn with_link(link: LinkProfile) -> Self {
        Self {
            link: Some(link),
            ..Self::default()
        }
    }

    /// Register a node and return its outbound handle.
    pub fn attach(
        &self,
        addr: SocketAddr,
        identity: X25519StaticSecret,
        inbound: mpsc::Sender<Vec<u8>>,
    ) -> Result<SimTransport> {
        self.lock()?.insert(
            addr,
            Peer {
                inbound,
                identity: identity.clone(),
                reassembler: Reassembler::new(),
            },
        );
        debug!(%addr, "attached to sim network");
        Ok(SimTransport {
            net: self.clone(),
            addr,
            identity,
        })
    }

    /// Remove a node. Later sends to it fail with `UnknownPeer`.
    pub fn detach(&self, addr: &SocketAddr) -> Result<()> {
        self.lock()?.remove(addr);
        Ok(())
    }

    /// Packets dropped so far by the link profile.
    pub fn dropped(&self) -> usize {
        match self.link {
            Some(link) if link.drop_every > 0 => self.sent_packets.load(Ordering::Relaxed) / link.drop_every,
            _ => 0,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SocketAddr, Peer>>> {
        self.peers
            .lock()
            .map_err(|_| TransportError::Internal("sim network lock poisoned".into()))
    }

    fn deliver(&self, from: &X25519StaticSecret, to: SocketAddr, data: Vec<u8>) -> Result<()> {
        let data = match self.link {
            None => data,
            Some(link) => match self.through_link(link, from, to, &data)? {
                Some(joined) => joined,
                None => return Ok(()),
            },
        };

        let peers = self.lock()?;
        let peer = peers.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        peer.inbound.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(to),
            mpsc::error::TrySendError::Closed(_) => TransportError::QueueClosed(to),
        })
    }

    /// Push one buffer through a packetised link. Returns the reassembled
    /// buffer, or `None` if losses left it undecodable.
    fn through_link(
        &self,
        link: LinkProfile,
        from: &X25519StaticSecret,
        to: SocketAddr,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let receiver_pub = {
            let peers = self.lock()?;
            peers
                .get(&to)
                .ok_or(TransportError::UnknownPeer(to))?
                .identity
                .public_key()
        };

        let id = Id::random();
        let raw = split_to_packets(
            &SplitParams {
                id,
                to: &receiver_pub,
                from,
                parity: link.parity,
                data,
            },
            link.segment_size,
        )?;

        let mut ready: Option<Packets> = None;
        {
            let mut peers = self.lock()?;
            let peer = peers.get_mut(&to).ok_or(TransportError::UnknownPeer(to))?;
            let expired = peer.reassembler.expire(Instant::now(), REASSEMBLY_TTL);
            if expired > 0 {
                debug!(%to, expired, "dropped stale partial messages");
            }
            for bytes in raw {
                let n = self.sent_packets.fetch_add(1, Ordering::Relaxed) + 1;
                if link.drop_every > 0 && n % link.drop_every == 0 {
                    trace!(%to, "dropped packet");
                    continue;
                }
                let packet = match decode_packet(&bytes, &peer.identity) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(%to, error = %e, "undecodable packet");
                        continue;
                    }
                };
                if let Some(done) = peer.reassembler.push(packet) {
                    ready = Some(done);
                }
            }
        }

        match ready {
            Some(packets) => join_packets(packets).map(Some),
            None => {
                debug!(%to, %id, "message lost on link");
                Ok(None)
            }
        }
    }
}

/// One node's view of a [`SimNetwork`].
pub struct SimTransport {
    net: SimNetwork,
    addr: SocketAddr,
    identity: X25519StaticSecret,
}

impl SimTransport {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for SimTransport {
    fn send(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
        trace!(from = %self.addr, to = %addr, len = data.len(), "sim send");
        self.net.deliver(&self.identity, addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn node(net: &SimNetwork, port: u16, cap: usize) -> (SimTransport, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(cap);
        let t = net
            .attach(addr(port), X25519StaticSecret::random(), tx)
            .expect("attach");
        (t, rx)
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let net = SimNetwork::new();
        let (a, _rx_a) = node(&net, 1, 4);
        let (_b, mut rx_b) = node(&net, 2, 4);

        a.send(addr(2), b"hello".to_vec()).expect("send");
        assert_eq!(rx_b.recv().await.expect("delivered"), b"hello");
    }

    #[tokio::test]
    async fn test_unknown_and_detached_peers() {
        let net = SimNetwork::new();
        let (a, _rx_a) = node(&net, 1, 4);
        let (_b, _rx_b) = node(&net, 2, 4);

        assert!(matches!(
            a.send(addr(9), vec![1]),
            Err(TransportError::UnknownPeer(_))
        ));
        net.detach(&addr(2)).expect("detach");
        assert!(matches!(
            a.send(addr(2), vec![1]),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue_reports() {
        let net = SimNetwork::new();
        let (a, _rx_a) = node(&net, 1, 1);
        let (_b, _rx_b) = node(&net, 2, 1);

        a.send(addr(2), vec![1]).expect("first fits");
        assert!(matches!(
            a.send(addr(2), vec![2]),
            Err(TransportError::QueueFull(_))
        ));
    }

    #[tokio::test]
    async fn test_lossy_link_recovers_with_parity() {
        let net = SimNetwork::with_link(LinkProfile {
            segment_size: 400,
            parity: 64,
            drop_every: 7,
        });
        let (a, _rx_a) = node(&net, 1, 8);
        let (_b, mut rx_b) = node(&net, 2, 8);

        let message: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        a.send(addr(2), message.clone()).expect("send");
        assert_eq!(rx_b.recv().await.expect("delivered"), message);
        assert!(net.dropped() > 0);
    }

    #[tokio::test]
    async fn test_lossy_link_without_parity_loses_message() {
        let net = SimNetwork::with_link(LinkProfile {
            segment_size: 400,
            parity: 0,
            drop_every: 3,
        });
        let (a, _rx_a) = node(&net, 1, 8);
        let (_b, mut rx_b) = node(&net, 2, 8);

        a.send(addr(2), vec![7u8; 5_000]).expect("send is fire and forget");
        assert!(rx_b.try_recv().is_err());
    }
}
