//! QUIC/TLS 1.3 transport between relays.
//!
//! Every node runs one [`QuicNode`]: a Quinn endpoint acting as both server and
//! client. Certificates are self-signed and not checked; onion layers carry
//! their own end-to-end encryption, so TLS here only hides framing.
//!
//! ## Framing
//!
//! One onion buffer per bidirectional stream, prefixed with its length:
//!
//! ```text
//! [length:4 LE][data:length]
//! ```
//!
//! [`QuicTransport`] queues outbound buffers to one worker task per peer, which
//! keeps a cached connection open. [`accept_loop`] feeds received buffers into
//! the engine's inbound channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use quinn::{ClientConfig, Connection, Endpoint, Incoming, RecvStream, SendStream, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Transport, TransportError};

/// ALPN protocol identifier.
pub const ALPN_STRATA_V1: &[u8] = b"strata/1";

/// TLS server name presented when dialling peers.
pub const SERVER_NAME: &str = "strata-node";

pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;

pub const DEFAULT_MAX_BI_STREAMS: u32 = 1024;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct QuicConfig {
    pub bind_addr: SocketAddr,
    pub idle_timeout_ms: u32,
    pub max_bi_streams: u32,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_bi_streams: DEFAULT_MAX_BI_STREAMS,
        }
    }
}

/// A QUIC endpoint that both listens and dials.
pub struct QuicNode {
    endpoint: Endpoint,
    local_addr: SocketAddr,
}

impl QuicNode {
    /// Bind a new endpoint with a fresh self-signed certificate.
    ///
    /// # Errors
    ///
    /// [`TransportError::Tls`] if TLS setup fails, [`TransportError::Io`] if the
    /// socket cannot be bound.
    pub fn new(config: QuicConfig) -> Result<Self, TransportError> {
        let server_config = build_server_config(config.idle_timeout_ms, config.max_bi_streams)?;
        let mut endpoint = Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        endpoint.set_default_client_config(build_client_config()?);

        let local_addr = endpoint
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        info!(%local_addr, "QUIC node listening");

        Ok(Self {
            endpoint,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next incoming connection, or `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Dial `addr` and wait for the handshake.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connection`] if the dial cannot start or the
    /// handshake fails.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Connection, TransportError> {
        let connection = self
            .endpoint
            .connect(addr, SERVER_NAME)
            .map_err(|e| TransportError::Connection(e.to_string()))?
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        debug!(remote = %connection.remote_address(), "QUIC connection established");
        Ok(connection)
    }

    /// Open a bidirectional stream on `connection`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connection`] if the connection has been lost.
    pub async fn open_bi(connection: &Connection) -> Result<(SendStream, RecvStream), TransportError> {
        connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Wait for the peer to open a bidirectional stream.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connection`] if the connection closes first.
    pub async fn accept_bi(
        connection: &Connection,
    ) -> Result<(SendStream, RecvStream), TransportError> {
        connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Write one length-prefixed frame.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidPacket`] if `data` is longer than a `u32`
    /// prefix can describe, [`TransportError::Io`] if the stream write fails.
    pub async fn send_message(stream: &mut SendStream, data: &[u8]) -> Result<(), TransportError> {
        let len = u32::try_from(data.len())
            .map_err(|_| TransportError::InvalidPacket("frame too large for length prefix".into()))?;
        stream
            .write_all(&len.to_le_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Read one length-prefixed frame of at most `max_size` bytes.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidPacket`] if the prefix exceeds `max_size`,
    /// [`TransportError::Io`] if the stream ends early.
    pub async fn recv_message(
        stream: &mut RecvStream,
        max_size: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > max_size {
            return Err(TransportError::InvalidPacket(format!(
                "frame length {len} exceeds maximum {max_size}"
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(buf)
    }

    pub fn close(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
    }
}

/// Outbound QUIC delivery with one queue and worker per peer.
pub struct QuicTransport {
    node: Arc<QuicNode>,
    runtime: Handle,
    peers: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl QuicTransport {
    /// Must be called from within a tokio runtime; workers are spawned on it.
    ///
    /// # Errors
    ///
    /// [`TransportError::Internal`] if there is no current runtime.
    pub fn new(node: Arc<QuicNode>) -> Result<Self, TransportError> {
        let runtime = Handle::try_current()
            .map_err(|e| TransportError::Internal(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            node,
            runtime,
            peers: Mutex::new(HashMap::new()),
        })
    }

    fn spawn_worker(&self, addr: SocketAddr) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.runtime
            .spawn(send_worker(Arc::clone(&self.node), addr, rx));
        tx
    }
}

impl Transport for QuicTransport {
    fn send(&self, addr: SocketAddr, data: Vec<u8>) -> crate::Result<()> {
        let mut peers = self
            .peers
            .lock()
            .map_err(|_| TransportError::Internal("peer table lock poisoned".into()))?;
        let tx = peers
            .entry(addr)
            .or_insert_with(|| self.spawn_worker(addr));
        if let Err(mpsc::error::SendError(data)) = tx.send(data) {
            // The previous worker exited; start a fresh one.
            let tx = self.spawn_worker(addr);
            tx.send(data).map_err(|_| TransportError::QueueClosed(addr))?;
            peers.insert(addr, tx);
        }
        Ok(())
    }
}

async fn send_worker(node: Arc<QuicNode>, addr: SocketAddr, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut connection: Option<Connection> = None;
    while let Some(frame) = rx.recv().await {
        // One reconnect attempt per frame before it is dropped.
        for attempt in 0..2 {
            let conn = match &connection {
                Some(c) => c.clone(),
                None => match node.connect(addr).await {
                    Ok(c) => {
                        connection = Some(c.clone());
                        c
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "connect failed");
                        break;
                    }
                },
            };
            match send_frame(&conn, &frame).await {
                Ok(()) => break,
                Err(e) => {
                    debug!(%addr, attempt, error = %e, "send failed, dropping connection");
                    connection = None;
                }
            }
        }
    }
    debug!(%addr, "send worker stopped");
}

async fn send_frame(conn: &Connection, frame: &[u8]) -> Result<(), TransportError> {
    let (mut send, _recv) = QuicNode::open_bi(conn).await?;
    QuicNode::send_message(&mut send, frame).await?;
    send.finish()
        .map_err(|e| TransportError::Io(e.to_string()))
}

/// Accept connections until the endpoint closes, forwarding every received
/// frame to `inbound`.
pub async fn accept_loop(node: Arc<QuicNode>, inbound: mpsc::Sender<Vec<u8>>) {
    while let Some(incoming) = node.accept().await {
        let inbound = inbound.clone();
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "incoming connection failed");
                    return;
                }
            };
            let remote = connection.remote_address();
            loop {
                let (_send, mut recv) = match QuicNode::accept_bi(&connection).await {
                    Ok(streams) => streams,
                    Err(e) => {
                        debug!(%remote, error = %e, "connection closed");
                        return;
                    }
                };
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    match QuicNode::recv_message(&mut recv, MAX_FRAME_LEN).await {
                        Ok(frame) => {
                            if inbound.send(frame).await.is_err() {
                                debug!(%remote, "inbound channel closed");
                            }
                        }
                        Err(e) => warn!(%remote, error = %e, "bad frame"),
                    }
                });
            }
        });
    }
    debug!("accept loop stopped");
}

// ---------------------------------------------------------------------------
// TLS / certificate helpers
// ---------------------------------------------------------------------------

fn generate_self_signed_cert(
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), TransportError> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
        .map_err(|e| TransportError::Tls(format!("key generation failed: {e}")))?;
    let cert = rcgen::CertificateParams::new(vec![SERVER_NAME.to_string()])
        .map_err(|e| TransportError::Tls(format!("cert params failed: {e}")))?
        .self_signed(&key_pair)
        .map_err(|e| TransportError::Tls(format!("self-signing failed: {e}")))?;

    Ok((
        CertificateDer::from(cert.der().to_vec()),
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    ))
}

fn build_server_config(idle_timeout_ms: u32, max_bi_streams: u32) -> Result<ServerConfig, TransportError> {
    let (cert_der, key_der) = generate_self_signed_cert()?;

    let provider = rustls::crypto::ring::default_provider();
    let mut tls = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    tls.alpn_protocols = vec![ALPN_STRATA_V1.to_vec()];

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        quinn::IdleTimeout::try_from(std::time::Duration::from_millis(u64::from(idle_timeout_ms)))
            .map_err(|e| TransportError::Tls(format!("idle timeout: {e}")))?,
    ));
    transport.max_concurrent_bidi_streams(quinn::VarInt::from_u32(max_bi_streams));

    let mut server = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls)
            .map_err(|e| TransportError::Tls(e.to_string()))?,
    ));
    server.transport_config(Arc::new(transport));
    Ok(server)
}

fn build_client_config() -> Result<ClientConfig, TransportError> {
    let provider = rustls::crypto::ring::default_provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN_STRATA_V1.to_vec()];

    Ok(ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(tls)
            .map_err(|e| TransportError::Tls(e.to_string()))?,
    )))
}

/// Accepts every server certificate. Peers are identified by onion keys,
/// not by TLS.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn loopback() -> QuicConfig {
        QuicConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..QuicConfig::default()
        }
    }

    #[test]
    fn test_self_signed_cert() {
        let (cert, key) = generate_self_signed_cert().expect("cert");
        assert!(!cert.is_empty());
        assert!(matches!(key, PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn test_configs_build() {
        assert!(build_server_config(DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_BI_STREAMS).is_ok());
        assert!(build_client_config().is_ok());
    }

    #[tokio::test]
    async fn test_frames_reach_inbound() {
        let server = Arc::new(QuicNode::new(loopback()).expect("server"));
        let client = Arc::new(QuicNode::new(loopback()).expect("client"));
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(accept_loop(Arc::clone(&server), tx));

        let transport = QuicTransport::new(Arc::clone(&client)).expect("transport");
        for i in 0..3u8 {
            transport
                .send(server.local_addr(), vec![i; 1000 + usize::from(i)])
                .expect("send");
        }

        let mut got = Vec::new();
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timely")
                .expect("frame");
            got.push(frame);
        }
        got.sort();
        assert_eq!(got, vec![vec![0u8; 1000], vec![1u8; 1001], vec![2u8; 1002]]);

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let server = Arc::new(QuicNode::new(loopback()).expect("server"));
        let client = QuicNode::new(loopback()).expect("client");
        let accepting = Arc::clone(&server);
        let reader = tokio::spawn(async move {
            let incoming = accepting.accept().await.expect("incoming");
            let connection = incoming.await.expect("handshake");
            let (_send, mut recv) = QuicNode::accept_bi(&connection).await.expect("stream");
            QuicNode::recv_message(&mut recv, 10).await
        });

        let connection = client.connect(server.local_addr()).await.expect("connect");
        let (mut send, _recv) = QuicNode::open_bi(&connection).await.expect("open");
        QuicNode::send_message(&mut send, &[7; 100]).await.expect("write");
        let read = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("timely")
            .expect("reader");
        assert!(matches!(read, Err(TransportError::InvalidPacket(_))));

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_transport_needs_runtime() {
        let node = Arc::new(QuicNode::new(loopback()).expect("node"));
        let outside = std::thread::spawn(move || QuicTransport::new(node).err())
            .join()
            .expect("thread");
        assert!(matches!(outside, Some(TransportError::Internal(_))));
        assert!(QuicTransport::new(Arc::new(QuicNode::new(loopback()).expect("node"))).is_ok());
    }
}
