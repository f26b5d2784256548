//! Secure channel establishment.
//!
//! One invocation produces one mutually-authenticated TLS 1.3 channel: the
//! responder binds, accepts a single connection, and upgrades in server
//! mode; the initiator resolves, connects, and upgrades in client mode.
//! Both sides present their own certificate and verify the peer against the
//! configured trust anchor; a peer with no certificate, or one that fails
//! verification, aborts the handshake.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

use crate::config::{Credentials, PeerAddr, SessionConfig};
use crate::error::SessionError;
use crate::framing::{FrameReader, FrameWriter};

/// Reading half of an established channel.
pub type ChannelReader = FrameReader<ReadHalf<TlsStream<TcpStream>>>;

/// Writing half of an established channel.
pub type ChannelWriter = FrameWriter<WriteHalf<TlsStream<TcpStream>>>;

/// An authenticated, encrypted duplex byte stream to the peer.
///
/// Exactly one exists per session. [`SecureChannel::split`] hands the two
/// halves to the sender and receiver loops.
pub struct SecureChannel {
    reader: ChannelReader,
    writer: ChannelWriter,
    peer_addr: String,
}

impl SecureChannel {
    fn new(stream: TlsStream<TcpStream>, peer_addr: String) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        }
    }

    /// Split into framer halves for the two loops.
    pub fn split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }

    /// The remote peer's socket address.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Produce one secure channel from the session configuration.
///
/// Validates the configuration before any network operation. Performs
/// exactly one blocking accept or connect attempt; failures are fatal to
/// the attempt and never retried internally.
pub async fn establish(config: &SessionConfig) -> Result<SecureChannel, SessionError> {
    config.validate()?;

    match &config.peer {
        PeerAddr::Listen { port } => {
            let acceptor = acceptor(&config.credentials)?;
            let addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&addr).await.map_err(|e| SessionError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
            debug!(%addr, "listening for peer");
            accept_one(listener, &acceptor).await
        }
        PeerAddr::Connect { host, port } => {
            let connector = connector(&config.credentials)?;
            connect_to(host, *port, &connector).await
        }
    }
}

/// Build the server-side TLS acceptor: our certificate plus a mandatory
/// client-certificate verifier rooted at the trust anchor.
pub fn acceptor(credentials: &Credentials) -> Result<TlsAcceptor, SessionError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = Arc::new(load_trust_anchor(&credentials.trust_anchor)?);
    let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
        .build()
        .map_err(|e| SessionError::Credentials(format!("client verifier: {e}")))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| SessionError::Handshake(format!("protocol selection: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            load_certs(&credentials.cert)?,
            load_key(&credentials.key)?,
        )
        .map_err(|e| SessionError::Credentials(format!("certificate rejected: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side TLS connector: our certificate presented to the
/// server, server chain verified against the trust anchor.
pub fn connector(credentials: &Credentials) -> Result<TlsConnector, SessionError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| SessionError::Handshake(format!("protocol selection: {e}")))?
        .with_root_certificates(load_trust_anchor(&credentials.trust_anchor)?)
        .with_client_auth_cert(
            load_certs(&credentials.cert)?,
            load_key(&credentials.key)?,
        )
        .map_err(|e| SessionError::Credentials(format!("certificate rejected: {e}")))?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accept exactly one inbound connection and upgrade it.
///
/// The listener is consumed and dropped as soon as the connection is
/// accepted, so no background listener outlives the call.
pub async fn accept_one(
    listener: TcpListener,
    acceptor: &TlsAcceptor,
) -> Result<SecureChannel, SessionError> {
    let (stream, peer) = listener.accept().await?;
    drop(listener);

    let stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| SessionError::Handshake(e.to_string()))?;
    debug!(peer = %peer, "handshake complete");

    Ok(SecureChannel::new(TlsStream::from(stream), peer.to_string()))
}

/// Connect out to the peer and upgrade the connection.
pub async fn connect_to(
    host: &str,
    port: u16,
    connector: &TlsConnector,
) -> Result<SecureChannel, SessionError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| SessionError::Connect {
            addr: addr.clone(),
            source: e,
        })?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| SessionError::Handshake(format!("invalid peer name '{host}': {e}")))?;
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| SessionError::Handshake(e.to_string()))?;
    debug!(peer = %addr, "handshake complete");

    Ok(SecureChannel::new(TlsStream::from(stream), addr))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SessionError> {
    let certs: Vec<_> = CertificateDer::pem_file_iter(path)
        .map_err(|e| SessionError::Credentials(format!("failed to read {}: {e}", path.display())))?
        .collect::<Result<_, _>>()
        .map_err(|e| {
            SessionError::Credentials(format!("invalid certificate in {}: {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(SessionError::Credentials(format!(
            "{} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SessionError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| SessionError::Credentials(format!("failed to read key {}: {e}", path.display())))
}

fn load_trust_anchor(path: &Path) -> Result<RootCertStore, SessionError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            SessionError::Credentials(format!("unusable trust anchor {}: {e}", path.display()))
        })?;
    }
    Ok(roots)
}
