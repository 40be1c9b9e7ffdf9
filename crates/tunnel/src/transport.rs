//! Secure transport: TLS handshake and framed I/O.
//!
//! The transport owns the handshake and exposes exactly-sized framed read
//! and write primitives on top of the encrypted stream. It has no knowledge
//! of control-message semantics; it delivers whole frames or reports that
//! the channel closed. Reads and writes live on independent halves so one
//! task can pump each direction without contending on a single lock.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use protocol::{ControlMessage, Frame, FrameType, FRAME_HEADER_SIZE};
use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::cert;

/// Errors from the secure transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Bad certificate/key/trust-bundle configuration. Fatal, reported
    /// before any network I/O.
    #[error("certificate configuration failed: {0}")]
    Certificate(String),

    /// The cryptographic handshake was rejected. Fatal per session attempt.
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    /// The peer name could not be parsed for the client handshake.
    #[error("invalid peer name: {0}")]
    PeerName(String),

    /// The stream closed mid-frame. The framing has no resynchronization
    /// marker, so this terminates the session like any transport error.
    #[error("connection closed mid-frame")]
    TruncatedFrame,

    /// Post-handshake I/O failure. Terminates the owning pump loop.
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level violation (oversized length field).
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
}

/// TLS material and verification policy for one session.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Own certificate chain (PEM). Required on the listening side.
    pub cert: Option<PathBuf>,
    /// Own private key (PEM). Required on the listening side.
    pub key: Option<PathBuf>,
    /// Trust-anchor bundle (PEM). When set, peer certificates are checked
    /// against it; when unset, no verification is requested.
    pub trust_anchor: Option<PathBuf>,
    /// With a trust anchor configured: require a valid, chain-verified
    /// peer certificate instead of merely tolerating its absence.
    pub verify_required: bool,
}

/// Session parameters captured after a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    /// Negotiated protocol version, for diagnostics.
    pub protocol_version: String,
    /// Negotiated cipher suite, for diagnostics.
    pub cipher_suite: String,
    /// Lowercase hex SHA-256 of the peer's DER certificate, or an empty
    /// string if the peer presented none.
    pub peer_fingerprint: String,
}

/// An established secure channel: one framed reader, one shareable framed
/// writer, and the negotiated session parameters.
pub struct SecureChannel {
    /// Sole reader for the inbound direction. Exactly one task may own it.
    pub reader: FrameReader,
    /// Cloneable writer handle; frame writes are serialized internally.
    pub writer: SharedWriter,
    /// Negotiated session parameters.
    pub info: HandshakeInfo,
}

/// Perform the server-side handshake over an accepted TCP stream.
///
/// Certificate and key must be configured; the trust anchor is optional and
/// controls whether a client certificate is requested at all.
pub async fn accept(stream: TcpStream, settings: &TlsSettings) -> Result<SecureChannel, TransportError> {
    let config = server_config(settings)?;
    let acceptor = TlsAcceptor::from(config);
    let tls = acceptor
        .accept(stream)
        .await
        .map_err(TransportError::Handshake)?;
    Ok(split_channel(TlsStream::from(tls)))
}

/// Perform the client-side handshake over a connected TCP stream.
///
/// `host` is the name the connection was dialed with; it is only checked
/// against the server certificate when a trust anchor is configured with
/// verification required.
pub async fn connect(
    stream: TcpStream,
    host: &str,
    settings: &TlsSettings,
) -> Result<SecureChannel, TransportError> {
    let config = client_config(settings)?;
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::PeerName(format!("{host}: {e}")))?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(TransportError::Handshake)?;
    Ok(split_channel(TlsStream::from(tls)))
}

fn split_channel(stream: TlsStream<TcpStream>) -> SecureChannel {
    let info = handshake_info(stream.get_ref().1);
    let (read_half, write_half) = tokio::io::split(stream);
    SecureChannel {
        reader: FrameReader::new(read_half),
        writer: SharedWriter::new(FrameWriter::new(write_half)),
        info,
    }
}

fn handshake_info(common: &rustls::CommonState) -> HandshakeInfo {
    let protocol_version = common
        .protocol_version()
        .map(|v| format!("{v:?}"))
        .unwrap_or_default();
    let cipher_suite = common
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()))
        .unwrap_or_default();
    let peer_fingerprint = common
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|c| hex::encode(Sha256::digest(c.as_ref())))
        .unwrap_or_default();
    HandshakeInfo {
        protocol_version,
        cipher_suite,
        peer_fingerprint,
    }
}

fn server_config(settings: &TlsSettings) -> Result<Arc<rustls::ServerConfig>, TransportError> {
    let cert_path = settings.cert.as_ref().ok_or_else(|| {
        TransportError::Certificate("listening side requires a certificate (--cert)".into())
    })?;
    let key_path = settings.key.as_ref().ok_or_else(|| {
        TransportError::Certificate("listening side requires a private key (--key)".into())
    })?;
    let certs = cert::load_certs(cert_path)?;
    let key = cert::load_key(key_path)?;

    let builder = match &settings.trust_anchor {
        Some(ca_path) => {
            let roots = Arc::new(cert::load_root_store(ca_path)?);
            let verifier = if settings.verify_required {
                WebPkiClientVerifier::builder(roots).build()
            } else {
                WebPkiClientVerifier::builder(roots)
                    .allow_unauthenticated()
                    .build()
            }
            .map_err(|e| TransportError::Certificate(format!("client verifier: {e}")))?;
            rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => rustls::ServerConfig::builder().with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Certificate(format!("certificate/key mismatch: {e}")))?;
    Ok(Arc::new(config))
}

fn client_config(settings: &TlsSettings) -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let builder = match &settings.trust_anchor {
        Some(ca_path) if settings.verify_required => {
            let roots = cert::load_root_store(ca_path)?;
            rustls::ClientConfig::builder().with_root_certificates(roots)
        }
        _ => {
            // No trust anchor (or verification not required): accept any
            // server certificate so the fingerprint can be confirmed
            // out-of-band instead.
            if settings.trust_anchor.is_none() {
                tracing::warn!("no trust anchor configured; server certificate is not verified");
            }
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        }
    };

    let config = match (&settings.cert, &settings.key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = cert::load_certs(cert_path)?;
            let key = cert::load_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TransportError::Certificate(format!("client certificate: {e}")))?
        }
        _ => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Server-certificate verifier that accepts any certificate.
///
/// Used when no trust anchor is configured; trust is established
/// out-of-band by comparing the printed peer fingerprint.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Framed reader over the inbound half of the encrypted stream.
///
/// Delivers whole frames only. A clean peer shutdown at a frame boundary
/// is `Ok(None)`; a close mid-frame is [`TransportError::TruncatedFrame`].
pub struct FrameReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl FrameReader {
    /// Wrap an async byte source.
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Read the next frame, blocking until a whole frame arrives.
    ///
    /// Frames with an unrecognized type byte are skipped (their payload is
    /// consumed and discarded) rather than treated as fatal.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            match self.inner.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(TransportError::Io(e)),
            }

            let decoded = protocol::decode_header(&header)?;
            let mut payload = vec![0u8; decoded.payload_len];
            match self.inner.read_exact(&mut payload).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(TransportError::TruncatedFrame)
                }
                Err(e) => return Err(TransportError::Io(e)),
            }

            match decoded.frame_type() {
                Some(frame_type) => return Ok(Some(Frame { frame_type, payload })),
                None => {
                    tracing::debug!(raw_type = decoded.raw_type, "skipping frame of unknown type");
                }
            }
        }
    }
}

/// Framed writer over the outbound half of the encrypted stream.
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl FrameWriter {
    /// Wrap an async byte sink.
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Encode and write one whole frame, flushing before returning.
    pub async fn write_frame(
        &mut self,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let bytes = protocol::encode(frame_type, payload)?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send the protocol-level clean-shutdown signal. Best-effort.
    pub async fn close_notify(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(error = %e, "close notify failed");
        }
    }
}

/// Cloneable handle to the outbound half.
///
/// Multiple producers (a pump loop plus the resize coalescer) share the
/// writer; the internal lock spans one whole frame write, so frame
/// boundaries are never interleaved.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<FrameWriter>>,
}

impl SharedWriter {
    /// Wrap a [`FrameWriter`] for shared use.
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Send one DATA frame carrying `payload`.
    pub async fn send_data(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.inner.lock().await.write_frame(FrameType::Data, payload).await
    }

    /// Send one CONTROL frame carrying the JSON encoding of `msg`.
    pub async fn send_control(&self, msg: &ControlMessage) -> Result<(), TransportError> {
        let payload = msg.to_bytes()?;
        self.inner
            .lock()
            .await
            .write_frame(FrameType::Control, &payload)
            .await
    }

    /// Send the clean-shutdown signal on the outbound half.
    pub async fn close_notify(&self) {
        self.inner.lock().await.close_notify().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::FrameType;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let writer = SharedWriter::new(FrameWriter::new(a));
        let mut reader = FrameReader::new(b);

        writer.send_data(b"hello").await.unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn test_control_frame_roundtrip() {
        let (a, b) = tokio::io::duplex(1024);
        let writer = SharedWriter::new(FrameWriter::new(a));
        let mut reader = FrameReader::new(b);

        writer
            .send_control(&ControlMessage::Winch { rows: 50, cols: 132 })
            .await
            .unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Control);
        let msg = ControlMessage::from_bytes(&frame.payload).unwrap();
        assert_eq!(msg, ControlMessage::Winch { rows: 50, cols: 132 });
    }

    #[tokio::test]
    async fn test_clean_close_at_frame_boundary() {
        let (a, b) = tokio::io::duplex(1024);
        let writer = SharedWriter::new(FrameWriter::new(a));
        let mut reader = FrameReader::new(b);

        writer.send_data(b"bye").await.unwrap();
        writer.close_notify().await;

        assert!(reader.read_frame().await.unwrap().is_some());
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_read_is_truncated_frame() {
        // Header promises 10 payload bytes; only 4 arrive before close.
        for k in 0..10usize {
            let (mut a, b) = tokio::io::duplex(1024);
            let mut reader = FrameReader::new(b);

            let mut bytes = protocol::encode(FrameType::Data, &[7u8; 10]).unwrap();
            bytes.truncate(FRAME_HEADER_SIZE + k);
            a.write_all(&bytes).await.unwrap();
            drop(a);

            let result = reader.read_frame().await;
            assert!(
                matches!(result, Err(TransportError::TruncatedFrame)),
                "k={k} should report a truncated frame, got {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_partial_header_then_close_is_truncated() {
        // A torn header is also mid-frame: 2 of 5 header bytes arrive.
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);

        a.write_all(&[2, 0]).await.unwrap();
        drop(a);

        // read_exact on the header reports UnexpectedEof after a partial
        // read; anything short of 5 bytes never surfaces as a frame.
        let result = reader.read_frame().await;
        assert!(result.is_err() || result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_skipped() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);

        // Type 9 frame followed by a real DATA frame.
        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(b"xyz");
        bytes.extend_from_slice(&protocol::encode(FrameType::Data, b"ok").unwrap());
        a.write_all(&bytes).await.unwrap();

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(frame.payload, b"ok");
    }

    #[tokio::test]
    async fn test_oversized_length_field_rejected() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);

        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        a.write_all(&bytes).await.unwrap();

        let result = reader.read_frame().await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_frame_boundaries_not_interleaved() {
        // Two producers hammer the shared writer; every frame must come
        // out whole.
        let (a, b) = tokio::io::duplex(64 * 1024);
        let writer = SharedWriter::new(FrameWriter::new(a));
        let mut reader = FrameReader::new(b);

        let w1 = writer.clone();
        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                w1.send_data(&[b'a'; 700]).await.unwrap();
            }
        });
        let w2 = writer.clone();
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                w2.send_data(&[b'b'; 300]).await.unwrap();
            }
        });

        let mut seen = 0;
        while seen < 100 {
            let frame = reader.read_frame().await.unwrap().unwrap();
            let first = frame.payload[0];
            assert!(frame.payload.iter().all(|&c| c == first), "interleaved frame");
            assert!(frame.payload.len() == 700 || frame.payload.len() == 300);
            seen += 1;
        }
        t1.await.unwrap();
        t2.await.unwrap();
    }
}
