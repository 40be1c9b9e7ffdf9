//! Loopback TLS session tests.
//!
//! These run a real handshake over 127.0.0.1 and exercise the framed
//! channel end to end, including mutual authentication against a
//! freshly-minted test CA.

use std::path::{Path, PathBuf};

use protocol::{ControlMessage, FrameType};
use tokio::net::{TcpListener, TcpStream};
use tunnel::transport::{self, TlsSettings};

/// PEM material for one test identity.
struct TestIdentity {
    cert: PathBuf,
    key: PathBuf,
}

/// Mint a CA plus a CA-signed end-entity identity under `dir`.
fn make_ca_and_identity(dir: &Path, stem: &str) -> (PathBuf, TestIdentity) {
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let ee_key = rcgen::KeyPair::generate().unwrap();
    let ee_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let ee_cert = ee_params.signed_by(&ee_key, &ca_cert, &ca_key).unwrap();

    let ca_path = dir.join(format!("{stem}-ca.pem"));
    let cert_path = dir.join(format!("{stem}-cert.pem"));
    let key_path = dir.join(format!("{stem}-key.pem"));
    std::fs::write(&ca_path, ca_cert.pem()).unwrap();
    std::fs::write(&cert_path, ee_cert.pem()).unwrap();
    std::fs::write(&key_path, ee_key.serialize_pem()).unwrap();

    (
        ca_path,
        TestIdentity {
            cert: cert_path,
            key: key_path,
        },
    )
}

/// Self-signed identity with no CA.
fn make_self_signed(dir: &Path, stem: &str) -> TestIdentity {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join(format!("{stem}-cert.pem"));
    let key_path = dir.join(format!("{stem}-key.pem"));
    std::fs::write(&cert_path, generated.cert.pem()).unwrap();
    std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();
    TestIdentity {
        cert: cert_path,
        key: key_path,
    }
}

async fn loopback(
    server_settings: TlsSettings,
    client_settings: TlsSettings,
) -> (transport::SecureChannel, transport::SecureChannel) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        transport::accept(stream, &server_settings).await.unwrap()
    });
    let client = async {
        let stream = TcpStream::connect(addr).await.unwrap();
        transport::connect(stream, "localhost", &client_settings)
            .await
            .unwrap()
    };

    let (server_channel, client_channel) = tokio::join!(server, client);
    (server_channel.unwrap(), client_channel)
}

#[tokio::test]
async fn test_data_frames_survive_the_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let identity = make_self_signed(dir.path(), "server");

    let (mut server, mut client) = loopback(
        TlsSettings {
            cert: Some(identity.cert),
            key: Some(identity.key),
            ..Default::default()
        },
        TlsSettings::default(),
    )
    .await;

    client.writer.send_data(b"hello").await.unwrap();
    let frame = server.reader.read_frame().await.unwrap().unwrap();
    assert_eq!(frame.frame_type, FrameType::Data);
    assert_eq!(frame.payload, b"hello");

    server.writer.send_data(&[0u8, 1, 2, 3, 255]).await.unwrap();
    let frame = client.reader.read_frame().await.unwrap().unwrap();
    assert_eq!(frame.payload, vec![0u8, 1, 2, 3, 255]);
}

#[tokio::test]
async fn test_control_frames_survive_the_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let identity = make_self_signed(dir.path(), "server");

    let (mut server, client) = loopback(
        TlsSettings {
            cert: Some(identity.cert),
            key: Some(identity.key),
            ..Default::default()
        },
        TlsSettings::default(),
    )
    .await;

    client
        .writer
        .send_control(&ControlMessage::Winch { rows: 60, cols: 200 })
        .await
        .unwrap();
    let frame = server.reader.read_frame().await.unwrap().unwrap();
    assert_eq!(frame.frame_type, FrameType::Control);
    assert_eq!(
        ControlMessage::from_bytes(&frame.payload).unwrap(),
        ControlMessage::Winch { rows: 60, cols: 200 }
    );
}

#[tokio::test]
async fn test_no_client_cert_means_empty_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let identity = make_self_signed(dir.path(), "server");

    let (server, client) = loopback(
        TlsSettings {
            cert: Some(identity.cert),
            key: Some(identity.key),
            ..Default::default()
        },
        TlsSettings::default(),
    )
    .await;

    // The client sees the server's certificate; the server sees none.
    assert_eq!(client.info.peer_fingerprint.len(), 64);
    assert!(client
        .info
        .peer_fingerprint
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert!(server.info.peer_fingerprint.is_empty());
}

#[tokio::test]
async fn test_mutual_auth_yields_both_fingerprints() {
    let dir = tempfile::tempdir().unwrap();
    let (server_ca, server_id) = make_ca_and_identity(dir.path(), "server");
    let (client_ca, client_id) = make_ca_and_identity(dir.path(), "client");

    let (server, client) = loopback(
        TlsSettings {
            cert: Some(server_id.cert),
            key: Some(server_id.key),
            trust_anchor: Some(client_ca),
            verify_required: true,
        },
        TlsSettings {
            cert: Some(client_id.cert),
            key: Some(client_id.key),
            trust_anchor: Some(server_ca),
            verify_required: true,
        },
    )
    .await;

    assert_eq!(server.info.peer_fingerprint.len(), 64);
    assert_eq!(client.info.peer_fingerprint.len(), 64);
    assert_ne!(server.info.peer_fingerprint, client.info.peer_fingerprint);
}

#[tokio::test]
async fn test_handshake_info_reports_tls_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let identity = make_self_signed(dir.path(), "server");

    let (server, client) = loopback(
        TlsSettings {
            cert: Some(identity.cert),
            key: Some(identity.key),
            ..Default::default()
        },
        TlsSettings::default(),
    )
    .await;

    assert!(!server.info.protocol_version.is_empty());
    assert!(!server.info.cipher_suite.is_empty());
    assert_eq!(server.info.protocol_version, client.info.protocol_version);
    assert_eq!(server.info.cipher_suite, client.info.cipher_suite);
}

#[tokio::test]
async fn test_close_notify_reads_as_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let identity = make_self_signed(dir.path(), "server");

    let (mut server, client) = loopback(
        TlsSettings {
            cert: Some(identity.cert),
            key: Some(identity.key),
            ..Default::default()
        },
        TlsSettings::default(),
    )
    .await;

    client.writer.send_data(b"last words").await.unwrap();
    client.writer.close_notify().await;

    let frame = server.reader.read_frame().await.unwrap().unwrap();
    assert_eq!(frame.payload, b"last words");
    let end = tokio::time::timeout(std::time::Duration::from_secs(5), server.reader.read_frame())
        .await
        .expect("shutdown should propagate promptly")
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_unverified_client_rejected_when_required() {
    let dir = tempfile::tempdir().unwrap();
    let (client_ca, _client_id) = make_ca_and_identity(dir.path(), "client");
    let server_id = make_self_signed(dir.path(), "server");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_settings = TlsSettings {
        cert: Some(server_id.cert),
        key: Some(server_id.key),
        trust_anchor: Some(client_ca),
        verify_required: true,
    };

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        transport::accept(stream, &server_settings).await
    });

    // Client presents no certificate at all.
    let stream = TcpStream::connect(addr).await.unwrap();
    let client = transport::connect(stream, "localhost", &TlsSettings::default()).await;

    let server_result = server.await.unwrap();
    assert!(server_result.is_err(), "server must reject a certificate-less client");
    // The client side fails either at handshake time or on first use;
    // what matters is that no session forms. Reading must not yield data.
    if let Ok(mut channel) = client {
        let read = channel.reader.read_frame().await;
        assert!(matches!(read, Err(_) | Ok(None)));
    }
}
