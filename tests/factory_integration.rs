//! Connection factory integration tests
//!
//! Each test runs a loopback OpenSSL server on its own thread and connects
//! to it through a `ConnectionFactory`.

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use common::{pem_bundle, self_signed, spawn_server, RecordingTrust, ServerOptions};
use hardened_tls::tls::{
    Capabilities, CipherSelection, ConnectionError, ConnectionFactory, HardenedPolicy, OpensslProbe, PemIdentity,
    RootStoreTrust, TlsError, TlsSocket,
};

fn forced_policy() -> Arc<HardenedPolicy> {
    Arc::new(HardenedPolicy::compute(&OpensslProbe::forced()))
}

fn sorted(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items
}

fn echo(socket: &mut TlsSocket) {
    socket.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    socket.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn test_connect_without_identity() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let trust = Arc::new(RecordingTrust::accepting());
    let factory = ConnectionFactory::new(None, trust.clone()).unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();
    echo(&mut socket);
    socket.shutdown().unwrap();

    let seen = server.join().unwrap();
    assert!(seen.handshake_ok);
    assert_eq!(seen.client_subject, None);

    let calls = trust.calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "trust is evaluated once per handshake");
    assert_eq!(calls[0], (1, "EC".to_string()));
}

#[test]
fn test_policy_applied_exactly() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let policy = forced_policy();
    assert!(policy.is_active());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .policy(Arc::clone(&policy))
        .build()
        .unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();

    let protocols = policy.protocols().unwrap();
    assert_eq!(socket.enabled_protocols().as_deref(), Some(protocols));
    assert!(protocols.iter().all(|p| !p.starts_with("SSL")));
    assert!(protocols.iter().any(|p| p == socket.protocol_version()));

    // OpenSSL lists TLS 1.3 suites ahead of older ones, so compare contents
    let suites = sorted(policy.cipher_suites().unwrap());
    assert_eq!(sorted(&socket.session_cipher_suites()), suites);
    assert_eq!(socket.enabled_cipher_suites().map(|s| sorted(&s)), Some(suites.clone()));
    let negotiated = socket.cipher_suite().unwrap();
    assert!(suites.iter().any(|s| s == negotiated));

    echo(&mut socket);
    socket.shutdown().unwrap();
    assert!(server.join().unwrap().handshake_ok);
}

#[test]
fn test_tls13_only_policy_bounds_session() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let report = Capabilities {
        supported_protocols: Vec::new(),
        default_cipher_suites: Vec::new(),
        supported_cipher_suites: vec!["TLS_AES_128_GCM_SHA256".to_string()],
    };
    let policy = HardenedPolicy::from_capabilities(&report, CipherSelection::Strict);
    assert_eq!(policy.protocols(), None);
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .policy(Arc::new(policy))
        .build()
        .unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();

    assert_eq!(socket.enabled_protocols(), Some(vec!["TLSv1.3".to_string()]));
    assert_eq!(
        socket.enabled_cipher_suites(),
        Some(vec!["TLS_AES_128_GCM_SHA256".to_string()])
    );
    assert_eq!(socket.protocol_version(), "TLSv1.3");
    assert_eq!(socket.cipher_suite(), Some("TLS_AES_128_GCM_SHA256"));

    echo(&mut socket);
    socket.shutdown().unwrap();
    server.join().unwrap();
}

#[test]
fn test_unset_policy_leaves_platform_defaults() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .policy(Arc::new(HardenedPolicy::unset()))
        .build()
        .unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();

    assert_eq!(socket.enabled_protocols(), None);
    assert_eq!(socket.enabled_cipher_suites(), None);
    assert_eq!(socket.session_cipher_suites(), factory.default_cipher_suites());

    echo(&mut socket);
    socket.shutdown().unwrap();
    server.join().unwrap();
}

#[test]
fn test_client_identity_presented() {
    let (server_cert, server_key) = self_signed("localhost");
    let (client_cert, client_key) = self_signed("client");
    let (port, server) = spawn_server(
        server_cert,
        server_key,
        ServerOptions {
            require_client_cert: true,
            ..Default::default()
        },
    );

    let mut pem = tempfile::NamedTempFile::new().unwrap();
    pem.write_all(&pem_bundle(&client_cert, &client_key)).unwrap();
    pem.flush().unwrap();

    let identity = PemIdentity::from_pem_file(pem.path()).unwrap();
    assert_eq!(identity.inner().info().subject, "client");

    let factory = ConnectionFactory::builder()
        .identity(identity)
        .trust(RecordingTrust::accepting())
        .policy(forced_policy())
        .build()
        .unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();
    echo(&mut socket);
    socket.shutdown().unwrap();

    let seen = server.join().unwrap();
    assert_eq!(seen.client_subject.as_deref(), Some("client"));
}

#[test]
fn test_trust_rejection_reported() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let trust = Arc::new(RecordingTrust::rejecting());
    let factory = ConnectionFactory::builder()
        .trust_arc(trust.clone())
        .policy(forced_policy())
        .build()
        .unwrap();

    let result = factory.connect("127.0.0.1", port);

    match result {
        Err(TlsError::Connection(ConnectionError::TrustRejected(e))) => {
            assert!(e.to_string().contains("rejected by test"))
        }
        other => panic!("expected trust rejection, got {:?}", other),
    }
    assert_eq!(trust.calls.lock().unwrap().len(), 1);
    assert!(!server.join().unwrap().handshake_ok);
}

#[test]
fn test_root_store_trust_accepts_anchor() {
    let (cert, key) = self_signed("localhost");
    let anchor = cert.clone();
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let factory = ConnectionFactory::builder()
        .trust(RootStoreTrust::from_certificates([anchor]).unwrap())
        .policy(forced_policy())
        .build()
        .unwrap();

    let mut socket = factory.connect("localhost", port).unwrap();
    let info = socket.session_info();
    assert_eq!(info.peer_chain.len(), 1);
    assert_eq!(info.peer_chain[0].subject, "localhost");
    assert!(info.peer_chain[0].is_self_issued());

    echo(&mut socket);
    socket.shutdown().unwrap();
    assert_eq!(server.join().unwrap().servername.as_deref(), Some("localhost"));
}

#[test]
fn test_root_store_trust_ignores_hostname() {
    let (cert, key) = self_signed("elsewhere.test");
    let anchor = cert.clone();
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let factory = ConnectionFactory::builder()
        .trust(RootStoreTrust::from_certificates([anchor]).unwrap())
        .build()
        .unwrap();

    let mut socket = factory.connect("localhost", port).unwrap();
    assert_eq!(socket.session_info().peer_chain[0].subject, "elsewhere.test");

    echo(&mut socket);
    socket.shutdown().unwrap();
    assert_eq!(server.join().unwrap().servername.as_deref(), Some("localhost"));
}

#[test]
fn test_root_store_trust_rejects_unknown_issuer() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());

    let factory = ConnectionFactory::builder()
        .trust(RootStoreTrust::empty().unwrap())
        .build()
        .unwrap();

    let result = factory.connect("127.0.0.1", port);

    assert!(matches!(
        result,
        Err(TlsError::Connection(ConnectionError::TrustRejected(_)))
    ));
    server.join().unwrap();
}

#[test]
fn test_servername_sent_for_hostnames_only() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .build()
        .unwrap();

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let mut socket = factory.connect_addr(addr).unwrap();
    assert_eq!(socket.host(), "127.0.0.1");
    assert_eq!(socket.port(), port);
    echo(&mut socket);
    socket.shutdown().unwrap();

    assert_eq!(server.join().unwrap().servername, None);
}

#[test]
fn test_servername_disabled() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .servername(false)
        .build()
        .unwrap();

    let mut socket = factory.connect("localhost", port).unwrap();
    echo(&mut socket);
    socket.shutdown().unwrap();

    assert_eq!(server.join().unwrap().servername, None);
}

#[test]
fn test_alpn_negotiated() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(
        cert,
        key,
        ServerOptions {
            alpn: Some(b"\x08http/1.1"),
            ..Default::default()
        },
    );
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .alpn(&["h2", "http/1.1"])
        .build()
        .unwrap();

    let mut socket = factory.connect("127.0.0.1", port).unwrap();
    assert_eq!(socket.session_info().alpn.as_deref(), Some("http/1.1"));
    echo(&mut socket);
    socket.shutdown().unwrap();

    assert_eq!(server.join().unwrap().alpn.as_deref(), Some("http/1.1"));
}

#[test]
fn test_connect_from_local_address() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .policy(forced_policy())
        .build()
        .unwrap();

    let mut socket = factory
        .connect_from("127.0.0.1", port, "127.0.0.1".parse().unwrap(), 0)
        .unwrap();

    let local = socket.get_ref().local_addr().unwrap();
    assert_eq!(local.ip().to_string(), "127.0.0.1");
    assert_ne!(local.port(), 0);
    assert!(socket.enabled_cipher_suites().is_some());

    echo(&mut socket);
    socket.shutdown().unwrap();
    server.join().unwrap();
}

#[test]
fn test_upgrade_keeps_transport() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .policy(forced_policy())
        .build()
        .unwrap();

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let local = stream.local_addr().unwrap();

    let mut socket = factory.upgrade(stream, "localhost", port, false).unwrap();
    assert_eq!(socket.enabled_protocols().as_deref(), factory.policy().protocols());
    echo(&mut socket);

    let transport = socket.into_transport().expect("transport handed back");
    assert_eq!(transport.local_addr().unwrap(), local);
    assert_eq!(server.join().unwrap().servername.as_deref(), Some("localhost"));
}

#[test]
fn test_upgrade_with_auto_close_owns_transport() {
    let (cert, key) = self_signed("localhost");
    let (port, server) = spawn_server(cert, key, ServerOptions::default());
    let factory = ConnectionFactory::builder()
        .trust(RecordingTrust::accepting())
        .build()
        .unwrap();

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut socket = factory.upgrade(stream, "localhost", port, true).unwrap();
    echo(&mut socket);

    assert!(socket.into_transport().is_none());
    server.join().unwrap();
}
