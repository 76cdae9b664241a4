//! Shared fixtures for integration tests
//!
//! Certificates are generated per test run (EC P-256, self-signed) so no key
//! material is checked in.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread;

use hardened_tls::tls::{TrustError, TrustEvaluator};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{select_next_proto, AlpnError, NameType, SslAcceptor, SslMethod, SslVerifyMode};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

/// Self-signed certificate for `cn`, usable as its own trust anchor
pub fn self_signed(cn: &str) -> (X509, PKey<Private>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_cert_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns(cn)
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Certificate followed by its private key, PEM encoded
pub fn pem_bundle(cert: &X509, key: &PKey<Private>) -> Vec<u8> {
    let mut pem = cert.to_pem().unwrap();
    pem.extend(key.private_key_to_pem_pkcs8().unwrap());
    pem
}

/// What the test server observed about one connection
#[derive(Debug, Default)]
pub struct ServerSeen {
    pub servername: Option<String>,
    pub client_subject: Option<String>,
    pub alpn: Option<String>,
    pub handshake_ok: bool,
}

/// Options for the test server
#[derive(Default)]
pub struct ServerOptions {
    pub require_client_cert: bool,
    /// ALPN protocols in wire format
    pub alpn: Option<&'static [u8]>,
}

/// TLS echo server accepting a single connection
///
/// Echoes the first five bytes back, then closes.
pub fn spawn_server(
    cert: X509,
    key: PKey<Private>,
    options: ServerOptions,
) -> (u16, thread::JoinHandle<ServerSeen>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    acceptor.set_certificate(&cert).unwrap();
    acceptor.set_private_key(&key).unwrap();
    if options.require_client_cert {
        acceptor.set_verify_callback(
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            |_, _| true,
        );
    }
    if let Some(protocols) = options.alpn {
        acceptor.set_alpn_select_callback(move |_, client| {
            select_next_proto(protocols, client).ok_or(AlpnError::NOACK)
        });
    }
    let acceptor = acceptor.build();

    let handle = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().unwrap();
        let mut seen = ServerSeen::default();

        let mut tls_stream = match acceptor.accept(tcp_stream) {
            Ok(stream) => stream,
            Err(_) => return seen,
        };
        seen.handshake_ok = true;
        seen.servername = tls_stream
            .ssl()
            .servername(NameType::HOST_NAME)
            .map(str::to_string);
        seen.alpn = tls_stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        seen.client_subject = tls_stream.ssl().peer_certificate().and_then(|cert| {
            cert.subject_name()
                .entries_by_nid(Nid::COMMONNAME)
                .next()
                .and_then(|entry| entry.data().as_utf8().ok())
                .map(|cn| cn.to_string())
        });

        let mut buf = [0u8; 5];
        if tls_stream.read_exact(&mut buf).is_ok() {
            let _ = tls_stream.write_all(&buf);
        }
        let _ = tls_stream.shutdown();
        seen
    });

    (port, handle)
}

/// Trust evaluator recording every call
pub struct RecordingTrust {
    accept: bool,
    pub calls: Mutex<Vec<(usize, String)>>,
}

impl RecordingTrust {
    pub fn accepting() -> Self {
        RecordingTrust {
            accept: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        RecordingTrust {
            accept: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl TrustEvaluator for RecordingTrust {
    fn check_server_trusted(&self, chain: &[X509], auth_type: &str) -> Result<(), TrustError> {
        self.calls
            .lock()
            .unwrap()
            .push((chain.len(), auth_type.to_string()));
        if self.accept {
            Ok(())
        } else {
            Err(TrustError::Evaluation("rejected by test".to_string()))
        }
    }
}
