//! Hardened TLS client connections
//!
//! This module creates TLS client sockets over the system OpenSSL library
//! with the enabled protocol versions and cipher suites pinned to a hardened
//! allow-list, while certificate trust and client authentication are left to
//! pluggable collaborators.
//!
//! # Architecture
//!
//! 1. `HardenedPolicy` is computed once per process from what OpenSSL reports
//!    (`OpensslProbe`) and shared read-only by every factory
//! 2. `ConnectionFactory` owns an OpenSSL client context configured with an
//!    optional `IdentityProvider` and a required `TrustEvaluator`
//! 3. Each connection creates a session, applies the policy to it, and only
//!    then runs the handshake
//!
//! Legacy SSL protocol versions are never enabled. Cipher suites are the
//! platform defaults plus `KNOWN_GOOD_CIPHER_SUITES`, restricted to what the
//! platform supports. When the platform already ships safe defaults, or the
//! probe fails, sockets keep the platform's own selection.
//!
//! The factory never checks the server's hostname. Trust decisions, including
//! any name matching, belong to the `TrustEvaluator`; `RootStoreTrust` only
//! validates the chain.
//!
//! # Examples
//!
//! The session below is encrypted and chained to a system root, but the
//! certificate is not checked against `example.com`.
//!
//! ```no_run
//! use hardened_tls::tls::{ConnectionFactory, RootStoreTrust};
//! use std::io::{Read, Write};
//!
//! let factory = ConnectionFactory::builder()
//!     .trust(RootStoreTrust::system().unwrap())
//!     .build()
//!     .unwrap();
//!
//! let mut socket = factory.connect("example.com", 443).unwrap();
//! socket.write_all(b"HEAD / HTTP/1.0\r\nHost: example.com\r\n\r\n").unwrap();
//! let mut response = Vec::new();
//! socket.read_to_end(&mut response).unwrap();
//! ```
//!
//! ## Mutual TLS
//!
//! ```no_run
//! use hardened_tls::tls::{ConnectionFactory, PemIdentity, RootStoreTrust};
//!
//! let factory = ConnectionFactory::builder()
//!     .identity(PemIdentity::from_pem_file("client.pem").unwrap())
//!     .trust(RootStoreTrust::from_pem_file("ca.pem").unwrap())
//!     .build()
//!     .unwrap();
//!
//! let socket = factory.connect("internal.example.com", 8443).unwrap();
//! println!("{} {:?}", socket.protocol_version(), socket.cipher_suite());
//! ```

pub mod cert;
pub mod ciphers;
pub mod config;
pub mod factory;
mod handshake;
pub mod identity;
pub mod policy;
pub mod probe;
pub mod session;
pub mod trust;

pub use cert::CertInfo;
pub use ciphers::KNOWN_GOOD_CIPHER_SUITES;
pub use config::{ConnectionError, ConnectionFactoryBuilder, TlsError, TlsVersion};
pub use factory::ConnectionFactory;
pub use identity::{Identity, IdentityProvider, NoIdentity, PemIdentity};
pub use policy::{Capabilities, CipherSelection, HardenedPolicy, TlsParameters};
pub use probe::{CapabilityProbe, OpensslProbe, ProbeError};
pub use session::{SessionInfo, TlsSocket};
pub use trust::{RootStoreTrust, TrustError, TrustEvaluator};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
