//! hardened-tls - hardened TLS client connections
//!
//! This crate provides a TLS connection factory that restricts protocol
//! versions and cipher suites to a hardened allow-list computed from the
//! platform's OpenSSL, and delegates certificate trust and client identity
//! to pluggable collaborators.

pub mod tls;

pub use tls::{
    ConnectionFactory, HardenedPolicy, IdentityProvider, TlsError, TlsSocket, TrustEvaluator,
};
