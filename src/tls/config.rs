//! Factory configuration
//!
//! This module provides the builder used to assemble a [`ConnectionFactory`],
//! the protocol version names understood by the factory and its error types.

use std::io;
use std::sync::Arc;

use openssl::error::ErrorStack;
use openssl::ssl::{SslContextBuilder, SslMethod, SslVerifyMode};
use tracing::debug;

use super::factory::ConnectionFactory;
use super::identity::IdentityProvider;
use super::policy::HardenedPolicy;
use super::trust::{TrustError, TrustEvaluator};

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// SSL 3.0 (legacy, never enabled by a hardened policy)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Every version the factory knows about, oldest first
    pub const ALL: [TlsVersion; 5] = [
        TlsVersion::Ssl3,
        TlsVersion::Tls10,
        TlsVersion::Tls11,
        TlsVersion::Tls12,
        TlsVersion::Tls13,
    ];

    /// Parse a protocol name (case-insensitive)
    ///
    /// Accepts the names OpenSSL reports (`TLSv1`, `TLSv1.2`, ...) as well as
    /// the dotted `TLSv1.0` spelling.
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Protocol version number as it appears on the wire
    pub(crate) fn wire_version(&self) -> i32 {
        match self {
            TlsVersion::Ssl3 => openssl_sys::SSL3_VERSION,
            TlsVersion::Tls10 => openssl_sys::TLS1_VERSION,
            TlsVersion::Tls11 => openssl_sys::TLS1_1_VERSION,
            TlsVersion::Tls12 => openssl_sys::TLS1_2_VERSION,
            TlsVersion::Tls13 => openssl_sys::TLS1_3_VERSION,
        }
    }

    /// Protocol name as reported by the platform
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),
}

/// Failures while creating a real connection
///
/// These are raised by the transport, by OpenSSL or by the trust evaluator;
/// the factory passes them through without retrying.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS session setup failed: {0}")]
    Setup(#[source] ErrorStack),

    #[error("Handshake failed: {0}")]
    Handshake(#[source] openssl::ssl::Error),

    #[error("Peer rejected by trust evaluator: {0}")]
    TrustRejected(#[source] TrustError),
}

/// Builder for [`ConnectionFactory`]
pub struct ConnectionFactoryBuilder {
    identity: Option<Arc<dyn IdentityProvider>>,
    trust: Option<Arc<dyn TrustEvaluator>>,
    policy: Option<Arc<HardenedPolicy>>,
    servername: bool,
    alpn: Vec<String>,
}

impl ConnectionFactoryBuilder {
    pub(crate) fn new() -> Self {
        ConnectionFactoryBuilder {
            identity: None,
            trust: None,
            policy: None,
            servername: true,
            alpn: Vec::new(),
        }
    }

    /// Offer a client certificate from this provider
    pub fn identity<P: IdentityProvider + 'static>(self, provider: P) -> Self {
        self.identity_arc(Arc::new(provider))
    }

    /// Offer a client certificate from a shared provider
    pub fn identity_arc(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Decide peer trust with this evaluator (required)
    pub fn trust<T: TrustEvaluator + 'static>(self, evaluator: T) -> Self {
        self.trust_arc(Arc::new(evaluator))
    }

    /// Decide peer trust with a shared evaluator (required)
    pub fn trust_arc(mut self, evaluator: Arc<dyn TrustEvaluator>) -> Self {
        self.trust = Some(evaluator);
        self
    }

    /// Use an explicit policy instead of the process-wide one
    pub fn policy(mut self, policy: Arc<HardenedPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Send SNI for DNS host names (enabled by default)
    pub fn servername(mut self, enabled: bool) -> Self {
        self.servername = enabled;
        self
    }

    /// Offer ALPN protocols, in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Build the factory
    ///
    /// Fails with [`TlsError::Configuration`] when no trust evaluator was
    /// given, or OpenSSL cannot set up a client context or install the
    /// identity. Errors from the identity provider itself pass through.
    pub fn build(self) -> Result<ConnectionFactory, TlsError> {
        let trust = self.trust.ok_or_else(|| {
            TlsError::Configuration("a trust evaluator is required".to_string())
        })?;

        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| configuration("create SSL context", e))?;

        // Trust is decided per connection by the evaluator's verify callback
        ctx_builder.set_verify(SslVerifyMode::PEER);

        if let Some(provider) = &self.identity {
            match provider.identity()? {
                Some(identity) => {
                    identity.install(&mut ctx_builder)?;
                    debug!(subject = %identity.info().subject, "installed client identity");
                }
                None => debug!("identity provider offered no client certificate"),
            }
        }

        if !self.alpn.is_empty() {
            let wire = encode_alpn(&self.alpn)?;
            ctx_builder
                .set_alpn_protos(&wire)
                .map_err(|e| configuration("set ALPN protocols", e))?;
        }

        let policy = self.policy.unwrap_or_else(HardenedPolicy::global);

        Ok(ConnectionFactory {
            ctx: ctx_builder.build(),
            trust,
            policy,
            servername: self.servername,
        })
    }
}

fn configuration(what: &str, e: ErrorStack) -> TlsError {
    TlsError::Configuration(format!("Failed to {}: {}", what, e))
}

/// Encode ALPN protocols (length-prefixed)
fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut wire = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| TlsError::Configuration(format!("invalid ALPN protocol: {:?}", proto)))?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}
