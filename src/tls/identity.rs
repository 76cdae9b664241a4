//! Client identities for mutual TLS
//!
//! An [`IdentityProvider`] hands the factory at most one certificate chain
//! and private key to present when the server asks for a client certificate.

use std::fs;
use std::path::Path;

use openssl::pkey::{PKey, Private};
use openssl::ssl::SslContextBuilder;
use openssl::x509::X509;

use super::cert::CertInfo;
use super::config::TlsError;

/// Certificate chain and private key presented to servers
#[derive(Clone)]
pub struct Identity {
    certificate: X509,
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl Identity {
    /// Build an identity from a leaf, its intermediates and its key
    ///
    /// Fails when the key does not belong to the leaf certificate.
    pub fn new(certificate: X509, chain: Vec<X509>, key: PKey<Private>) -> Result<Self, TlsError> {
        let public = certificate
            .public_key()
            .map_err(|e| TlsError::Identity(format!("Failed to read certificate key: {}", e)))?;
        if !public.public_eq(&key) {
            return Err(TlsError::Identity(
                "private key does not match certificate".to_string(),
            ));
        }
        Ok(Identity { certificate, chain, key })
    }

    /// Leaf certificate
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Intermediate certificates, leaf excluded
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Summary of the leaf certificate
    pub fn info(&self) -> CertInfo {
        CertInfo::from_x509(&self.certificate)
    }

    pub(crate) fn install(&self, ctx_builder: &mut SslContextBuilder) -> Result<(), TlsError> {
        ctx_builder
            .set_certificate(&self.certificate)
            .map_err(|e| TlsError::Configuration(format!("Failed to set certificate: {}", e)))?;
        for cert in &self.chain {
            ctx_builder
                .add_extra_chain_cert(cert.clone())
                .map_err(|e| TlsError::Configuration(format!("Failed to add chain certificate: {}", e)))?;
        }
        ctx_builder
            .set_private_key(&self.key)
            .map_err(|e| TlsError::Configuration(format!("Failed to set private key: {}", e)))?;
        ctx_builder
            .check_private_key()
            .map_err(|e| TlsError::Configuration(format!("Private key check failed: {}", e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.info().subject)
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Source of the client identity
pub trait IdentityProvider: Send + Sync {
    /// The identity to present, if any
    fn identity(&self) -> Result<Option<Identity>, TlsError>;
}

/// Provider that never offers a client certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityProvider for NoIdentity {
    fn identity(&self) -> Result<Option<Identity>, TlsError> {
        Ok(None)
    }
}

/// Identity loaded from a PEM bundle
///
/// The bundle holds the leaf certificate first, then any intermediates, and
/// the private key.
#[derive(Debug, Clone)]
pub struct PemIdentity {
    identity: Identity,
}

impl PemIdentity {
    /// Load from PEM bytes
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        let mut certs = X509::stack_from_pem(pem)
            .map_err(|e| TlsError::Identity(format!("Failed to load certificates: {}", e)))?
            .into_iter();
        let certificate = certs
            .next()
            .ok_or_else(|| TlsError::Identity("no certificate in PEM bundle".to_string()))?;

        let key = PKey::private_key_from_pem(pem)
            .map_err(|e| TlsError::Identity(format!("Failed to load private key: {}", e)))?;

        Ok(PemIdentity {
            identity: Identity::new(certificate, certs.collect(), key)?,
        })
    }

    /// Load from a PEM file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, TlsError> {
        let pem = fs::read(path.as_ref())?;
        Self::from_pem(&pem)
    }

    /// The loaded identity
    pub fn inner(&self) -> &Identity {
        &self.identity
    }
}

impl IdentityProvider for PemIdentity {
    fn identity(&self) -> Result<Option<Identity>, TlsError> {
        Ok(Some(self.identity.clone()))
    }
}
