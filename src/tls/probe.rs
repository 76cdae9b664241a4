//! Platform capability probing
//!
//! The probe opens throwaway OpenSSL sessions that never touch the network
//! and reads back which protocol versions and cipher suites the linked
//! library offers. The same read-back helpers report what a live session
//! has enabled.

use foreign_types::{ForeignType, ForeignTypeRef};
use once_cell::sync::OnceCell;
use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslCipher, SslContextBuilder, SslMethod, SslRef};
use openssl::stack::{Stack, StackRef};

use super::ciphers::is_tls13_suite;
use super::config::TlsVersion;
use super::policy::Capabilities;

/// First OpenSSL release whose default security level refuses SSLv3,
/// TLS 1.0 and TLS 1.1 (3.0.0)
pub const SAFE_DEFAULTS_OPENSSL_VERSION: i64 = 0x3000_0000;

/// First OpenSSL release with TLS 1.3 (1.1.1)
const TLS13_OPENSSL_VERSION: i64 = 0x1010_1000;

/// Cipher string selecting every suite the library was built with
const ALL_CIPHERS: &str = "ALL:COMPLEMENTOFALL";

// Neither is bound by openssl-sys
extern "C" {
    fn SSL_get_ciphers(ssl: *const openssl_sys::SSL) -> *mut openssl_sys::stack_st_SSL_CIPHER;
    fn SSL_get1_supported_ciphers(ssl: *mut openssl_sys::SSL) -> *mut openssl_sys::stack_st_SSL_CIPHER;
}

/// Capability probe failures
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("capabilities unavailable: {0}")]
    Unavailable(String),
}

/// Source of platform capability reports
pub trait CapabilityProbe {
    /// Whether the platform defaults are already safe, making a probe
    /// unnecessary
    fn has_safe_defaults(&self) -> bool;

    /// Read the platform's supported and default parameters
    fn probe(&self) -> Result<Capabilities, ProbeError>;
}

/// Probe for the linked OpenSSL library
#[derive(Debug, Clone, Copy)]
pub struct OpensslProbe {
    assume_safe_defaults: bool,
}

impl OpensslProbe {
    /// Probe gated on the library version
    ///
    /// Libraries at or above [`SAFE_DEFAULTS_OPENSSL_VERSION`] are trusted to
    /// pick safe parameters on their own and are not probed.
    pub fn new() -> Self {
        OpensslProbe {
            assume_safe_defaults: openssl::version::number() >= SAFE_DEFAULTS_OPENSSL_VERSION,
        }
    }

    /// Probe that always queries the library
    pub fn forced() -> Self {
        OpensslProbe {
            assume_safe_defaults: false,
        }
    }
}

impl Default for OpensslProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe for OpensslProbe {
    fn has_safe_defaults(&self) -> bool {
        self.assume_safe_defaults
    }

    fn probe(&self) -> Result<Capabilities, ProbeError> {
        Ok(Capabilities {
            supported_protocols: supported_protocols()?,
            default_cipher_suites: default_cipher_suites()?,
            supported_cipher_suites: supported_cipher_suites()?,
        })
    }
}

/// Protocol versions the library can negotiate, oldest first
///
/// A version counts when a session pinned to it still has a usable cipher
/// suite. Versions compiled out of the library or refused by its security
/// level have none.
pub fn supported_protocols() -> Result<Vec<String>, ProbeError> {
    Ok(supported_versions()?
        .into_iter()
        .map(|version| version.as_str().to_string())
        .collect())
}

fn supported_versions() -> Result<Vec<TlsVersion>, ProbeError> {
    static SUPPORTED: OnceCell<Vec<TlsVersion>> = OnceCell::new();
    SUPPORTED.get_or_try_init(query_supported_versions).cloned()
}

fn query_supported_versions() -> Result<Vec<TlsVersion>, ProbeError> {
    let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;
    ctx_builder.set_cipher_list(ALL_CIPHERS)?;
    let ctx = ctx_builder.build();

    let mut supported = Vec::new();
    for version in TlsVersion::ALL {
        if version == TlsVersion::Tls13 && openssl::version::number() < TLS13_OPENSSL_VERSION {
            continue;
        }
        let mut ssl = Ssl::new(&ctx)?;
        let bound = Some(version.to_openssl_version());
        if ssl.set_min_proto_version(bound).is_err() || ssl.set_max_proto_version(bound).is_err() {
            continue;
        }
        if usable_cipher_count(&mut ssl) > 0 {
            supported.push(version);
        }
    }
    if supported.is_empty() {
        return Err(ProbeError::Unavailable("no protocol version usable".to_string()));
    }
    Ok(supported)
}

fn usable_cipher_count(ssl: &mut SslRef) -> usize {
    // SAFETY: the returned stack is owned by the caller; `Stack` frees it
    // without freeing the static cipher entries
    unsafe {
        let ptr = SSL_get1_supported_ciphers(ssl.as_ptr());
        if ptr.is_null() {
            // drain the "no protocols available" error
            let _ = ErrorStack::get();
            return 0;
        }
        Stack::<SslCipher>::from_ptr(ptr).len()
    }
}

/// Protocol versions a session may negotiate, oldest first
///
/// Versions within the session's bounds that the library supports. An unset
/// bound leaves that side open.
pub fn enabled_protocols(ssl: &SslRef) -> Vec<String> {
    enabled_versions(ssl)
        .into_iter()
        .map(|version| version.as_str().to_string())
        .collect()
}

pub(crate) fn enabled_versions(ssl: &SslRef) -> Vec<TlsVersion> {
    // SAFETY: read-only queries on a live session
    let (min, max) = unsafe {
        (
            openssl_sys::SSL_get_min_proto_version(ssl.as_ptr()),
            openssl_sys::SSL_get_max_proto_version(ssl.as_ptr()),
        )
    };
    supported_versions()
        .unwrap_or_default()
        .into_iter()
        .filter(|version| min == 0 || version.wire_version() >= min)
        .filter(|version| max == 0 || version.wire_version() <= max)
        .collect()
}

/// Cipher suites a session may negotiate, in preference order
///
/// The session's configured list restricted to suites usable with its
/// enabled protocol versions.
pub fn enabled_cipher_suites(ssl: &SslRef) -> Vec<String> {
    let versions = enabled_versions(ssl);
    let tls13 = versions.contains(&TlsVersion::Tls13);
    let legacy = versions.iter().any(|version| *version < TlsVersion::Tls13);

    cipher_suites(ssl)
        .into_iter()
        .filter(|suite| if is_tls13_suite(suite) { tls13 } else { legacy })
        .collect()
}

/// Cipher suites a fresh client context enables
pub fn default_cipher_suites() -> Result<Vec<String>, ProbeError> {
    let ctx = SslContextBuilder::new(SslMethod::tls_client())?.build();
    let ssl = Ssl::new(&ctx)?;
    Ok(cipher_suites(&ssl))
}

/// Every cipher suite the library was built with
pub fn supported_cipher_suites() -> Result<Vec<String>, ProbeError> {
    let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;
    ctx_builder.set_cipher_list(ALL_CIPHERS)?;
    let ssl = Ssl::new(&ctx_builder.build())?;
    Ok(cipher_suites(&ssl))
}

/// IANA names of the cipher suites enabled on a session, in preference order
pub fn cipher_suites(ssl: &SslRef) -> Vec<String> {
    // SAFETY: the stack is owned by `ssl` and only borrowed for this call
    unsafe {
        let ptr = SSL_get_ciphers(ssl.as_ptr());
        if ptr.is_null() {
            return Vec::new();
        }
        StackRef::<SslCipher>::from_ptr(ptr)
            .iter()
            .filter_map(|cipher| cipher.standard_name())
            .map(str::to_string)
            .collect()
    }
}
