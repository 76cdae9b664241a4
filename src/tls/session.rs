//! TLS sockets
//!
//! [`PendingSession`] is the window between creating an OpenSSL session and
//! starting its handshake, where the policy overrides are applied.
//! [`TlsSocket`] is what the factory hands back once the handshake is done.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use openssl::error::ErrorStack;
use openssl::ssl::{NameType, SslRef, SslStream};
use tracing::{debug, warn};

use super::cert::CertInfo;
use super::ciphers::{is_tls13_suite, openssl_name};
use super::config::{ConnectionError, TlsError, TlsVersion};
use super::policy::TlsParameters;
use super::probe;

/// Which parameters a policy pinned on a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Overrides {
    pub(crate) protocols: bool,
    pub(crate) cipher_suites: bool,
}

/// An OpenSSL session whose handshake has not started
pub(crate) struct PendingSession<'a> {
    ssl: &'a mut SslRef,
    overrides: Overrides,
}

impl<'a> PendingSession<'a> {
    pub(crate) fn new(ssl: &'a mut SslRef) -> Self {
        PendingSession {
            ssl,
            overrides: Overrides::default(),
        }
    }

    /// The overrides applied so far
    pub(crate) fn into_overrides(self) -> Overrides {
        self.overrides
    }

    fn set_bound(&mut self, min: Option<TlsVersion>, max: Option<TlsVersion>) -> Result<(), TlsError> {
        if let Some(min) = min {
            self.ssl
                .set_min_proto_version(Some(min.to_openssl_version()))
                .map_err(setup)?;
        }
        if let Some(max) = max {
            self.ssl
                .set_max_proto_version(Some(max.to_openssl_version()))
                .map_err(setup)?;
        }
        self.overrides.protocols = true;
        Ok(())
    }
}

impl TlsParameters for PendingSession<'_> {
    fn set_enabled_protocols(&mut self, protocols: &[String]) -> Result<(), TlsError> {
        let mut versions = protocols
            .iter()
            .map(|name| TlsVersion::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        versions.sort();
        versions.dedup();

        let (min, max) = highest_contiguous_run(&versions)
            .ok_or_else(|| TlsError::Configuration("empty protocol list".to_string()))?;

        // OpenSSL only enables a contiguous range of versions
        if versions.first() != Some(&min) {
            warn!(
                ?protocols,
                "protocol list has gaps, enabling only {} through {}",
                min.as_str(),
                max.as_str()
            );
        }

        self.set_bound(Some(min), Some(max))
    }

    fn set_enabled_cipher_suites(&mut self, suites: &[String]) -> Result<(), TlsError> {
        let (tls13, legacy): (Vec<&str>, Vec<&str>) = suites
            .iter()
            .map(String::as_str)
            .partition(|suite| is_tls13_suite(suite));

        let legacy: Vec<&str> = legacy
            .into_iter()
            .filter_map(|suite| {
                let mapped = openssl_name(suite);
                if mapped.is_none() {
                    debug!(suite, "cipher suite unknown to OpenSSL, skipped");
                }
                mapped
            })
            .collect();

        self.ssl.set_ciphersuites(&tls13.join(":")).map_err(setup)?;
        let has_tls13 = probe::cipher_suites(self.ssl)
            .iter()
            .any(|suite| is_tls13_suite(suite));

        if legacy.is_empty() && !has_tls13 {
            return Err(TlsError::Configuration(
                "no cipher suite in the list is known to OpenSSL".to_string(),
            ));
        }

        if legacy.is_empty() {
            // The session's own list below TLS 1.3 cannot be emptied, so
            // those versions are switched off instead
            if !probe::enabled_versions(self.ssl).contains(&TlsVersion::Tls13) {
                return Err(TlsError::Configuration(
                    "cipher suites require TLSv1.3, which is not enabled".to_string(),
                ));
            }
            debug!("no cipher suite below TLS 1.3 allowed, restricting session to TLSv1.3");
            self.set_bound(Some(TlsVersion::Tls13), None)?;
        } else {
            self.ssl.set_cipher_list(&legacy.join(":")).map_err(setup)?;
        }

        if !has_tls13 {
            let highest = probe::enabled_versions(self.ssl)
                .into_iter()
                .filter(|v| *v < TlsVersion::Tls13)
                .max()
                .ok_or_else(|| {
                    TlsError::Configuration(
                        "cipher suites require TLSv1.2 or older, none of which is enabled"
                            .to_string(),
                    )
                })?;
            debug!(max = highest.as_str(), "no TLS 1.3 cipher suite allowed, capping protocol version");
            self.set_bound(None, Some(highest))?;
        }

        self.overrides.cipher_suites = true;
        Ok(())
    }
}

/// Bounds of the newest gap-free run in a sorted, deduplicated list
fn highest_contiguous_run(versions: &[TlsVersion]) -> Option<(TlsVersion, TlsVersion)> {
    let max = *versions.last()?;
    let mut min = max;
    for version in versions.iter().rev().skip(1) {
        let adjacent = TlsVersion::ALL
            .windows(2)
            .any(|pair| pair[0] == *version && pair[1] == min);
        if !adjacent {
            break;
        }
        min = *version;
    }
    Some((min, max))
}

fn setup(e: ErrorStack) -> TlsError {
    TlsError::Connection(ConnectionError::Setup(e))
}

/// Snapshot of a negotiated session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Negotiated protocol version (e.g., "TLSv1.3")
    pub version: String,
    /// Negotiated cipher suite, IANA name
    pub cipher: Option<String>,
    /// SNI servername sent
    pub servername: Option<String>,
    /// Negotiated ALPN protocol
    pub alpn: Option<String>,
    /// Whether the session was resumed
    pub session_reused: bool,
    /// Peer chain, leaf first
    pub peer_chain: Vec<CertInfo>,
}

impl SessionInfo {
    fn from_ssl(ssl: &SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .and_then(|c| c.standard_name())
                .map(str::to_string),
            servername: ssl.servername(NameType::HOST_NAME).map(str::to_string),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            session_reused: ssl.session_reused(),
            peer_chain: peer_chain(ssl),
        }
    }
}

fn peer_chain(ssl: &SslRef) -> Vec<CertInfo> {
    // On the client side the peer chain already includes the leaf
    match ssl.peer_cert_chain() {
        Some(chain) => chain.iter().map(CertInfo::from_x509).collect(),
        None => ssl
            .peer_certificate()
            .map(|cert| vec![CertInfo::from_x509(&cert)])
            .unwrap_or_default(),
    }
}

/// An established TLS connection
pub struct TlsSocket {
    stream: SslStream<TcpStream>,
    host: String,
    port: u16,
    auto_close: bool,
    transport: Option<TcpStream>,
    overrides: Overrides,
}

impl TlsSocket {
    pub(crate) fn new(
        stream: SslStream<TcpStream>,
        host: &str,
        port: u16,
        transport: Option<TcpStream>,
        overrides: Overrides,
    ) -> Self {
        TlsSocket {
            stream,
            host: host.to_string(),
            port,
            auto_close: transport.is_none(),
            transport,
            overrides,
        }
    }

    /// Host this socket was created for
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port this socket was created for
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Protocol versions enabled on this session, read back from OpenSSL
    ///
    /// `None` when the policy left protocols to the platform.
    pub fn enabled_protocols(&self) -> Option<Vec<String>> {
        self.overrides
            .protocols
            .then(|| probe::enabled_protocols(self.stream.ssl()))
    }

    /// Cipher suites enabled on this session, read back from OpenSSL
    ///
    /// Only suites usable with the enabled protocol versions are listed.
    /// `None` when the policy left cipher suites to the platform.
    pub fn enabled_cipher_suites(&self) -> Option<Vec<String>> {
        self.overrides
            .cipher_suites
            .then(|| probe::enabled_cipher_suites(self.stream.ssl()))
    }

    /// Cipher suite list configured on the OpenSSL session
    ///
    /// Unlike [`TlsSocket::enabled_cipher_suites`] this ignores the protocol
    /// bounds.
    pub fn session_cipher_suites(&self) -> Vec<String> {
        probe::cipher_suites(self.stream.ssl())
    }

    /// Negotiated protocol version
    pub fn protocol_version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Negotiated cipher suite, IANA name
    pub fn cipher_suite(&self) -> Option<&'static str> {
        self.stream.ssl().current_cipher().and_then(|c| c.standard_name())
    }

    /// Snapshot of the negotiated session
    pub fn session_info(&self) -> SessionInfo {
        SessionInfo::from_ssl(self.stream.ssl())
    }

    /// Underlying OpenSSL session
    pub fn ssl(&self) -> &SslRef {
        self.stream.ssl()
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    /// Get mutable reference to underlying TCP stream
    pub fn get_mut(&mut self) -> &mut TcpStream {
        self.stream.get_mut()
    }

    /// Send close_notify, and close the transport if this socket owns it
    pub fn shutdown(&mut self) -> io::Result<()> {
        if let Err(e) = self.stream.shutdown() {
            debug!(error = %e, "TLS shutdown incomplete");
        }
        if self.auto_close {
            self.stream.get_mut().shutdown(Shutdown::Both)?;
        }
        Ok(())
    }

    /// Close the TLS layer and hand back the transport
    ///
    /// Only sockets created by `upgrade` with `auto_close == false` keep
    /// their transport; every other socket returns `None`.
    pub fn into_transport(mut self) -> Option<TcpStream> {
        if let Err(e) = self.stream.shutdown() {
            debug!(error = %e, "TLS shutdown incomplete");
        }
        self.transport.take()
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("version", &self.protocol_version())
            .field("cipher", &self.cipher_suite())
            .finish()
    }
}

impl Read for TlsSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
