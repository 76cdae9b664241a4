//! Client handshake
//!
//! Creates the OpenSSL session for one connection, applies the policy while
//! the session is still unconfigured on the wire, then drives the blocking
//! handshake. The handshake itself is done by `Ssl::connect`.

use std::io;
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use openssl::ssl::{HandshakeError, Ssl, SslContext, SslVerifyMode};
use tracing::debug;

use super::config::{ConnectionError, TlsError};
use super::policy::HardenedPolicy;
use super::session::{PendingSession, TlsSocket};
use super::trust::{verify_callback, TrustEvaluator};

/// Everything a handshake needs from the factory
pub(crate) struct Handshake<'a> {
    pub(crate) ctx: &'a SslContext,
    pub(crate) trust: &'a Arc<dyn TrustEvaluator>,
    pub(crate) policy: &'a HardenedPolicy,
    pub(crate) servername: bool,
}

impl Handshake<'_> {
    /// Run the client handshake over `stream`
    ///
    /// With `transport` set, the socket keeps that handle so the caller can
    /// reclaim the connection after closing TLS.
    pub(crate) fn connect(
        &self,
        stream: TcpStream,
        host: &str,
        port: u16,
        transport: Option<TcpStream>,
    ) -> Result<TlsSocket, TlsError> {
        let mut ssl = Ssl::new(self.ctx).map_err(ConnectionError::Setup)?;

        if self.servername && host.parse::<IpAddr>().is_err() {
            ssl.set_hostname(host).map_err(ConnectionError::Setup)?;
        }

        let verdict = Arc::new(OnceCell::new());
        ssl.set_verify_callback(
            SslVerifyMode::PEER,
            verify_callback(Arc::clone(self.trust), Arc::clone(&verdict)),
        );

        let mut pending = PendingSession::new(&mut ssl);
        self.policy.apply(&mut pending)?;
        let overrides = pending.into_overrides();
        debug!(
            host,
            port,
            protocols_pinned = overrides.protocols,
            cipher_suites_pinned = overrides.cipher_suites,
            "starting TLS handshake"
        );

        match ssl.connect(stream) {
            Ok(stream) => {
                debug!(host, port, version = stream.ssl().version_str(), "TLS handshake complete");
                Ok(TlsSocket::new(stream, host, port, transport, overrides))
            }
            Err(HandshakeError::SetupFailure(e)) => Err(ConnectionError::Setup(e).into()),
            Err(HandshakeError::Failure(mid)) => match verdict.get() {
                Some(Err(rejection)) => Err(ConnectionError::TrustRejected(rejection.clone()).into()),
                _ => Err(ConnectionError::Handshake(mid.into_error()).into()),
            },
            Err(HandshakeError::WouldBlock(_)) => Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "handshake would block on a non-blocking stream",
            ))
            .into()),
        }
    }
}
