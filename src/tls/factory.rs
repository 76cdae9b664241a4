//! Connection factory
//!
//! The factory holds one OpenSSL client context, the trust evaluator wired
//! into every session, and the shared hardened policy. Every socket it
//! creates gets the policy applied before its handshake starts.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use openssl::ssl::{Ssl, SslContext};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use super::config::{ConnectionError, ConnectionFactoryBuilder, TlsError};
use super::handshake::Handshake;
use super::identity::IdentityProvider;
use super::policy::HardenedPolicy;
use super::probe;
use super::session::TlsSocket;
use super::trust::TrustEvaluator;

/// Creates hardened TLS client connections
///
/// Cheap to clone; clones share the context, collaborators and policy.
#[derive(Clone)]
pub struct ConnectionFactory {
    pub(crate) ctx: SslContext,
    pub(crate) trust: Arc<dyn TrustEvaluator>,
    pub(crate) policy: Arc<HardenedPolicy>,
    pub(crate) servername: bool,
}

impl ConnectionFactory {
    /// Create a factory builder
    pub fn builder() -> ConnectionFactoryBuilder {
        ConnectionFactoryBuilder::new()
    }

    /// Create a factory with the process-wide policy
    pub fn new(
        identity: Option<Arc<dyn IdentityProvider>>,
        trust: Arc<dyn TrustEvaluator>,
    ) -> Result<Self, TlsError> {
        let builder = Self::builder().trust_arc(trust);
        match identity {
            Some(identity) => builder.identity_arc(identity).build(),
            None => builder.build(),
        }
    }

    /// Policy applied to every socket
    pub fn policy(&self) -> &HardenedPolicy {
        &self.policy
    }

    /// Cipher suites enabled on new sockets
    pub fn default_cipher_suites(&self) -> Vec<String> {
        match self.policy.cipher_suites() {
            Some(suites) => suites.to_vec(),
            None => match Ssl::new(&self.ctx) {
                Ok(ssl) => probe::cipher_suites(&ssl),
                Err(e) => {
                    warn!(error = %e, "cannot read default cipher suites");
                    Vec::new()
                }
            },
        }
    }

    /// Cipher suites that could be enabled
    pub fn supported_cipher_suites(&self) -> Vec<String> {
        match self.policy.cipher_suites() {
            Some(suites) => suites.to_vec(),
            None => probe::supported_cipher_suites().unwrap_or_else(|e| {
                warn!(error = %e, "cannot read supported cipher suites");
                Vec::new()
            }),
        }
    }

    /// Connect to `host:port`
    pub fn connect(&self, host: &str, port: u16) -> Result<TlsSocket, TlsError> {
        let stream = connect_any((host, port), |addr| TcpStream::connect(addr))?;
        self.handshake().connect(stream, host, port, None)
    }

    /// Connect to `host:port` from a specific local address and port
    ///
    /// A `local_port` of 0 lets the system pick.
    pub fn connect_from(
        &self,
        host: &str,
        port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Result<TlsSocket, TlsError> {
        let local = SocketAddr::new(local_addr, local_port);
        let stream = connect_any((host, port), |addr| {
            if addr.is_ipv4() != local.is_ipv4() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} cannot reach {}", local, addr),
                ));
            }
            bound_connect(local, addr)
        })?;
        self.handshake().connect(stream, host, port, None)
    }

    /// Connect to an already resolved address
    ///
    /// The address itself is used as the host, so no SNI is sent.
    pub fn connect_addr(&self, addr: SocketAddr) -> Result<TlsSocket, TlsError> {
        let stream = TcpStream::connect(addr).map_err(ConnectionError::Io)?;
        self.handshake()
            .connect(stream, &addr.ip().to_string(), addr.port(), None)
    }

    /// Start TLS over an already connected stream
    ///
    /// `host` and `port` name the peer for SNI and diagnostics. With
    /// `auto_close == false` the returned socket leaves the transport open
    /// on shutdown and hands it back from [`TlsSocket::into_transport`].
    pub fn upgrade(
        &self,
        stream: TcpStream,
        host: &str,
        port: u16,
        auto_close: bool,
    ) -> Result<TlsSocket, TlsError> {
        let transport = if auto_close {
            None
        } else {
            Some(stream.try_clone().map_err(ConnectionError::Io)?)
        };
        self.handshake().connect(stream, host, port, transport)
    }

    fn handshake(&self) -> Handshake<'_> {
        Handshake {
            ctx: &self.ctx,
            trust: &self.trust,
            policy: &self.policy,
            servername: self.servername,
        }
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("policy", &self.policy)
            .field("servername", &self.servername)
            .finish_non_exhaustive()
    }
}

/// Try every resolved address in turn, returning the first connection
fn connect_any<A, F>(target: A, mut connect: F) -> Result<TcpStream, ConnectionError>
where
    A: ToSocketAddrs,
    F: FnMut(SocketAddr) -> io::Result<TcpStream>,
{
    let mut last_error = None;
    for addr in target.to_socket_addrs()? {
        match connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(ConnectionError::Io(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

fn bound_connect(local: SocketAddr, remote: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
    socket.bind(&SockAddr::from(local))?;
    socket.connect(&SockAddr::from(remote))?;
    Ok(socket.into())
}
