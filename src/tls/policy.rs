//! Hardened protocol and cipher suite policy
//!
//! A [`HardenedPolicy`] is computed once from what the platform reports and
//! then shared read-only by every factory. Each list is either set, in which
//! case every socket gets exactly that list enabled, or unset, in which case
//! sockets keep the platform defaults.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::ciphers::KNOWN_GOOD_CIPHER_SUITES;
use super::config::TlsError;
use super::probe::{CapabilityProbe, OpensslProbe};

/// Substring marking the legacy SSL protocol family
pub const LEGACY_PROTOCOL_MARKER: &str = "SSL";

/// What the platform TLS library reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Protocol versions the platform can speak, in reported order
    pub supported_protocols: Vec<String>,
    /// Cipher suites the platform enables when left alone
    pub default_cipher_suites: Vec<String>,
    /// Every cipher suite the platform can perform
    pub supported_cipher_suites: Vec<String>,
}

/// How the cipher suite list is assembled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipherSelection {
    /// `(enabled by default ∪ known good) ∩ supported`
    #[default]
    UnionWithDefaults,
    /// `known good ∩ supported`, dropping platform defaults that are not
    /// on the curated list
    Strict,
}

/// Socket security parameters a policy can override
///
/// Implemented by sockets that have not started their handshake yet.
pub trait TlsParameters {
    /// Replace the enabled protocol versions
    fn set_enabled_protocols(&mut self, protocols: &[String]) -> Result<(), TlsError>;

    /// Replace the enabled cipher suites
    fn set_enabled_cipher_suites(&mut self, suites: &[String]) -> Result<(), TlsError>;
}

/// Protocol and cipher suite allow-lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardenedPolicy {
    protocols: Option<Vec<String>>,
    cipher_suites: Option<Vec<String>>,
}

static GLOBAL: OnceCell<Arc<HardenedPolicy>> = OnceCell::new();

impl HardenedPolicy {
    /// Policy that leaves every socket on platform defaults
    pub fn unset() -> Self {
        HardenedPolicy::default()
    }

    /// The process-wide policy, computed on first use with [`OpensslProbe`]
    pub fn global() -> Arc<HardenedPolicy> {
        GLOBAL
            .get_or_init(|| Arc::new(HardenedPolicy::compute(&OpensslProbe::new())))
            .clone()
    }

    /// Compute the policy from a probe using the default cipher selection
    pub fn compute<P: CapabilityProbe + ?Sized>(probe: &P) -> Self {
        Self::compute_with(probe, CipherSelection::default())
    }

    /// Compute the policy from a probe
    ///
    /// Skips probing entirely when the platform already ships safe defaults.
    /// A failing probe degrades to [`HardenedPolicy::unset`].
    pub fn compute_with<P: CapabilityProbe + ?Sized>(probe: &P, selection: CipherSelection) -> Self {
        if probe.has_safe_defaults() {
            debug!("platform ships safe TLS defaults, hardening disabled");
            return Self::unset();
        }

        match probe.probe() {
            Ok(capabilities) => Self::from_capabilities(&capabilities, selection),
            Err(e) => {
                warn!(error = %e, "TLS capability probe failed, using platform defaults");
                Self::unset()
            }
        }
    }

    /// Derive the policy from a capability report
    pub fn from_capabilities(capabilities: &Capabilities, selection: CipherSelection) -> Self {
        let protocols = filter_protocols(&capabilities.supported_protocols);
        let cipher_suites = select_cipher_suites(capabilities, selection);

        debug!(?protocols, "hardened TLS protocols");
        debug!(?cipher_suites, "hardened TLS cipher suites");

        HardenedPolicy {
            protocols: non_empty(protocols, "protocol"),
            cipher_suites: non_empty(cipher_suites, "cipher suite"),
        }
    }

    /// Allowed protocols, `None` when left to the platform
    pub fn protocols(&self) -> Option<&[String]> {
        self.protocols.as_deref()
    }

    /// Allowed cipher suites, `None` when left to the platform
    pub fn cipher_suites(&self) -> Option<&[String]> {
        self.cipher_suites.as_deref()
    }

    /// Whether this policy overrides anything
    pub fn is_active(&self) -> bool {
        self.protocols.is_some() || self.cipher_suites.is_some()
    }

    /// Override the socket's parameters with every list that is set
    pub fn apply<S: TlsParameters + ?Sized>(&self, socket: &mut S) -> Result<(), TlsError> {
        if let Some(protocols) = &self.protocols {
            socket.set_enabled_protocols(protocols)?;
        }
        if let Some(suites) = &self.cipher_suites {
            socket.set_enabled_cipher_suites(suites)?;
        }
        Ok(())
    }
}

fn filter_protocols(supported: &[String]) -> Vec<String> {
    supported
        .iter()
        .filter(|name| !name.to_uppercase().contains(LEGACY_PROTOCOL_MARKER))
        .cloned()
        .collect()
}

fn select_cipher_suites(capabilities: &Capabilities, selection: CipherSelection) -> Vec<String> {
    let supported: HashSet<&str> = capabilities
        .supported_cipher_suites
        .iter()
        .map(String::as_str)
        .collect();

    let defaults: &[String] = match selection {
        CipherSelection::UnionWithDefaults => capabilities.default_cipher_suites.as_slice(),
        CipherSelection::Strict => &[],
    };

    let mut seen = HashSet::new();
    defaults
        .iter()
        .map(String::as_str)
        .chain(KNOWN_GOOD_CIPHER_SUITES.iter().copied())
        .filter(|suite| supported.contains(suite) && seen.insert(*suite))
        .map(str::to_string)
        .collect()
}

// An empty allow-list means "leave the platform defaults alone"
fn non_empty(list: Vec<String>, what: &str) -> Option<Vec<String>> {
    if list.is_empty() {
        warn!("no acceptable TLS {} left after filtering, keeping platform defaults", what);
        None
    } else {
        Some(list)
    }
}
