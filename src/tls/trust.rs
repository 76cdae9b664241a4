//! Peer trust evaluation
//!
//! The factory never decides trust on its own. OpenSSL's verify callback
//! collects the peer chain and hands it to a [`TrustEvaluator`]; the verdict
//! is cached per connection so the evaluator runs once per handshake.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509StoreContext, X509StoreContextRef, X509};
use tracing::trace;

use super::cert::{auth_type, CertInfo};
use super::config::TlsError;

/// Trust evaluation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrustError {
    #[error("peer presented no certificate")]
    EmptyChain,

    #[error("certificate {subject} is not trusted: {reason}")]
    Untrusted { subject: String, reason: String },

    #[error("trust evaluation failed: {0}")]
    Evaluation(String),
}

/// Decides whether a server's certificate chain is trusted
pub trait TrustEvaluator: Send + Sync {
    /// Accept or reject the peer
    ///
    /// `chain` starts with the peer's leaf certificate. `auth_type` names the
    /// leaf's key algorithm (`RSA`, `EC`, ...).
    fn check_server_trusted(&self, chain: &[X509], auth_type: &str) -> Result<(), TrustError>;
}

impl<T: TrustEvaluator + ?Sized> TrustEvaluator for Arc<T> {
    fn check_server_trusted(&self, chain: &[X509], auth_type: &str) -> Result<(), TrustError> {
        (**self).check_server_trusted(chain, auth_type)
    }
}

/// Evaluator backed by an OpenSSL certificate store
///
/// Only the chain is validated against the store. The leaf is not matched
/// against the host being connected to, so any certificate issued by a
/// trusted anchor is accepted for any host. Callers that need hostname
/// verification must wrap this evaluator in one that checks the leaf's
/// names.
pub struct RootStoreTrust {
    store: X509Store,
}

impl RootStoreTrust {
    /// Trust the system's default certificate locations
    pub fn system() -> Result<Self, TlsError> {
        let mut builder = X509StoreBuilder::new()?;
        builder.set_default_paths()?;
        Ok(RootStoreTrust {
            store: builder.build(),
        })
    }

    /// Trust nothing
    pub fn empty() -> Result<Self, TlsError> {
        Ok(RootStoreTrust {
            store: X509StoreBuilder::new()?.build(),
        })
    }

    /// Trust the given anchors
    pub fn from_certificates<I: IntoIterator<Item = X509>>(anchors: I) -> Result<Self, TlsError> {
        let mut builder = X509StoreBuilder::new()?;
        for anchor in anchors {
            builder.add_cert(anchor)?;
        }
        Ok(RootStoreTrust {
            store: builder.build(),
        })
    }

    /// Trust every certificate in a PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        let anchors = X509::stack_from_pem(pem)?;
        if anchors.is_empty() {
            return Err(TlsError::Configuration(
                "no trust anchor in PEM bundle".to_string(),
            ));
        }
        Self::from_certificates(anchors)
    }

    /// Trust every certificate in a PEM file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, TlsError> {
        let pem = fs::read(path.as_ref())?;
        Self::from_pem(&pem)
    }
}

impl TrustEvaluator for RootStoreTrust {
    fn check_server_trusted(&self, chain: &[X509], _auth_type: &str) -> Result<(), TrustError> {
        let (leaf, intermediates) = chain.split_first().ok_or(TrustError::EmptyChain)?;

        let evaluation = |e: openssl::error::ErrorStack| TrustError::Evaluation(e.to_string());
        let mut untrusted = Stack::new().map_err(evaluation)?;
        for cert in intermediates {
            untrusted.push(cert.clone()).map_err(evaluation)?;
        }

        let mut ctx = X509StoreContext::new().map_err(evaluation)?;
        let outcome = ctx
            .init(&self.store, leaf, &untrusted, |c| {
                Ok(c.verify_cert()?.then_some(()).ok_or_else(|| c.error()))
            })
            .map_err(evaluation)?;

        outcome.map_err(|error| TrustError::Untrusted {
            subject: CertInfo::from_x509(leaf).subject,
            reason: error.error_string().to_string(),
        })
    }
}

/// Per-connection verify callback delegating to `evaluator`
///
/// The first verdict is stored in `verdict`, which the handshake reads back
/// to report a rejection instead of a bare handshake failure.
pub(crate) fn verify_callback(
    evaluator: Arc<dyn TrustEvaluator>,
    verdict: Arc<OnceCell<Result<(), TrustError>>>,
) -> impl Fn(bool, &mut X509StoreContextRef) -> bool + Send + Sync + 'static {
    move |_preverified, store_ctx| {
        // Only the leaf's callback decides, once the whole chain is known
        if store_ctx.error_depth() != 0 {
            return true;
        }

        let decision = verdict.get_or_init(|| {
            let chain = peer_chain(store_ctx);
            let hint = chain.first().map(|leaf| auth_type(leaf)).unwrap_or("UNKNOWN");
            let decision = evaluator.check_server_trusted(&chain, hint);
            trace!(
                leaf = ?chain.first().map(|leaf| CertInfo::from_x509(leaf).subject),
                auth_type = hint,
                accepted = decision.is_ok(),
                "trust evaluated"
            );
            decision
        });

        decision.is_ok()
    }
}

fn peer_chain(store_ctx: &X509StoreContextRef) -> Vec<X509> {
    match store_ctx.chain() {
        Some(chain) if !chain.is_empty() => chain.iter().map(|cert| cert.to_owned()).collect(),
        _ => store_ctx
            .current_cert()
            .map(|cert| vec![cert.to_owned()])
            .unwrap_or_default(),
    }
}
