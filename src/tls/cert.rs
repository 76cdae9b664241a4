//! Certificate summaries
//!
//! Extracts the parts of an X.509 certificate worth putting in a log line or
//! an error message.

use std::net::{Ipv4Addr, Ipv6Addr};

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::{X509NameRef, X509Ref};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// SHA-256 fingerprint of the DER encoding, lowercase hex
    pub sha256: String,
}

impl CertInfo {
    /// Summarise a certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
            sha256: fingerprint(cert),
        }
    }

    /// Whether subject and issuer are the same name
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Authentication type hint for a peer's leaf certificate
///
/// Names the key algorithm the peer authenticates with.
pub fn auth_type(cert: &X509Ref) -> &'static str {
    match cert.public_key().map(|key| key.id()) {
        Ok(Id::RSA) => "RSA",
        Ok(Id::EC) => "EC",
        Ok(Id::DSA) => "DSA",
        Ok(Id::ED25519) => "ED25519",
        Ok(Id::ED448) => "ED448",
        _ => "UNKNOWN",
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(sans) = cert.subject_alt_names() {
        for name in sans.iter() {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv4Addr::from(octets)));
                } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv6Addr::from(octets)));
                }
            }
        }
    }

    names
}

fn fingerprint(cert: &X509Ref) -> String {
    cert.digest(MessageDigest::sha256())
        .map(|digest| digest.iter().map(|b| format!("{:02x}", b)).collect())
        .unwrap_or_default()
}
