//! Cipher suite tables
//!
//! Cipher suites are identified by their IANA standard names everywhere in
//! this crate. OpenSSL uses its own spelling for TLS 1.2 and older suites, so
//! this module also maps between the two.

/// Cipher suites known to be acceptable, in preference order
///
/// Modern authenticated-encryption suites come first; the CBC suites at the
/// end are only there for interoperability with old servers.
pub const KNOWN_GOOD_CIPHER_SUITES: &[&str] = &[
    // TLS 1.3
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_AES_128_GCM_SHA256",
    // TLS 1.2, forward secret AEAD
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_DHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_DHE_RSA_WITH_AES_128_GCM_SHA256",
    // TLS 1.2, static RSA AEAD
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    // maximum interoperability
    "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_128_CBC_SHA",
];

/// Whether an IANA suite name belongs to TLS 1.3
///
/// TLS 1.3 suites do not name a key exchange, so they carry no `_WITH_`.
pub fn is_tls13_suite(name: &str) -> bool {
    name.starts_with("TLS_") && !name.contains("_WITH_")
}

/// Translate an IANA suite name into the OpenSSL cipher-string name
///
/// TLS 1.3 suites keep their IANA name. Returns `None` when the linked
/// OpenSSL does not know the suite.
pub fn openssl_name(name: &str) -> Option<&str> {
    if is_tls13_suite(name) {
        return Some(name);
    }
    match openssl::ssl::cipher_name(name) {
        "(NONE)" => None,
        mapped => Some(mapped),
    }
}
