//! TLS material and configuration for passvault.
//!
//! - [`config`] - The transport configuration object shared by both sides
//! - [`keystore`] - Server certificate chain + passphrase-protected key
//! - [`trust`] - Client trust anchors
//! - [`cert`] - Self-signed certificate generation and X.509 checks
//! - [`server`] / [`client`] - rustls configs built from the above
//!
//! Trust is one-way: the server proves its identity with a certificate,
//! clients present none.

pub mod cert;
pub mod client;
pub mod config;
pub mod error;
pub mod keystore;
pub mod server;
pub mod trust;

use std::sync::Arc;

pub use cert::{build_self_signed, fingerprint, CertParams, ServerIdentity};
pub use client::build_client_config;
pub use config::{Passphrase, TransportConfig};
pub use error::{ConfigError, TlsError};
pub use keystore::KeyStore;
pub use server::build_server_config;
pub use trust::TrustStore;

/// The crypto provider used for every config in this crate.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
