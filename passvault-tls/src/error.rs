//! Error types for TLS material and configuration.

use std::io;
use std::path::PathBuf;

/// Errors raised while loading or producing TLS material.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("invalid PEM in {path}: {reason}")]
    Pem { path: PathBuf, reason: String },
    #[error("private key in {0} is encrypted but no passphrase is configured")]
    PassphraseRequired(PathBuf),
    #[error("private key in {0} is not encrypted but a passphrase is configured")]
    UnencryptedKey(PathBuf),
    #[error("failed to decrypt private key in {0}: wrong passphrase or corrupt key")]
    Decrypt(PathBuf),
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("certificate not yet valid (not_before: {not_before}, now: {now})")]
    CertNotYetValid { not_before: i64, now: i64 },
    #[error("certificate expired (not_after: {not_after}, now: {now})")]
    CertExpired { not_after: i64, now: i64 },
    #[error("no usable trust anchors in {0}")]
    NoTrustAnchors(PathBuf),
    #[error("failed to build TLS config: {0}")]
    Config(String),
    #[error("failed to generate key material: {0}")]
    Generation(String),
}

/// Errors raised while reading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
