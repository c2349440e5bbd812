//! Transport configuration.
//!
//! Both the daemon and the client read the same [`TransportConfig`]. Values
//! come from defaults, an optional TOML file, the environment and finally
//! command-line flags; this module covers the first two layers and the
//! binaries apply the rest.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::error::ConfigError;

pub const DEFAULT_DISCOVERY_NAME: &str = "PasswordManagerService";
pub const DEFAULT_REGISTRY_ADDRESS: &str = "127.0.0.1:1099";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:0";
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_CERT_PATH: &str = "server-keystore.pem";
pub const DEFAULT_CLIENT_TRUST_FILE: &str = "client-truststore.pem";

/// A passphrase held in zeroizing memory.
///
/// `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl FromStr for Passphrase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl<'de> Deserialize<'de> for Passphrase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Everything needed to bind or reach the service endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Server key store: certificate chain plus private key.
    #[serde(default = "default_server_cert_path")]
    pub server_cert_path: PathBuf,

    #[serde(default)]
    pub server_cert_passphrase: Option<Passphrase>,

    /// Client trust store: PEM bundle of trust anchors.
    #[serde(default = "default_client_trust_path")]
    pub client_trust_path: PathBuf,

    #[serde(default)]
    pub client_trust_passphrase: Option<Passphrase>,

    /// Address the TLS endpoint listens on. Port 0 picks a free port.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Host advertised in the registry. Defaults to the bound IP.
    #[serde(default)]
    pub advertise_host: Option<String>,

    #[serde(default = "default_discovery_name")]
    pub discovery_name: String,

    #[serde(default = "default_registry_address")]
    pub registry_address: String,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_server_cert_path() -> PathBuf {
    PathBuf::from(DEFAULT_SERVER_CERT_PATH)
}

/// Per-user config directory when one exists, else the working directory.
pub fn default_client_trust_path() -> PathBuf {
    directories::ProjectDirs::from("com", "passvault", "passvault")
        .map(|dirs| dirs.config_dir().join(DEFAULT_CLIENT_TRUST_FILE))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_TRUST_FILE))
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_discovery_name() -> String {
    DEFAULT_DISCOVERY_NAME.to_string()
}

fn default_registry_address() -> String {
    DEFAULT_REGISTRY_ADDRESS.to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_cert_path: default_server_cert_path(),
            server_cert_passphrase: None,
            client_trust_path: default_client_trust_path(),
            client_trust_passphrase: None,
            bind_address: default_bind_address(),
            advertise_host: None,
            discovery_name: default_discovery_name(),
            registry_address: default_registry_address(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the transport unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a TOML config file. Unset keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = TransportConfig::from_toml_str("").unwrap();

        assert_eq!(config.discovery_name, "PasswordManagerService");
        assert_eq!(config.registry_address, "127.0.0.1:1099");
        assert_eq!(config.bind_address, "127.0.0.1:0");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.server_cert_path, PathBuf::from("server-keystore.pem"));
        assert!(config.server_cert_passphrase.is_none());
        assert!(config.client_trust_passphrase.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let text = r#"
            server_cert_path = "/etc/passvault/server.pem"
            server_cert_passphrase = "changeit"
            discovery_name = "Vault"
            registry_address = "10.0.0.5:2099"
            handshake_timeout_secs = 3
        "#;
        let config = TransportConfig::from_toml_str(text).unwrap();

        assert_eq!(config.server_cert_path, PathBuf::from("/etc/passvault/server.pem"));
        assert_eq!(
            config.server_cert_passphrase.as_ref().map(Passphrase::expose),
            Some("changeit")
        );
        assert_eq!(config.discovery_name, "Vault");
        assert_eq!(config.registry_address, "10.0.0.5:2099");
        assert_eq!(config.handshake_timeout_secs, 3);
        assert_eq!(config.bind_address, "127.0.0.1:0");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = TransportConfig::from_toml_str("registry_port = 1099");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn debug_redacts_passphrases() {
        let config = TransportConfig {
            server_cert_passphrase: Some(Passphrase::new("changeit")),
            client_trust_passphrase: Some(Passphrase::new("trustme")),
            ..TransportConfig::default()
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("changeit"));
        assert!(!rendered.contains("trustme"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = TransportConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn zero_handshake_timeout_is_rejected() {
        let result = TransportConfig::from_toml_str("handshake_timeout_secs = 0");
        match result {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("handshake_timeout_secs")),
            other => panic!("expected Invalid, got {other:?}"),
        }

        let layered = TransportConfig {
            handshake_timeout_secs: 0,
            ..TransportConfig::default()
        };
        assert!(layered.validate().is_err());
        assert!(TransportConfig::default().validate().is_ok());
    }
}
