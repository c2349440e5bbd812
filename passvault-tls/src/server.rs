//! TLS server configuration.

use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::TlsError;
use crate::keystore::KeyStore;

/// Build a server-auth-only config: the server presents its chain, clients
/// present no certificate.
pub fn build_server_config(key_store: KeyStore) -> Result<Arc<ServerConfig>, TlsError> {
    let (chain, key) = key_store.into_parts();

    let config = ServerConfig::builder_with_provider(crate::crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(Arc::new(config))
}
