//! TLS client configuration.

use std::sync::Arc;

use rustls::ClientConfig;

use crate::error::TlsError;
use crate::trust::TrustStore;

/// Build a client config that verifies the server against `trust` and
/// presents no client certificate.
pub fn build_client_config(trust: TrustStore) -> Result<Arc<ClientConfig>, TlsError> {
    let config = ClientConfig::builder_with_provider(crate::crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_root_certificates(trust.into_root_store())
        .with_no_client_auth();

    Ok(Arc::new(config))
}
