//! Transport faults seen by a client.

use std::io;
use std::time::Duration;

use passvault_tls::TlsError;

/// Why a call could not be carried out.
///
/// Never used for business outcomes: a refused operation is `Ok(false)`,
/// `Ok(None)` or an empty list.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("registry at {address} is unreachable: {source}")]
    RegistryUnreachable {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("no endpoint is bound under {0:?}")]
    NotBound(String),
    #[error("invalid endpoint address {0:?}")]
    InvalidEndpoint(String),
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("trust store: {0}")]
    TrustStore(#[from] TlsError),
}
