//! Client trust store.

use std::fs;
use std::path::Path;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::cert::verify_certificate_validity;
use crate::config::Passphrase;
use crate::error::TlsError;

/// Trust anchors a client accepts the server certificate against.
#[derive(Debug, Clone)]
pub struct TrustStore {
    roots: RootCertStore,
}

impl TrustStore {
    /// Load a PEM bundle of trust anchors.
    ///
    /// Certificates are public, so the bundle carries no encryption; a
    /// configured passphrase is accepted and otherwise unused.
    pub fn load(path: &Path, passphrase: Option<&Passphrase>) -> Result<Self, TlsError> {
        if passphrase.is_some() {
            tracing::debug!(path = %path.display(), "Trust store passphrase set; PEM bundles are not encrypted");
        }

        let pem = fs::read(path).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem, path)
    }

    /// Parse a PEM bundle. Anchors outside their validity period are skipped.
    pub fn from_pem(pem: &[u8], origin: &Path) -> Result<Self, TlsError> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut roots = RootCertStore::empty();
        let mut skipped_count = 0;
        for cert in certs {
            match verify_certificate_validity(&cert) {
                Ok(()) => roots
                    .add(cert)
                    .map_err(|e| TlsError::InvalidCert(e.to_string()))?,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid trust anchor");
                    skipped_count += 1;
                }
            }
        }
        if skipped_count > 0 {
            tracing::info!(
                skipped = skipped_count,
                valid = roots.len(),
                "Trust anchor validity check completed"
            );
        }

        if roots.is_empty() {
            return Err(TlsError::NoTrustAnchors(origin.to_path_buf()));
        }

        Ok(Self { roots })
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn into_root_store(self) -> RootCertStore {
        self.roots
    }
}
