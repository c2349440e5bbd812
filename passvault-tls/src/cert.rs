//! Self-signed server certificates and X.509 checks.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use crate::error::TlsError;

/// What `passvault-daemon keygen` puts into a new certificate.
#[derive(Debug, Clone)]
pub struct CertParams {
    pub common_name: String,
    pub validity_days: u32,
    /// DNS subject alternative names.
    pub san_dns: Vec<String>,
    /// IP subject alternative names.
    pub san_ips: Vec<IpAddr>,
}

impl Default for CertParams {
    fn default() -> Self {
        Self {
            common_name: "passvault-daemon".to_string(),
            validity_days: 365,
            san_dns: vec!["localhost".to_string()],
            san_ips: vec![Ipv4Addr::LOCALHOST.into(), Ipv6Addr::LOCALHOST.into()],
        }
    }
}

impl CertParams {
    /// Add an extra SAN, as an IP address when it parses as one.
    pub fn with_san(mut self, san: &str) -> Self {
        match san.parse::<IpAddr>() {
            Ok(ip) => self.san_ips.push(ip),
            Err(_) => self.san_dns.push(san.to_string()),
        }
        self
    }
}

/// A freshly generated server certificate and its private key.
pub struct ServerIdentity {
    pub cert_der: Vec<u8>,
    pub cert_pem: String,
    /// PKCS#8 DER, wiped on drop.
    pub key_der: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

fn generation_error(e: rcgen::Error) -> TlsError {
    TlsError::Generation(e.to_string())
}

/// Generate a new ECDSA P-256 key and a self-signed certificate for it.
pub fn build_self_signed(params: &CertParams) -> Result<ServerIdentity, TlsError> {
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, params.common_name.as_str());

    let mut sans = Vec::with_capacity(params.san_dns.len() + params.san_ips.len());
    for name in &params.san_dns {
        match Ia5String::try_from(name.as_str()) {
            Ok(dns) => sans.push(SanType::DnsName(dns)),
            Err(_) => tracing::warn!(san = %name, "Ignoring SAN that is not a DNS name"),
        }
    }
    sans.extend(params.san_ips.iter().copied().map(SanType::IpAddress));

    let issued = ::time::OffsetDateTime::now_utc();
    let mut cert_params = CertificateParams::default();
    cert_params.distinguished_name = subject;
    cert_params.subject_alt_names = sans;
    cert_params.not_before = issued;
    cert_params.not_after = issued + ::time::Duration::days(i64::from(params.validity_days));

    let key_pair = KeyPair::generate().map_err(generation_error)?;
    let cert = cert_params.self_signed(&key_pair).map_err(generation_error)?;

    Ok(ServerIdentity {
        cert_der: cert.der().to_vec(),
        cert_pem: cert.pem(),
        key_der: Zeroizing::new(key_pair.serialize_der()),
    })
}

fn parse_x509(cert_der: &[u8]) -> Result<X509Certificate<'_>, TlsError> {
    X509Certificate::from_der(cert_der)
        .map(|(_, cert)| cert)
        .map_err(|e| TlsError::InvalidCert(format!("failed to parse certificate: {e}")))
}

/// `SHA256:<hex>` digest of the certificate's subject public key info.
pub fn fingerprint(cert_der: &[u8]) -> Result<String, TlsError> {
    let cert = parse_x509(cert_der)?;
    let hex: String = Sha256::digest(cert.public_key().raw)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok(format!("SHA256:{hex}"))
}

/// Fail unless the current time is inside the certificate's validity window.
pub fn verify_certificate_validity(cert_der: &[u8]) -> Result<(), TlsError> {
    let cert = parse_x509(cert_der)?;
    let now = ASN1Time::now().timestamp();
    let window = cert.validity();

    let not_before = window.not_before.timestamp();
    if now < not_before {
        return Err(TlsError::CertNotYetValid { not_before, now });
    }
    let not_after = window.not_after.timestamp();
    if now > not_after {
        return Err(TlsError::CertExpired { not_after, now });
    }
    Ok(())
}
