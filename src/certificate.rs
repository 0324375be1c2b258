//! Certificate generation and fingerprint helpers.
//!
//! This module provides helpers to generate self-signed certificates suitable for
//! development and tests, compute fingerprints, and format them for display.
//! The output feeds straight into a [`SecurityContext`](crate::SecurityContext).

use std::fmt;

use openssl::x509::X509;
use rcgen::{Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// Invalid certificate format
    #[error("Invalid certificate format")]
    InvalidFormat,
    /// Certificate generation failed
    #[error("Certificate generation failed")]
    GenerationFailed,
}

/// Certificate and private key pair, in both DER and PEM.
#[derive(Clone)]
pub struct CertifiedKey {
    /// Certificate in DER format
    pub certificate_der: Vec<u8>,
    /// Private key in PKCS#8 DER format
    pub private_key_der: Vec<u8>,
    /// Certificate in PEM format
    pub certificate_pem: Vec<u8>,
    /// Private key in PKCS#8 PEM format
    pub private_key_pem: Vec<u8>,
}

/// Generate a self-signed ECDSA P-256 certificate for the given DNS names.
///
/// The first name also becomes the common name.
pub fn generate_self_signed_certificate(names: &[&str]) -> Result<CertifiedKey, CertificateError> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let common_name = names.first().cloned().unwrap_or_else(|| "tlspipe".to_string());

    let mut params = CertificateParams::new(names);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "tlspipe".to_string());
    distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name = distinguished_name;

    let cert =
        RcgenCertificate::from_params(params).map_err(|_| CertificateError::GenerationFailed)?;

    // Serialize once: every serialization signs again, and ECDSA signatures
    // differ between runs.
    let certificate_der = cert
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;
    let certificate_pem = X509::from_der(&certificate_der)
        .and_then(|x509| x509.to_pem())
        .map_err(|_| CertificateError::InvalidFormat)?;

    Ok(CertifiedKey {
        certificate_der,
        private_key_der: cert.serialize_private_key_der(),
        certificate_pem,
        private_key_pem: cert.serialize_private_key_pem().into_bytes(),
    })
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl CertifiedKey {
    /// Returns the SHA-256 fingerprint of the DER certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate_der)
    }

    /// Returns the fingerprint formatted as "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("certificate", &self.certificate_der.len())
            .field("private_key", &self.private_key_der.len())
            .finish()
    }
}
