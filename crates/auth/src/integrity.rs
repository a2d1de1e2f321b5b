//! Detached-signature body integrity.
//!
//! Callers send a self-signed certificate and a signature over the request
//! body. The certificate is only a carrier for the public key: it is not
//! checked against any CA. A successful check proves the body was not altered
//! and that the sender holds the matching private key; it says nothing about
//! who the sender is.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use sha2::Sha256;
use thiserror::Error;
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

use certgate_core::{ErrorCode, GatewayError};

/// Header carrying the base64 DER certificate.
pub const CLIENT_CERT_HEADER: &str = "X-Client-Cert";

/// Header carrying the base64 signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("missing integrity header '{0}'")]
    MissingHeader(&'static str),

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature does not match the request body")]
    SignatureMismatch,
}

impl IntegrityError {
    pub fn code(&self) -> ErrorCode {
        match self {
            IntegrityError::SignatureMismatch => ErrorCode::InvalidSignature,
            _ => ErrorCode::SignatureParse,
        }
    }
}

impl From<IntegrityError> for GatewayError {
    fn from(err: IntegrityError) -> Self {
        GatewayError::new(err.code(), err.to_string())
    }
}

/// Strip every newline, carriage return, tab and space byte.
///
/// Signers and verifiers both sign the canonical form, so pretty-printing
/// the JSON body in transit does not break the signature.
pub fn canonicalize(body: &[u8]) -> Vec<u8> {
    body.iter()
        .copied()
        .filter(|b| !matches!(b, b'\n' | b'\r' | b'\t' | b' '))
        .collect()
}

/// Extract the RSA public key from a base64 DER X.509 certificate.
pub fn public_key_from_certificate(encoded: &str) -> Result<RsaPublicKey, IntegrityError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| IntegrityError::MalformedCertificate(format!("base64: {e}")))?;

    let certificate = Certificate::from_der(&der)
        .map_err(|e| IntegrityError::MalformedCertificate(format!("der: {e}")))?;

    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| IntegrityError::MalformedCertificate(format!("public key info: {e}")))?;

    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| IntegrityError::MalformedCertificate(format!("not an RSA key: {e}")))
}

/// Verify `body` against the detached signature headers.
///
/// Header values are passed as found on the request; `None` or blank values
/// are treated as missing.
pub fn verify_detached(
    body: &[u8],
    certificate: Option<&str>,
    signature: Option<&str>,
) -> Result<(), IntegrityError> {
    let certificate = present(certificate).ok_or(IntegrityError::MissingHeader(CLIENT_CERT_HEADER))?;
    let signature = present(signature).ok_or(IntegrityError::MissingHeader(SIGNATURE_HEADER))?;

    let public_key = public_key_from_certificate(certificate)?;

    let signature_bytes = STANDARD
        .decode(signature.trim())
        .map_err(|e| IntegrityError::MalformedSignature(format!("base64: {e}")))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| IntegrityError::MalformedSignature(e.to_string()))?;

    VerifyingKey::<Sha256>::new(public_key)
        .verify(&canonicalize(body), &signature)
        .map_err(|_| IntegrityError::SignatureMismatch)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
