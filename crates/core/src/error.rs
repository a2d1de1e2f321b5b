//! Caller-facing error model.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the gateway pipeline.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure class of a rejection.
///
/// The class decides the transport status; the [`ErrorCode`] is what callers
/// see and key their handling on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request body integrity (detached signature) could not be established.
    Integrity,
    /// Bearer credential missing, malformed, expired or revoked.
    Credential,
    /// Caller identity could not be resolved or is unknown.
    Identity,
    /// Identity resolved, but the requested capability is not granted.
    Authorization,
    /// Authorization data is misconfigured (e.g. cyclic definitions).
    Configuration,
    /// A collaborator (directory, management service, store) failed.
    Upstream,
    /// The request payload itself is malformed.
    Payload,
}

/// Stable, caller-facing error codes.
///
/// Numeric values are part of the public contract and must not be reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SignatureParse,
    InvalidSignature,
    MissingBearer,
    InvalidBearerLength,
    InvalidBearer,
    InvalidIdentityUser,
    InvalidUser,
    DirectoryUnavailable,
    Forbidden,
    AuthorizationConfig,
    AuthorizationDataUnavailable,
    RevocationDataUnavailable,
    BackendUnavailable,
    MalformedPayload,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::SignatureParse => 490,
            ErrorCode::InvalidSignature => 491,
            ErrorCode::MissingBearer => 492,
            ErrorCode::InvalidBearerLength => 493,
            ErrorCode::InvalidBearer => 494,
            ErrorCode::InvalidIdentityUser => 495,
            ErrorCode::InvalidUser => 496,
            ErrorCode::DirectoryUnavailable => 497,
            ErrorCode::Forbidden => 498,
            ErrorCode::AuthorizationConfig => 499,
            ErrorCode::AuthorizationDataUnavailable => 480,
            ErrorCode::RevocationDataUnavailable => 481,
            ErrorCode::BackendUnavailable => 482,
            ErrorCode::MalformedPayload => 460,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::SignatureParse => "Signature could not be parsed",
            ErrorCode::InvalidSignature => "Signature does not match the request body",
            ErrorCode::MissingBearer => "Bearer token is missing",
            ErrorCode::InvalidBearerLength => "Bearer token has an invalid length",
            ErrorCode::InvalidBearer => "Bearer token is invalid",
            ErrorCode::InvalidIdentityUser => "Trusted caller did not provide an identity",
            ErrorCode::InvalidUser => "User is not known to the identity directory",
            ErrorCode::DirectoryUnavailable => "Identity directory call failed",
            ErrorCode::Forbidden => "Caller is not allowed to perform this operation",
            ErrorCode::AuthorizationConfig => "Authorization configuration is invalid",
            ErrorCode::AuthorizationDataUnavailable => "Authorization data could not be loaded",
            ErrorCode::RevocationDataUnavailable => "Token revocation data could not be loaded",
            ErrorCode::BackendUnavailable => "Issuance backend call failed",
            ErrorCode::MalformedPayload => "Request payload is malformed",
        }
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::SignatureParse | ErrorCode::InvalidSignature => ErrorKind::Integrity,
            ErrorCode::MissingBearer | ErrorCode::InvalidBearerLength | ErrorCode::InvalidBearer => {
                ErrorKind::Credential
            }
            ErrorCode::InvalidIdentityUser | ErrorCode::InvalidUser => ErrorKind::Identity,
            ErrorCode::Forbidden => ErrorKind::Authorization,
            ErrorCode::AuthorizationConfig => ErrorKind::Configuration,
            ErrorCode::DirectoryUnavailable
            | ErrorCode::AuthorizationDataUnavailable
            | ErrorCode::RevocationDataUnavailable
            | ErrorCode::BackendUnavailable => ErrorKind::Upstream,
            ErrorCode::MalformedPayload => ErrorKind::Payload,
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// A rejection produced by the pipeline.
///
/// `detail` is diagnostic only: it goes to logs, never to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {detail}")]
pub struct GatewayError {
    code: ErrorCode,
    detail: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, detail)
    }

    pub fn malformed_payload(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedPayload, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 14] = [
        ErrorCode::SignatureParse,
        ErrorCode::InvalidSignature,
        ErrorCode::MissingBearer,
        ErrorCode::InvalidBearerLength,
        ErrorCode::InvalidBearer,
        ErrorCode::InvalidIdentityUser,
        ErrorCode::InvalidUser,
        ErrorCode::DirectoryUnavailable,
        ErrorCode::Forbidden,
        ErrorCode::AuthorizationConfig,
        ErrorCode::AuthorizationDataUnavailable,
        ErrorCode::RevocationDataUnavailable,
        ErrorCode::BackendUnavailable,
        ErrorCode::MalformedPayload,
    ];

    #[test]
    fn numeric_codes_are_unique() {
        let codes: HashSet<u16> = ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn integrity_failures_are_distinct() {
        assert_ne!(
            ErrorCode::SignatureParse.code(),
            ErrorCode::InvalidSignature.code()
        );
        assert_eq!(ErrorCode::SignatureParse.kind(), ErrorKind::Integrity);
        assert_eq!(ErrorCode::InvalidSignature.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn directory_failure_is_not_an_identity_failure() {
        assert_eq!(ErrorCode::InvalidUser.kind(), ErrorKind::Identity);
        assert_eq!(ErrorCode::DirectoryUnavailable.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn display_includes_numeric_code() {
        let err = GatewayError::new(ErrorCode::InvalidBearer, "jti 42 revoked");
        assert_eq!(err.code(), ErrorCode::InvalidBearer);
        assert_eq!(err.detail(), "jti 42 revoked");
        assert!(err.to_string().contains("494"));
    }
}
