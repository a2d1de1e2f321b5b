//! Bearer credential parsing and validation.
//!
//! Tokens are RS256 JWTs signed by an external issuer. Every check below is a
//! hard gate, evaluated in order; the first failing gate decides the reason.

use std::sync::Arc;

use base64::DecodeError;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use certgate_core::{ErrorCode, ExternalUserId, GatewayError, IdpSource, TokenId};

use crate::Role;
use crate::revocation::{RevocationRegistry, RevocationStoreError};

/// Claims carried by a bearer token.
///
/// Everything the validator checks itself is optional here so that a missing
/// claim surfaces as an `Invalid` reject rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    pub nbf: i64,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(rename = "userExtId", default, skip_serializing_if = "Option::is_none")]
    pub user_ext_id: Option<String>,

    #[serde(rename = "idpsource", default, skip_serializing_if = "Option::is_none")]
    pub idp_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Claim-namespace role names. Legacy tokens do not carry this claim.
    #[serde(rename = "userroles", default, skip_serializing_if = "Option::is_none")]
    pub user_roles: Option<Vec<String>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("bearer token missing")]
    Missing,

    #[error("bearer token has a bad length: {0}")]
    BadLength(String),

    #[error("bearer token invalid: {0}")]
    Invalid(String),

    #[error(transparent)]
    Revocations(#[from] RevocationStoreError),
}

impl CredentialError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CredentialError::Missing => ErrorCode::MissingBearer,
            CredentialError::BadLength(_) => ErrorCode::InvalidBearerLength,
            CredentialError::Invalid(_) => ErrorCode::InvalidBearer,
            CredentialError::Revocations(_) => ErrorCode::RevocationDataUnavailable,
        }
    }
}

impl From<CredentialError> for GatewayError {
    fn from(err: CredentialError) -> Self {
        GatewayError::new(err.code(), err.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationKeyError {
    #[error("verification key is not valid base64: {0}")]
    Encoding(String),

    #[error("verification key is not an RSA SubjectPublicKeyInfo: {0}")]
    Key(String),
}

/// Accepted values and encoding expectations for bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub accepted_scope: String,
    pub accepted_type: String,
    /// Every token must start with this encoded-header prefix.
    pub header_prefix: String,
    /// Clock skew tolerated on `exp`/`nbf`, in seconds.
    pub leeway_secs: u64,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            accepted_scope: "certificate-creation".to_string(),
            accepted_type: "authorization".to_string(),
            header_prefix: "eyJ".to_string(),
            leeway_secs: 0,
        }
    }
}

/// A bearer token that passed every gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCredential {
    pub token_id: TokenId,
    pub external_user_id: ExternalUserId,
    pub idp_source: IdpSource,
    /// `None` for legacy tokens without a role claim.
    pub roles: Option<Vec<Role>>,
    pub expires_at: DateTime<Utc>,
}

/// Check required claims and the accepted scope/type.
///
/// Signature and time window are verified before this runs.
pub fn validate_claims(
    claims: &CredentialClaims,
    policy: &CredentialPolicy,
) -> Result<ValidatedCredential, CredentialError> {
    let token_id = required(&claims.jti, "jti")?;
    let scope = required(&claims.scope, "scope")?;
    let user_ext_id = required(&claims.user_ext_id, "userExtId")?;
    let idp_source = required(&claims.idp_source, "idpsource")?;
    let typ = required(&claims.typ, "typ")?;

    if scope != policy.accepted_scope {
        return Err(CredentialError::Invalid(format!("unexpected scope '{scope}'")));
    }
    if typ != policy.accepted_type {
        return Err(CredentialError::Invalid(format!("unexpected token type '{typ}'")));
    }

    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| CredentialError::Invalid("exp out of range".to_string()))?;

    Ok(ValidatedCredential {
        token_id: TokenId::new(token_id),
        external_user_id: ExternalUserId::new(user_ext_id),
        idp_source: IdpSource::new(idp_source),
        roles: claims
            .user_roles
            .as_ref()
            .map(|roles| roles.iter().map(|r| Role::new(r.clone())).collect()),
        expires_at,
    })
}

fn required<'a>(value: &'a Option<String>, claim: &str) -> Result<&'a str, CredentialError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CredentialError::Invalid(format!("claim '{claim}' missing or blank"))),
    }
}

/// Validates bearer tokens against one fixed RSA public key.
pub struct CredentialValidator {
    decoding_key: DecodingKey,
    signature_len: usize,
    policy: CredentialPolicy,
    revocations: Arc<RevocationRegistry>,
}

impl CredentialValidator {
    /// `public_key` is a base64 DER SubjectPublicKeyInfo.
    pub fn new(
        public_key: &str,
        policy: CredentialPolicy,
        revocations: Arc<RevocationRegistry>,
    ) -> Result<Self, VerificationKeyError> {
        let der = STANDARD
            .decode(public_key.trim())
            .map_err(|e| VerificationKeyError::Encoding(e.to_string()))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| VerificationKeyError::Key(e.to_string()))?;

        let decoding_key =
            DecodingKey::from_rsa_raw_components(&key.n().to_bytes_be(), &key.e().to_bytes_be());

        Ok(Self {
            decoding_key,
            signature_len: key.size(),
            policy,
            revocations,
        })
    }

    /// Validate `token` and return the caller's external user id.
    pub async fn validate(&self, token: &str) -> Result<ExternalUserId, CredentialError> {
        Ok(self.validate_credential(token).await?.external_user_id)
    }

    /// Validate `token`, including the revocation lookup.
    #[instrument(skip_all)]
    pub async fn validate_credential(&self, token: &str) -> Result<ValidatedCredential, CredentialError> {
        let credential = self.verify_token(token)?;

        if self.revocations.is_revoked(&credential.token_id).await? {
            warn!(
                token_id = %credential.token_id,
                user = %credential.external_user_id,
                idp_source = %credential.idp_source,
                "revoked bearer token presented"
            );
            return Err(CredentialError::Invalid(format!(
                "token '{}' is revoked",
                credential.token_id
            )));
        }

        debug!(user = %credential.external_user_id, "bearer token accepted");
        Ok(credential)
    }

    /// Every gate except the revocation lookup.
    pub fn verify_token(&self, token: &str) -> Result<ValidatedCredential, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        if !token.starts_with(&self.policy.header_prefix) {
            return Err(CredentialError::BadLength("unexpected header encoding".to_string()));
        }

        let segments: Vec<&str> = token.split('.').collect();
        let [_, _, signature] = segments.as_slice() else {
            return Err(CredentialError::Invalid(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };
        self.check_signature_length(signature)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        validation.leeway = self.policy.leeway_secs;
        validation.set_required_spec_claims(&["exp", "nbf"]);

        let data = jsonwebtoken::decode::<CredentialClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => CredentialError::Invalid("token expired".to_string()),
                JwtErrorKind::ImmatureSignature => {
                    CredentialError::Invalid("token not yet valid".to_string())
                }
                JwtErrorKind::InvalidSignature => {
                    CredentialError::Invalid("signature mismatch".to_string())
                }
                _ => CredentialError::Invalid(e.to_string()),
            })?;

        validate_claims(&data.claims, &self.policy)
    }

    fn check_signature_length(&self, segment: &str) -> Result<(), CredentialError> {
        match URL_SAFE_NO_PAD.decode(segment) {
            Ok(bytes) if bytes.len() == self.signature_len => Ok(()),
            Ok(bytes) => Err(CredentialError::BadLength(format!(
                "signature is {} bytes, expected {}",
                bytes.len(),
                self.signature_len
            ))),
            Err(DecodeError::InvalidLength(_) | DecodeError::InvalidLastSymbol(..)) => Err(
                CredentialError::BadLength("signature segment has a truncated encoding".to_string()),
            ),
            Err(e) => Err(CredentialError::Invalid(format!("signature segment: {e}"))),
        }
    }
}
