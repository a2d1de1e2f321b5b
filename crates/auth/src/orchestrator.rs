//! Per-request authentication and capability checks.
//!
//! The caller's certificate common name picks the trust path. Trusted callers
//! name the user they act for and that user's roles come from the identity
//! directory; everyone else must present a bearer token.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use certgate_core::{ErrorCode, GatewayError, GatewayResult};

use crate::authorize::DecisionEngine;
use crate::capability::CapabilityId;
use crate::claims::CredentialValidator;
use crate::directory::IdentityResolver;
use crate::principal::{CallerContext, CertificateIdentity, IdentityReference, RoleOrigin};

pub struct AuthorizationOrchestrator {
    trusted_callers: HashSet<CertificateIdentity>,
    resolver: Arc<dyn IdentityResolver>,
    credentials: Arc<CredentialValidator>,
    engine: Arc<DecisionEngine>,
}

impl AuthorizationOrchestrator {
    pub fn new(
        trusted_callers: impl IntoIterator<Item = CertificateIdentity>,
        resolver: Arc<dyn IdentityResolver>,
        credentials: Arc<CredentialValidator>,
        engine: Arc<DecisionEngine>,
    ) -> Self {
        Self {
            trusted_callers: trusted_callers.into_iter().collect(),
            resolver,
            credentials,
            engine,
        }
    }

    pub fn is_trusted(&self, caller: Option<&CertificateIdentity>) -> bool {
        caller.is_some_and(|cn| self.trusted_callers.contains(cn))
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    /// Establish who the caller is.
    ///
    /// `identity` is only honoured for trusted callers; `token` is only read
    /// on the bearer path.
    #[instrument(skip_all, fields(caller = caller.map(CertificateIdentity::as_str)))]
    pub async fn authenticate(
        &self,
        caller: Option<&CertificateIdentity>,
        identity: Option<&IdentityReference>,
        token: Option<&str>,
    ) -> GatewayResult<CallerContext> {
        if self.is_trusted(caller) {
            return self.authenticate_trusted(identity).await;
        }

        let credential = self
            .credentials
            .validate_credential(token.unwrap_or_default())
            .await
            .map_err(|err| {
                warn!(error = %err, code = err.code().code(), "bearer token rejected");
                GatewayError::from(err)
            })?;

        debug!(user = %credential.external_user_id, idp_source = %credential.idp_source, "bearer caller authenticated");
        Ok(CallerContext {
            external_user_id: credential.external_user_id,
            idp_source: credential.idp_source,
            roles: credential.roles.unwrap_or_default(),
            role_origin: RoleOrigin::Credential,
        })
    }

    async fn authenticate_trusted(
        &self,
        identity: Option<&IdentityReference>,
    ) -> GatewayResult<CallerContext> {
        let Some(identity) = identity.filter(|i| !i.ext_id.is_blank() && !i.idp_source.is_blank()) else {
            warn!("trusted caller sent no identity reference");
            return Err(GatewayError::new(
                ErrorCode::InvalidIdentityUser,
                "trusted caller without identity reference",
            ));
        };

        let roles = self
            .resolver
            .resolve(&identity.ext_id, &identity.idp_source)
            .await
            .map_err(|err| {
                warn!(
                    user = %identity.ext_id,
                    idp_source = %identity.idp_source,
                    error = %err,
                    "directory identity rejected"
                );
                GatewayError::from(err)
            })?;

        debug!(user = %identity.ext_id, roles = roles.len(), "trusted caller authenticated");
        Ok(CallerContext {
            external_user_id: identity.ext_id.clone(),
            idp_source: identity.idp_source.clone(),
            roles,
            role_origin: RoleOrigin::Directory,
        })
    }

    /// Whether `caller` holds `capability`.
    ///
    /// A directory user without any active-default role holds nothing; the
    /// empty-list grant only applies to credential roles.
    #[instrument(skip_all, fields(user = %caller.external_user_id, capability = %capability))]
    pub async fn is_granted(
        &self,
        caller: &CallerContext,
        capability: &CapabilityId,
    ) -> GatewayResult<bool> {
        if caller.role_origin == RoleOrigin::Directory && caller.roles.is_empty() {
            debug!("directory user has no roles");
            return Ok(false);
        }

        self.engine
            .is_granted(&caller.role_set(), capability)
            .await
            .map_err(|err| {
                warn!(error = %err, "capability check failed");
                GatewayError::from(err)
            })
    }

    /// Like [`Self::is_granted`], turning a denial into `Forbidden`.
    pub async fn require(
        &self,
        caller: &CallerContext,
        capability: &CapabilityId,
    ) -> GatewayResult<()> {
        if self.is_granted(caller, capability).await? {
            Ok(())
        } else {
            warn!(
                user = %caller.external_user_id,
                idp_source = %caller.idp_source,
                capability = %capability,
                "capability denied"
            );
            Err(GatewayError::forbidden(format!(
                "{} lacks capability '{capability}'",
                caller.external_user_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::InMemoryAuthorizationData;
    use crate::capability::CapabilityDefinition;
    use crate::claims::{CredentialClaims, CredentialPolicy};
    use crate::directory::{
        DirectoryProfile, DirectoryUser, FixtureIdentityResolver, LookupModes, ProfileState,
    };
    use crate::revocation::{InMemoryRevocationStore, RevocationRegistry};
    use crate::roles::{Role, RoleMappingRow};
    use certgate_core::{ExternalUserId, IdpSource};
    use chrono::{Duration, Utc};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    const SIGNING_KEY: &str = include_str!("../tests/fixtures/token_signing_key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/token_public_key.b64");

    fn directory_user(ext_id: &str, state: ProfileState, roles: &[&'static str]) -> DirectoryUser {
        DirectoryUser {
            ext_id: ext_id.to_string(),
            subjects: Vec::new(),
            profiles: vec![DirectoryProfile {
                state,
                default_profile: true,
                roles: roles.iter().map(|r| Role::new(*r)).collect(),
            }],
        }
    }

    fn orchestrator() -> AuthorizationOrchestrator {
        let resolver = FixtureIdentityResolver::new(
            vec![
                directory_user("doc-1", ProfileState::Active, &["E.Creator"]),
                directory_user("doc-2", ProfileState::Inactive, &["E.Creator"]),
            ],
            LookupModes::default(),
        );
        let revocations = Arc::new(RevocationRegistry::new(Arc::new(InMemoryRevocationStore::new())));
        let credentials =
            CredentialValidator::new(PUBLIC_KEY, CredentialPolicy::default(), revocations).unwrap();
        let data = InMemoryAuthorizationData::new(
            vec![CapabilityDefinition::new("revoke-certificate").with_one_of(["cert-creator"])],
            vec![RoleMappingRow {
                claim: "creator".to_string(),
                eiam: "E.Creator".to_string(),
                intern: "cert-creator".to_string(),
            }],
        );

        AuthorizationOrchestrator::new(
            [CertificateIdentity::new("trusted-portal")],
            Arc::new(resolver),
            Arc::new(credentials),
            Arc::new(DecisionEngine::new(Arc::new(data))),
        )
    }

    fn token(roles: Option<Vec<String>>) -> String {
        let now = Utc::now();
        let claims = CredentialClaims {
            jti: Some("jti-1".to_string()),
            iss: None,
            iat: Some(now.timestamp()),
            nbf: (now - Duration::minutes(1)).timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
            scope: Some("certificate-creation".to_string()),
            user_ext_id: Some("app-user".to_string()),
            idp_source: Some("covid-cert".to_string()),
            typ: Some("authorization".to_string()),
            user_roles: roles,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn reference(ext_id: &str) -> IdentityReference {
        IdentityReference {
            ext_id: ExternalUserId::new(ext_id),
            idp_source: IdpSource::new("hin"),
        }
    }

    fn trusted() -> CertificateIdentity {
        CertificateIdentity::new("trusted-portal")
    }

    fn revoke() -> CapabilityId {
        CapabilityId::new("revoke-certificate")
    }

    #[tokio::test]
    async fn trusted_caller_resolves_roles_from_directory() {
        let o = orchestrator();
        let ctx = o
            .authenticate(Some(&trusted()), Some(&reference("doc-1")), None)
            .await
            .unwrap();
        assert_eq!(ctx.external_user_id.as_str(), "doc-1");
        assert_eq!(ctx.role_origin, RoleOrigin::Directory);
        assert!(o.is_granted(&ctx, &revoke()).await.unwrap());
    }

    #[tokio::test]
    async fn trusted_caller_ignores_bearer_token() {
        let o = orchestrator();
        let ctx = o
            .authenticate(Some(&trusted()), Some(&reference("doc-1")), Some("garbage"))
            .await
            .unwrap();
        assert_eq!(ctx.role_origin, RoleOrigin::Directory);
    }

    #[tokio::test]
    async fn trusted_caller_without_reference_is_rejected() {
        let err = orchestrator()
            .authenticate(Some(&trusted()), None, Some(&token(None)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidIdentityUser);
    }

    #[tokio::test]
    async fn unknown_directory_user_is_rejected() {
        let err = orchestrator()
            .authenticate(Some(&trusted()), Some(&reference("nobody")), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUser);
    }

    #[tokio::test]
    async fn directory_user_without_roles_is_denied() {
        let o = orchestrator();
        let ctx = o
            .authenticate(Some(&trusted()), Some(&reference("doc-2")), None)
            .await
            .unwrap();
        assert!(ctx.roles.is_empty());
        assert!(!o.is_granted(&ctx, &revoke()).await.unwrap());
        assert_eq!(
            o.require(&ctx, &revoke()).await.unwrap_err().code(),
            ErrorCode::Forbidden
        );
    }

    #[tokio::test]
    async fn untrusted_caller_uses_bearer_token() {
        let o = orchestrator();
        let ctx = o
            .authenticate(
                Some(&CertificateIdentity::new("someone")),
                Some(&reference("doc-1")),
                Some(&token(Some(vec!["creator".to_string()]))),
            )
            .await
            .unwrap();
        assert_eq!(ctx.external_user_id.as_str(), "app-user");
        assert_eq!(ctx.role_origin, RoleOrigin::Credential);
        assert!(o.is_granted(&ctx, &revoke()).await.unwrap());
    }

    #[tokio::test]
    async fn legacy_token_without_roles_keeps_empty_list_grant() {
        let o = orchestrator();
        let ctx = o.authenticate(None, None, Some(&token(None))).await.unwrap();
        assert!(ctx.roles.is_empty());
        assert!(o.is_granted(&ctx, &revoke()).await.unwrap());
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let err = orchestrator().authenticate(None, None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingBearer);
    }
}
