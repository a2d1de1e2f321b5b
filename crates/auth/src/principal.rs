use serde::{Deserialize, Serialize};

use certgate_core::{ExternalUserId, IdpSource};

use crate::roles::{Role, RoleNamespace, RoleSet};

/// Common name of the client certificate presented at the TLS terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateIdentity(String);

impl CertificateIdentity {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self(common_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CertificateIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user a trusted caller acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityReference {
    pub ext_id: ExternalUserId,
    pub idp_source: IdpSource,
}

/// Where a caller's role list came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleOrigin {
    /// Resolved from the identity directory (trusted caller path).
    Directory,
    /// Carried by the bearer token (possibly absent on legacy tokens).
    Credential,
}

impl RoleOrigin {
    pub fn namespace(self) -> RoleNamespace {
        match self {
            RoleOrigin::Directory => RoleNamespace::Directory,
            RoleOrigin::Credential => RoleNamespace::Claim,
        }
    }
}

/// Authenticated caller of one request.
///
/// Built once at the pipeline boundary and passed explicitly to every
/// downstream check; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    pub external_user_id: ExternalUserId,
    pub idp_source: IdpSource,
    pub roles: Vec<Role>,
    pub role_origin: RoleOrigin,
}

impl CallerContext {
    pub fn role_set(&self) -> RoleSet {
        RoleSet::new(self.role_origin.namespace(), self.roles.clone())
    }
}
