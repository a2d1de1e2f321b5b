//! Identity directory lookups for trusted callers.
//!
//! A trusted caller names the user it acts for by external id and identity
//! provider source. The directory is the authority on which roles that user
//! holds; only profiles that are both the user's default and active count.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use certgate_core::{ErrorCode, ExternalUserId, GatewayError, IdpSource};

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileState {
    Active,
    Inactive,
    Locked,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryProfile {
    pub state: ProfileState,
    #[serde(default)]
    pub default_profile: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl DirectoryProfile {
    pub fn is_active_default(&self) -> bool {
        self.default_profile && self.state == ProfileState::Active
    }
}

/// A user record as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub ext_id: String,
    /// Federated login subjects linked to this user.
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub profiles: Vec<DirectoryProfile>,
}

/// Query sent to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum DirectoryQuery {
    /// Exact match on the user's external id.
    ExternalId(String),
    /// Match on a linked federated login subject.
    FederatedSubject(String),
}

impl DirectoryQuery {
    pub fn matches(&self, user: &DirectoryUser) -> bool {
        match self {
            DirectoryQuery::ExternalId(id) => user.ext_id == *id,
            DirectoryQuery::FederatedSubject(subject) => user.subjects.iter().any(|s| s == subject),
        }
    }
}

/// How an (external id, idp source) pair becomes a [`DirectoryQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LookupMode {
    #[default]
    ExternalId,
    /// Federated subject is `prefix` followed by the external id.
    PrefixedSubject(String),
    /// Federated subject is the idp source value itself.
    SourceSubject,
}

impl LookupMode {
    pub fn query(&self, external_id: &ExternalUserId, idp_source: &IdpSource) -> DirectoryQuery {
        match self {
            LookupMode::ExternalId => DirectoryQuery::ExternalId(external_id.as_str().to_string()),
            LookupMode::PrefixedSubject(prefix) => {
                DirectoryQuery::FederatedSubject(format!("{prefix}{external_id}"))
            }
            LookupMode::SourceSubject => DirectoryQuery::FederatedSubject(idp_source.as_str().to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown lookup mode '{0}' (expected external-id, source-subject or prefixed-subject:<prefix>)")]
pub struct ParseLookupModeError(String);

impl FromStr for LookupMode {
    type Err = ParseLookupModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "external-id" => Ok(LookupMode::ExternalId),
            "source-subject" => Ok(LookupMode::SourceSubject),
            other => match other.strip_prefix("prefixed-subject:") {
                Some(prefix) if !prefix.is_empty() => Ok(LookupMode::PrefixedSubject(prefix.to_string())),
                _ => Err(ParseLookupModeError(other.to_string())),
            },
        }
    }
}

/// Default lookup mode plus per-idp-source overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupModes {
    default: LookupMode,
    overrides: HashMap<IdpSource, LookupMode>,
}

impl LookupModes {
    pub fn new(default: LookupMode) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, idp_source: IdpSource, mode: LookupMode) -> Self {
        self.overrides.insert(idp_source, mode);
        self
    }

    pub fn mode_for(&self, idp_source: &IdpSource) -> &LookupMode {
        self.overrides.get(idp_source).unwrap_or(&self.default)
    }

    pub fn query(&self, external_id: &ExternalUserId, idp_source: &IdpSource) -> DirectoryQuery {
        self.mode_for(idp_source).query(external_id, idp_source)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no directory user for {0}")]
    InvalidUser(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DirectoryError::InvalidUser(_) => ErrorCode::InvalidUser,
            DirectoryError::Unavailable(_) => ErrorCode::DirectoryUnavailable,
        }
    }
}

impl From<DirectoryError> for GatewayError {
    fn from(err: DirectoryError) -> Self {
        GatewayError::new(err.code(), err.to_string())
    }
}

/// Raw directory query transport.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Every user matching `query`. An empty list is a valid answer.
    async fn find_users(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryUser>, DirectoryError>;
}

/// Resolves a caller identity into directory-namespace role names.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(
        &self,
        external_id: &ExternalUserId,
        idp_source: &IdpSource,
    ) -> Result<Vec<Role>, DirectoryError>;
}

/// Distinct roles of every active default profile, in first-seen order.
pub fn active_default_roles(user: &DirectoryUser) -> Vec<Role> {
    let mut roles: Vec<Role> = Vec::new();
    for role in user
        .profiles
        .iter()
        .filter(|p| p.is_active_default())
        .flat_map(|p| p.roles.iter())
    {
        if !roles.contains(role) {
            roles.push(role.clone());
        }
    }
    roles
}

fn select_user(
    users: Vec<DirectoryUser>,
    query: &DirectoryQuery,
) -> Result<DirectoryUser, DirectoryError> {
    let count = users.len();
    let mut users = users.into_iter();
    let user = users
        .next()
        .ok_or_else(|| DirectoryError::InvalidUser(format!("{query:?}")))?;
    if count > 1 {
        warn!(?query, count, ext_id = %user.ext_id, "directory returned several users; using the first");
    }
    Ok(user)
}

/// [`IdentityResolver`] backed by a live [`DirectoryClient`].
pub struct DirectoryIdentityResolver {
    client: Arc<dyn DirectoryClient>,
    modes: LookupModes,
}

impl DirectoryIdentityResolver {
    pub fn new(client: Arc<dyn DirectoryClient>, modes: LookupModes) -> Self {
        Self { client, modes }
    }
}

#[async_trait]
impl IdentityResolver for DirectoryIdentityResolver {
    #[instrument(skip_all, fields(user = %external_id, idp_source = %idp_source))]
    async fn resolve(
        &self,
        external_id: &ExternalUserId,
        idp_source: &IdpSource,
    ) -> Result<Vec<Role>, DirectoryError> {
        let query = self.modes.query(external_id, idp_source);
        let users = self.client.find_users(&query).await.inspect_err(|e| {
            warn!(error = %e, ?query, "directory lookup failed");
        })?;

        let user = select_user(users, &query).inspect_err(|_| {
            info!(?query, "directory has no such user");
        })?;

        let roles = active_default_roles(&user);
        debug!(count = roles.len(), "resolved directory roles");
        Ok(roles)
    }
}

/// [`IdentityResolver`] over a fixed list of users.
///
/// Used for local runs and tests in place of the live directory.
#[derive(Debug, Clone, Default)]
pub struct FixtureIdentityResolver {
    users: Vec<DirectoryUser>,
    modes: LookupModes,
}

impl FixtureIdentityResolver {
    pub fn new(users: Vec<DirectoryUser>, modes: LookupModes) -> Self {
        Self { users, modes }
    }

    /// Parse a JSON array of directory users.
    pub fn from_json(json: &str, modes: LookupModes) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?, modes))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl DirectoryClient for FixtureIdentityResolver {
    async fn find_users(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryUser>, DirectoryError> {
        Ok(self.users.iter().filter(|u| query.matches(u)).cloned().collect())
    }
}

#[async_trait]
impl IdentityResolver for FixtureIdentityResolver {
    async fn resolve(
        &self,
        external_id: &ExternalUserId,
        idp_source: &IdpSource,
    ) -> Result<Vec<Role>, DirectoryError> {
        let query = self.modes.query(external_id, idp_source);
        let users = self.find_users(&query).await?;
        Ok(active_default_roles(&select_user(users, &query)?))
    }
}
