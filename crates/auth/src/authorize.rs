use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument};

use certgate_core::{ErrorCode, GatewayError};

use crate::cache::{Invalidate, SnapshotCache};
use crate::capability::{CapabilityCatalog, CapabilityDefinition, CapabilityId, CatalogError, Evaluation};
use crate::roles::{Role, RoleMapping, RoleMappingRow, RoleSet};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagementError {
    #[error("management service request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("management service answered {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("management service response from {url} could not be decoded: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error(transparent)]
    Config(#[from] CatalogError),

    #[error(transparent)]
    Unavailable(#[from] ManagementError),
}

impl AuthorizationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthorizationError::Config(_) => ErrorCode::AuthorizationConfig,
            AuthorizationError::Unavailable(_) => ErrorCode::AuthorizationDataUnavailable,
        }
    }
}

impl From<AuthorizationError> for GatewayError {
    fn from(err: AuthorizationError) -> Self {
        GatewayError::new(err.code(), err.to_string())
    }
}

/// Source of capability definitions and the role-name mapping table.
#[async_trait]
pub trait AuthorizationDataSource: Send + Sync {
    async fn capability_definitions(&self) -> Result<Vec<CapabilityDefinition>, ManagementError>;

    async fn role_mappings(&self) -> Result<Vec<RoleMappingRow>, ManagementError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision explanation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// No roles at all were presented.
    EmptyRoleList,
    /// None of the presented roles has a mapping.
    NoMappedRoles,
    /// Capability is unknown or outside its validity window.
    NotActive,
    /// Some definition in the tree requires a role the caller lacks.
    MissingRole { at: CapabilityId },
    Granted,
}

/// Why a capability check came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub capability: CapabilityId,
    pub granted: bool,
    pub reason: DecisionReason,
    /// Internal role names the presented roles translated to.
    pub translated_roles: Vec<Role>,
}

impl Decision {
    fn new(capability: &CapabilityId, reason: DecisionReason, translated_roles: &BTreeSet<Role>) -> Self {
        Self {
            capability: capability.clone(),
            granted: matches!(reason, DecisionReason::Granted | DecisionReason::EmptyRoleList),
            reason,
            translated_roles: translated_roles.iter().cloned().collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision engine
// ─────────────────────────────────────────────────────────────────────────────

/// Decides whether a role set grants a capability.
///
/// Capability definitions and the role mapping are cached independently;
/// each cache is cleared by the refresh scheduler and reloaded on the next
/// decision.
pub struct DecisionEngine {
    source: Arc<dyn AuthorizationDataSource>,
    catalog: SnapshotCache<CapabilityCatalog>,
    mapping: SnapshotCache<RoleMapping>,
}

impl DecisionEngine {
    pub fn new(source: Arc<dyn AuthorizationDataSource>) -> Self {
        Self {
            source,
            catalog: SnapshotCache::new("capability-definitions"),
            mapping: SnapshotCache::new("role-mapping"),
        }
    }

    /// Handle to the capability definition cache, for scheduled clearing.
    pub fn catalog_cache(&self) -> Arc<dyn Invalidate> {
        Arc::new(self.catalog.clone())
    }

    /// Handle to the role mapping cache, for scheduled clearing.
    pub fn mapping_cache(&self) -> Arc<dyn Invalidate> {
        Arc::new(self.mapping.clone())
    }

    pub async fn is_granted(&self, roles: &RoleSet, capability: &CapabilityId) -> Result<bool, AuthorizationError> {
        self.is_granted_at(roles, capability, Utc::now()).await
    }

    pub async fn is_granted_at(
        &self,
        roles: &RoleSet,
        capability: &CapabilityId,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthorizationError> {
        Ok(self.explain_at(roles, capability, now).await?.granted)
    }

    pub async fn explain(&self, roles: &RoleSet, capability: &CapabilityId) -> Result<Decision, AuthorizationError> {
        self.explain_at(roles, capability, Utc::now()).await
    }

    /// Evaluate `capability` for `roles` at `now`.
    ///
    /// An empty role list is granted without consulting any data. Callers
    /// that must not extend this to their role source check emptiness first.
    #[instrument(skip_all, fields(capability = %capability, namespace = ?roles.namespace))]
    pub async fn explain_at(
        &self,
        roles: &RoleSet,
        capability: &CapabilityId,
        now: DateTime<Utc>,
    ) -> Result<Decision, AuthorizationError> {
        if roles.is_empty() {
            debug!("empty role list granted");
            return Ok(Decision::new(capability, DecisionReason::EmptyRoleList, &BTreeSet::new()));
        }

        let catalog = self.catalog().await?;
        let mapping = self.mapping().await?;

        let translated = mapping.translate(roles);
        if translated.is_empty() {
            debug!(presented = roles.roles.len(), "no presented role is mapped");
            return Ok(Decision::new(capability, DecisionReason::NoMappedRoles, &translated));
        }

        let reason = match catalog.evaluate(capability, &translated, now) {
            Ok(None) => DecisionReason::NotActive,
            Ok(Some(Evaluation::Granted)) => DecisionReason::Granted,
            Ok(Some(Evaluation::MissingRole { at })) => DecisionReason::MissingRole { at },
            Err(err) => {
                error!(error = %err, "capability definitions are inconsistent");
                return Err(err.into());
            }
        };

        let decision = Decision::new(capability, reason, &translated);
        debug!(granted = decision.granted, reason = ?decision.reason, "capability evaluated");
        Ok(decision)
    }

    /// Every known capability `roles` are granted at `now`.
    ///
    /// Applies the same gates as [`Self::explain_at`]: an empty role list
    /// holds every capability active at `now`, and roles that translate to
    /// nothing hold none.
    pub async fn granted_capabilities(
        &self,
        roles: &RoleSet,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<CapabilityId>, AuthorizationError> {
        let catalog = self.catalog().await?;
        if roles.is_empty() {
            return Ok(catalog.active(now));
        }

        let translated = self.mapping().await?.translate(roles);
        if translated.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(catalog.granted(&translated, now)?)
    }

    async fn catalog(&self) -> Result<Arc<CapabilityCatalog>, AuthorizationError> {
        let source = Arc::clone(&self.source);
        let catalog = self
            .catalog
            .get_or_load(|| async move {
                let definitions = source.capability_definitions().await?;
                debug!(count = definitions.len(), "loaded capability definitions");
                Ok::<_, ManagementError>(CapabilityCatalog::from_definitions(definitions))
            })
            .await?;
        Ok(catalog)
    }

    async fn mapping(&self) -> Result<Arc<RoleMapping>, AuthorizationError> {
        let source = Arc::clone(&self.source);
        let mapping = self
            .mapping
            .get_or_load(|| async move {
                let rows = source.role_mappings().await?;
                debug!(count = rows.len(), "loaded role mapping rows");
                Ok::<_, ManagementError>(RoleMapping::from_rows(rows))
            })
            .await?;
        Ok(mapping)
    }
}

impl Invalidate for DecisionEngine {
    fn invalidate(&self) {
        self.catalog.invalidate();
        self.mapping.invalidate();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory data source
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory authorization data.
///
/// Intended for tests/dev. Counts fetches so cache behaviour is observable.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationData {
    definitions: RwLock<Vec<CapabilityDefinition>>,
    mappings: RwLock<Vec<RoleMappingRow>>,
    definition_fetches: AtomicUsize,
    mapping_fetches: AtomicUsize,
}

impl InMemoryAuthorizationData {
    pub fn new(definitions: Vec<CapabilityDefinition>, mappings: Vec<RoleMappingRow>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
            mappings: RwLock::new(mappings),
            ..Self::default()
        }
    }

    pub fn replace_definitions(&self, definitions: Vec<CapabilityDefinition>) {
        if let Ok(mut guard) = self.definitions.write() {
            *guard = definitions;
        }
    }

    pub fn definition_fetches(&self) -> usize {
        self.definition_fetches.load(Ordering::SeqCst)
    }

    pub fn mapping_fetches(&self) -> usize {
        self.mapping_fetches.load(Ordering::SeqCst)
    }
}

fn poisoned() -> ManagementError {
    ManagementError::Transport {
        url: "memory".to_string(),
        message: "lock poisoned".to_string(),
    }
}

#[async_trait]
impl AuthorizationDataSource for InMemoryAuthorizationData {
    async fn capability_definitions(&self) -> Result<Vec<CapabilityDefinition>, ManagementError> {
        self.definition_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.definitions.read().map_err(|_| poisoned())?.clone())
    }

    async fn role_mappings(&self) -> Result<Vec<RoleMappingRow>, ManagementError> {
        self.mapping_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.mappings.read().map_err(|_| poisoned())?.clone())
    }
}
