//! Service wiring: turns a [`GatewayConfig`] into the shared request services.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use certgate_auth::{
    AuthorizationOrchestrator, CredentialValidator, DecisionEngine, DirectoryIdentityResolver, IdentityResolver,
    RevocationRegistry, RevocationStore,
};
use certgate_infra::{
    CacheRefreshHandle, CacheRefreshScheduler, GatewayConfig, HttpCapabilitySource, HttpDirectoryClient,
    InMemoryRevocationStore, PostgresRevocationStore, ResolverConfig, RevocationStoreConfig, load_fixture_resolver,
};

use crate::app::backend::{HttpIssuanceBackend, IssuanceBackend, UnconfiguredBackend};

/// Everything a request handler needs, shared across requests.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<AuthorizationOrchestrator>,
    pub backend: Arc<dyn IssuanceBackend>,
    /// Header the TLS terminator puts the client certificate CN into.
    ///
    /// The terminator must overwrite it on every request. `None` ignores
    /// the header and sends every caller down the bearer path.
    pub client_cn_header: Option<String>,
    pub body_limit: usize,
}

/// Running services plus the handle of their cache refresh tasks.
pub struct Services {
    pub app: AppServices,
    pub refresh: CacheRefreshHandle,
}

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("token verification key: {0}")]
    VerificationKey(#[from] certgate_auth::VerificationKeyError),

    #[error("management service client: {0}")]
    Management(#[from] certgate_auth::ManagementError),

    #[error("directory client: {0}")]
    Directory(#[from] certgate_auth::DirectoryError),

    #[error("directory fixture: {0}")]
    Fixture(#[from] certgate_infra::FixtureError),

    #[error("revocation store: {0}")]
    Revocations(#[from] certgate_auth::RevocationStoreError),

    #[error("issuance backend: {0}")]
    Backend(#[from] crate::app::backend::BackendError),
}

/// Wire all services from `config` and start the cache refresh tasks.
pub async fn build_services(config: &GatewayConfig) -> Result<Services, ServicesError> {
    let store: Arc<dyn RevocationStore> = match &config.revocation_store {
        RevocationStoreConfig::Memory => Arc::new(InMemoryRevocationStore::new()),
        RevocationStoreConfig::Postgres { database_url } => {
            let store = PostgresRevocationStore::connect(database_url).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };
    let revocations = Arc::new(RevocationRegistry::new(store));

    let credentials = Arc::new(CredentialValidator::new(
        &config.token_public_key,
        config.credential_policy.clone(),
        Arc::clone(&revocations),
    )?);

    let source = HttpCapabilitySource::new(
        &config.management.base_url,
        &config.management.service,
        config.http_timeout,
    )?;
    let engine = Arc::new(DecisionEngine::new(Arc::new(source)));

    let resolver: Arc<dyn IdentityResolver> = match &config.resolver {
        ResolverConfig::Directory { base_url } => {
            let client = HttpDirectoryClient::new(base_url, config.http_timeout)?;
            Arc::new(DirectoryIdentityResolver::new(Arc::new(client), config.lookup_modes.clone()))
        }
        ResolverConfig::Fixture { path } => Arc::new(load_fixture_resolver(path, config.lookup_modes.clone())?),
    };

    let backend: Arc<dyn IssuanceBackend> = match &config.backend_base_url {
        Some(url) => Arc::new(HttpIssuanceBackend::new(url, config.http_timeout)?),
        None => {
            info!("no issuance backend configured; authorized requests will fail upstream");
            Arc::new(UnconfiguredBackend)
        }
    };

    let refresh = CacheRefreshScheduler::new()
        .register("revoked-tokens", config.refresh.revocations, revocations)
        .register("capability-definitions", config.refresh.capabilities, engine.catalog_cache())
        .register("role-mapping", config.refresh.role_mappings, engine.mapping_cache())
        .spawn();

    if config.client_cn_header.is_none() && !config.trusted_callers.is_empty() {
        warn!("trusted callers configured without a client CN header; nobody will be trusted");
    }

    let orchestrator = Arc::new(AuthorizationOrchestrator::new(
        config.trusted_callers.iter().cloned(),
        resolver,
        credentials,
        engine,
    ));

    Ok(Services {
        app: AppServices {
            orchestrator,
            backend,
            client_cn_header: config.client_cn_header.clone(),
            body_limit: config.body_limit,
        },
        refresh,
    })
}
