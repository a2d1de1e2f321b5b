//! `certgate-auth`: request authentication and authorization pipeline.
//!
//! This crate is decoupled from HTTP and storage: transports and stores plug
//! in through the traits defined here.

pub mod authorize;
pub mod cache;
pub mod capability;
pub mod claims;
pub mod directory;
pub mod integrity;
pub mod orchestrator;
pub mod principal;
pub mod revocation;
pub mod roles;

pub use authorize::{
    AuthorizationDataSource, AuthorizationError, Decision, DecisionEngine, DecisionReason,
    InMemoryAuthorizationData, ManagementError,
};
pub use cache::{Invalidate, SnapshotCache};
pub use capability::{CapabilityCatalog, CapabilityDefinition, CapabilityId, CatalogError};
pub use claims::{
    CredentialClaims, CredentialError, CredentialPolicy, CredentialValidator, ValidatedCredential,
    VerificationKeyError, validate_claims,
};
pub use directory::{
    DirectoryClient, DirectoryError, DirectoryIdentityResolver, DirectoryProfile, DirectoryQuery,
    DirectoryUser, FixtureIdentityResolver, IdentityResolver, LookupMode, LookupModes, ProfileState,
};
pub use integrity::{CLIENT_CERT_HEADER, IntegrityError, SIGNATURE_HEADER, verify_detached};
pub use orchestrator::AuthorizationOrchestrator;
pub use principal::{CallerContext, CertificateIdentity, IdentityReference, RoleOrigin};
pub use revocation::{
    InMemoryRevocationStore, RevocationEntry, RevocationRegistry, RevocationStore, RevocationStoreError,
};
pub use roles::{Role, RoleMapping, RoleMappingRow, RoleNamespace, RoleSet};
