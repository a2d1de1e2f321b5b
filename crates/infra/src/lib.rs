//! Infrastructure layer: config, stores, external service clients, schedulers.

pub mod config;
pub mod directory;
pub mod management;
pub mod revocation_store;
pub mod scheduler;

pub use config::{ConfigError, GatewayConfig, ResolverConfig, RevocationStoreConfig};
pub use directory::{FixtureError, HttpDirectoryClient, load_fixture_resolver};
pub use management::HttpCapabilitySource;
pub use revocation_store::{InMemoryRevocationStore, PostgresRevocationStore};
pub use scheduler::{CacheRefreshHandle, CacheRefreshScheduler, SchedulerStats};
