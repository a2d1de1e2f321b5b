//! Revocation store backends.
//!
//! The in-memory store lives next to the registry in `certgate-auth`; this
//! module adds the durable one.

pub mod postgres;

pub use certgate_auth::InMemoryRevocationStore;
pub use postgres::PostgresRevocationStore;
