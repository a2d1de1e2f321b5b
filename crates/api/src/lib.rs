//! HTTP API: signed certificate endpoints in front of the issuance backend.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
