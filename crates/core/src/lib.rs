//! `certgate-core`: identifiers and the caller-facing error model.
//!
//! This crate has no I/O; every other crate maps its failures onto
//! [`GatewayError`] at the pipeline boundary.

pub mod error;
pub mod id;

pub use error::{ErrorCode, ErrorKind, GatewayError, GatewayResult};
pub use id::{ExternalUserId, IdpSource, TokenId};
