//! Strongly-typed identifiers used across the pipeline.
//!
//! External identifiers are opaque strings issued by other systems (token
//! issuer, identity providers), so these wrap `String` rather than `Uuid`.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, GatewayError};

/// Identifier of a caller at its identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalUserId(String);

/// Identity provider a caller authenticated with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdpSource(String);

/// Unique id (`jti`) of a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank (empty or whitespace-only) identifiers are never valid.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl FromStr for $t {
            type Err = GatewayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(GatewayError::new(
                        ErrorCode::MalformedPayload,
                        format!("{} must not be blank", $name),
                    ));
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

impl_string_newtype!(ExternalUserId, "ExternalUserId");
impl_string_newtype!(IdpSource, "IdpSource");
impl_string_newtype!(TokenId, "TokenId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifiers_do_not_parse() {
        assert!("  ".parse::<ExternalUserId>().is_err());
        assert!("".parse::<TokenId>().is_err());
        assert_eq!("abc".parse::<IdpSource>().unwrap().as_str(), "abc");
    }

    #[test]
    fn serializes_transparently() {
        let id = ExternalUserId::new("f1e2");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"f1e2\"");
    }
}
