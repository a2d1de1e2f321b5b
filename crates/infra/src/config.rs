//! Gateway configuration loaded from `CERTGATE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use certgate_auth::{CertificateIdentity, CredentialPolicy, LookupMode, LookupModes};
use certgate_core::IdpSource;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Where trusted-caller identities are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverConfig {
    /// Live directory facade at `base_url`.
    Directory { base_url: String },
    /// JSON list of directory users on disk.
    Fixture { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStoreConfig {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementConfig {
    pub base_url: String,
    /// Service name whose capability definitions are fetched.
    pub service: String,
}

/// Cache clearing intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub revocations: Duration,
    pub capabilities: Duration,
    pub role_mappings: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Base64 DER SubjectPublicKeyInfo of the token issuer.
    pub token_public_key: String,
    pub credential_policy: CredentialPolicy,
    pub trusted_callers: Vec<CertificateIdentity>,
    /// Header the TLS terminator puts the client certificate CN into.
    ///
    /// Only set this when the terminator overwrites the header on every
    /// request; a client-supplied value would otherwise claim any trusted
    /// CN. `None` ignores the header, so no caller is trusted.
    pub client_cn_header: Option<String>,
    pub management: ManagementConfig,
    pub resolver: ResolverConfig,
    pub lookup_modes: LookupModes,
    pub revocation_store: RevocationStoreConfig,
    pub refresh: RefreshIntervals,
    pub http_timeout: Duration,
    pub body_limit: usize,
    /// Issuance backend requests are forwarded to; `None` disables forwarding.
    pub backend_base_url: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let defaults = CredentialPolicy::default();
        let credential_policy = CredentialPolicy {
            accepted_scope: env.string_or("CERTGATE_ACCEPTED_SCOPE", &defaults.accepted_scope),
            accepted_type: env.string_or("CERTGATE_ACCEPTED_TYPE", &defaults.accepted_type),
            header_prefix: env.string_or("CERTGATE_TOKEN_HEADER_PREFIX", &defaults.header_prefix),
            leeway_secs: env.parse_or("CERTGATE_TOKEN_LEEWAY_SECS", defaults.leeway_secs)?,
        };

        let resolver = match env.string_or("CERTGATE_IDENTITY_RESOLVER", "directory").as_str() {
            "directory" => ResolverConfig::Directory {
                base_url: env.required("CERTGATE_DIRECTORY_URL")?,
            },
            "fixture" => ResolverConfig::Fixture {
                path: PathBuf::from(env.required("CERTGATE_DIRECTORY_FIXTURE")?),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "CERTGATE_IDENTITY_RESOLVER",
                    message: format!("expected 'directory' or 'fixture', got '{other}'"),
                });
            }
        };

        let revocation_store = match env.string_or("CERTGATE_REVOCATION_STORE", "memory").as_str() {
            "memory" => RevocationStoreConfig::Memory,
            "postgres" => RevocationStoreConfig::Postgres {
                database_url: env.required("CERTGATE_DATABASE_URL")?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "CERTGATE_REVOCATION_STORE",
                    message: format!("expected 'memory' or 'postgres', got '{other}'"),
                });
            }
        };

        Ok(Self {
            bind_addr: env.parse_or("CERTGATE_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            token_public_key: env.required("CERTGATE_TOKEN_PUBLIC_KEY")?,
            credential_policy,
            trusted_callers: env
                .list("CERTGATE_TRUSTED_CALLERS")
                .into_iter()
                .map(CertificateIdentity::new)
                .collect(),
            client_cn_header: env.get("CERTGATE_CLIENT_CN_HEADER"),
            management: ManagementConfig {
                base_url: env.required("CERTGATE_MANAGEMENT_URL")?,
                service: env.string_or("CERTGATE_MANAGEMENT_SERVICE", "certgate"),
            },
            resolver,
            lookup_modes: lookup_modes(&env)?,
            revocation_store,
            refresh: RefreshIntervals {
                revocations: env.secs_or("CERTGATE_REVOCATION_REFRESH_SECS", 60)?,
                capabilities: env.secs_or("CERTGATE_CAPABILITY_REFRESH_SECS", 300)?,
                role_mappings: env.secs_or("CERTGATE_ROLE_MAPPING_REFRESH_SECS", 300)?,
            },
            http_timeout: Duration::from_millis(env.parse_or("CERTGATE_HTTP_TIMEOUT_MS", 5_000)?),
            body_limit: env.parse_or("CERTGATE_BODY_LIMIT_BYTES", 1024 * 1024)?,
            backend_base_url: env.get("CERTGATE_BACKEND_URL"),
        })
    }
}

/// `CERTGATE_DIRECTORY_LOOKUP` plus `source=mode` pairs from
/// `CERTGATE_DIRECTORY_LOOKUP_OVERRIDES`.
fn lookup_modes<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<LookupModes, ConfigError> {
    let default = env.parse_or("CERTGATE_DIRECTORY_LOOKUP", LookupMode::ExternalId)?;
    let mut modes = LookupModes::new(default);

    for pair in env.list("CERTGATE_DIRECTORY_LOOKUP_OVERRIDES") {
        let invalid = |message: String| ConfigError::Invalid {
            key: "CERTGATE_DIRECTORY_LOOKUP_OVERRIDES",
            message,
        };
        let (source, mode) = pair
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected source=mode, got '{pair}'")))?;
        let mode = mode.parse::<LookupMode>().map_err(|e| invalid(e.to_string()))?;
        modes = modes.with_override(IdpSource::new(source.trim()), mode);
    }
    Ok(modes)
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
        }
    }

    fn secs_or(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let secs = self.parse_or(key, default)?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key,
                message: "interval must be at least one second".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const MINIMAL: [(&str, &str); 3] = [
        ("CERTGATE_TOKEN_PUBLIC_KEY", "MIIBIjAN"),
        ("CERTGATE_MANAGEMENT_URL", "http://management:8080"),
        ("CERTGATE_DIRECTORY_URL", "http://directory:8080"),
    ];

    #[test]
    fn minimal_configuration_uses_defaults() {
        let config = load(&MINIMAL).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.credential_policy, CredentialPolicy::default());
        assert!(config.trusted_callers.is_empty());
        assert_eq!(config.client_cn_header, None);
        assert_eq!(config.management.service, "certgate");
        assert_eq!(config.revocation_store, RevocationStoreConfig::Memory);
        assert_eq!(config.refresh.revocations, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.backend_base_url, None);
    }

    #[test]
    fn missing_secrets_are_reported_by_name() {
        let err = load(&MINIMAL[1..]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("CERTGATE_TOKEN_PUBLIC_KEY"));
    }

    #[test]
    fn lists_and_overrides_are_parsed() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CERTGATE_TRUSTED_CALLERS", "portal-a, portal-b ,"));
        pairs.push(("CERTGATE_CLIENT_CN_HEADER", "X-SSL-Client-CN"));
        pairs.push(("CERTGATE_DIRECTORY_LOOKUP_OVERRIDES", "hin=prefixed-subject:hin:, sso=source-subject"));
        let config = load(&pairs).unwrap();

        assert_eq!(
            config.trusted_callers,
            vec![CertificateIdentity::new("portal-a"), CertificateIdentity::new("portal-b")]
        );
        assert_eq!(config.client_cn_header.as_deref(), Some("X-SSL-Client-CN"));
        assert_eq!(
            config.lookup_modes.mode_for(&IdpSource::new("hin")),
            &LookupMode::PrefixedSubject("hin:".to_string())
        );
        assert_eq!(
            config.lookup_modes.mode_for(&IdpSource::new("other")),
            &LookupMode::ExternalId
        );
    }

    #[test]
    fn fixture_resolver_and_postgres_store_need_their_settings() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CERTGATE_IDENTITY_RESOLVER", "fixture"));
        assert_eq!(
            load(&pairs).unwrap_err(),
            ConfigError::Missing("CERTGATE_DIRECTORY_FIXTURE")
        );

        pairs.push(("CERTGATE_DIRECTORY_FIXTURE", "users.json"));
        pairs.push(("CERTGATE_REVOCATION_STORE", "postgres"));
        assert_eq!(
            load(&pairs).unwrap_err(),
            ConfigError::Missing("CERTGATE_DATABASE_URL")
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CERTGATE_HTTP_TIMEOUT_MS", "soon"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "CERTGATE_HTTP_TIMEOUT_MS", .. })
        ));

        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CERTGATE_CAPABILITY_REFRESH_SECS", "0"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "CERTGATE_CAPABILITY_REFRESH_SECS", .. })
        ));

        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CERTGATE_REVOCATION_STORE", "redis"));
        assert!(matches!(load(&pairs), Err(ConfigError::Invalid { .. })));
    }
}
