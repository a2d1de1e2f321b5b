use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Role name.
///
/// The same type carries external names (token claims, directory roles) and
/// internal names; which vocabulary a value belongs to is decided by the
/// [`RoleNamespace`] it travels with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// External vocabulary a raw role name comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleNamespace {
    /// Role names carried in bearer token claims.
    Claim,
    /// Role names returned by the identity directory.
    Directory,
}

/// Raw role names plus the vocabulary they are expressed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    pub namespace: RoleNamespace,
    pub roles: Vec<Role>,
}

impl RoleSet {
    pub fn new(namespace: RoleNamespace, roles: Vec<Role>) -> Self {
        Self { namespace, roles }
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// One row of the management service's role-name table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMappingRow {
    /// Name used in token claims.
    pub claim: String,
    /// Name used by the identity directory.
    pub eiam: String,
    /// Internal name referenced by capability definitions.
    pub intern: String,
}

/// Lookup tables from both external vocabularies to internal role names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMapping {
    claim: HashMap<String, Role>,
    directory: HashMap<String, Role>,
}

impl RoleMapping {
    pub fn from_rows(rows: impl IntoIterator<Item = RoleMappingRow>) -> Self {
        let mut mapping = Self::default();
        for row in rows {
            let internal = Role::new(row.intern);
            if !row.claim.is_empty() {
                if let Some(previous) = mapping.claim.insert(row.claim.clone(), internal.clone()) {
                    warn!(claim = %row.claim, %previous, "claim role mapped twice; last row wins");
                }
            }
            if !row.eiam.is_empty() {
                if let Some(previous) = mapping.directory.insert(row.eiam.clone(), internal) {
                    warn!(directory = %row.eiam, %previous, "directory role mapped twice; last row wins");
                }
            }
        }
        mapping
    }

    /// Translate raw role names into internal names.
    ///
    /// Names without a mapping are dropped.
    pub fn translate(&self, roles: &RoleSet) -> BTreeSet<Role> {
        let table = match roles.namespace {
            RoleNamespace::Claim => &self.claim,
            RoleNamespace::Directory => &self.directory,
        };
        roles
            .roles
            .iter()
            .filter_map(|r| table.get(r.as_str()).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<RoleMappingRow> {
        vec![
            RoleMappingRow {
                claim: "creator".to_string(),
                eiam: "9500.GGG-Certificate.CertificateCreator".to_string(),
                intern: "cert-creator".to_string(),
            },
            RoleMappingRow {
                claim: "superuser".to_string(),
                eiam: "9500.GGG-Certificate.SuperUser".to_string(),
                intern: "cert-superuser".to_string(),
            },
        ]
    }

    #[test]
    fn translates_per_namespace() {
        let mapping = RoleMapping::from_rows(rows());

        let claims = RoleSet::new(RoleNamespace::Claim, vec![Role::new("creator")]);
        assert_eq!(
            mapping.translate(&claims),
            BTreeSet::from([Role::new("cert-creator")])
        );

        let directory = RoleSet::new(
            RoleNamespace::Directory,
            vec![Role::new("9500.GGG-Certificate.SuperUser")],
        );
        assert_eq!(
            mapping.translate(&directory),
            BTreeSet::from([Role::new("cert-superuser")])
        );
    }

    #[test]
    fn unmapped_and_cross_namespace_names_are_dropped() {
        let mapping = RoleMapping::from_rows(rows());

        let claims = RoleSet::new(
            RoleNamespace::Claim,
            vec![
                Role::new("unknown"),
                Role::new("9500.GGG-Certificate.CertificateCreator"),
            ],
        );
        assert!(mapping.translate(&claims).is_empty());
    }

    #[test]
    fn mapping_rows_deserialize() {
        let rows: Vec<RoleMappingRow> = serde_json::from_str(
            r#"[{"claim":"creator","eiam":"E.Creator","intern":"cert-creator"}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].intern, "cert-creator");
    }
}
