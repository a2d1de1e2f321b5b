use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::Role;

/// Capability ("function") identifier, e.g. `create-vaccine-certificate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(Cow<'static, str>);

impl CapabilityId {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declarative rule granting a capability.
///
/// A definition is granted when every currently valid `additional`
/// definition is granted and the caller holds one of the `one_of` roles (or
/// `one_of` is empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDefinition {
    pub identifier: CapabilityId,

    /// Inclusive start of validity; `None` means unbounded.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,

    /// Inclusive end of validity; `None` means unbounded.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,

    /// Internal role names, at least one of which the caller must hold.
    #[serde(default)]
    pub one_of: BTreeSet<Role>,

    /// Definitions that must all be granted as well.
    #[serde(default)]
    pub additional: Vec<CapabilityDefinition>,
}

impl CapabilityDefinition {
    pub fn new(identifier: impl Into<Cow<'static, str>>) -> Self {
        Self {
            identifier: CapabilityId::new(identifier),
            from: None,
            until: None,
            one_of: BTreeSet::new(),
            additional: Vec::new(),
        }
    }

    pub fn with_window(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn with_one_of<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Cow<'static, str>>,
    {
        self.one_of = roles.into_iter().map(Role::new).collect();
        self
    }

    pub fn with_additional(mut self, definition: CapabilityDefinition) -> Self {
        self.additional.push(definition);
        self
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| from <= now) && self.until.is_none_or(|until| now <= until)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A definition requires itself, directly or through nested definitions.
    #[error("cyclic capability definition: {}", join(.cycle))]
    Cycle { cycle: Vec<CapabilityId> },
}

fn join(path: &[CapabilityId]) -> String {
    path.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// Outcome of evaluating one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Granted,
    /// Caller holds none of the `one_of` roles of `at`.
    MissingRole { at: CapabilityId },
}

impl Evaluation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Evaluation::Granted)
    }
}

/// All capability definitions of a service, keyed by identifier.
///
/// An identifier may be defined more than once; it is granted when any of
/// its definitions valid at the time of the check is granted.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCatalog {
    definitions: HashMap<CapabilityId, Vec<CapabilityDefinition>>,
}

impl CapabilityCatalog {
    pub fn from_definitions(definitions: impl IntoIterator<Item = CapabilityDefinition>) -> Self {
        let mut map: HashMap<CapabilityId, Vec<CapabilityDefinition>> = HashMap::new();
        for definition in definitions {
            let copies = map.entry(definition.identifier.clone()).or_default();
            if !copies.is_empty() {
                debug!(capability = %definition.identifier, copies = copies.len() + 1, "capability defined more than once");
            }
            copies.push(definition);
        }
        Self { definitions: map }
    }

    /// Identifiers with at least one definition valid at `now`.
    pub fn active(&self, now: DateTime<Utc>) -> BTreeSet<CapabilityId> {
        self.definitions
            .iter()
            .filter(|(_, copies)| copies.iter().any(|d| d.is_valid_at(now)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Evaluate `id` for internal `roles` at `now`.
    ///
    /// Returns `Ok(None)` when the capability is unknown or none of its
    /// definitions is inside its validity window.
    pub fn evaluate(
        &self,
        id: &CapabilityId,
        roles: &BTreeSet<Role>,
        now: DateTime<Utc>,
    ) -> Result<Option<Evaluation>, CatalogError> {
        let Some(copies) = self.definitions.get(id) else {
            return Ok(None);
        };

        let mut denied = None;
        for definition in copies.iter().filter(|d| d.is_valid_at(now)) {
            let mut path = Vec::new();
            match evaluate(definition, roles, now, &mut path)? {
                Evaluation::Granted => return Ok(Some(Evaluation::Granted)),
                outcome => {
                    denied.get_or_insert(outcome);
                }
            }
        }
        Ok(denied)
    }

    /// Identifiers of every top-level definition granted at `now`.
    pub fn granted(&self, roles: &BTreeSet<Role>, now: DateTime<Utc>) -> Result<BTreeSet<CapabilityId>, CatalogError> {
        let mut granted = BTreeSet::new();
        for id in self.definitions.keys() {
            if self.evaluate(id, roles, now)?.is_some_and(|e| e.is_granted()) {
                granted.insert(id.clone());
            }
        }
        Ok(granted)
    }
}

fn evaluate<'a>(
    definition: &'a CapabilityDefinition,
    roles: &BTreeSet<Role>,
    now: DateTime<Utc>,
    path: &mut Vec<&'a CapabilityId>,
) -> Result<Evaluation, CatalogError> {
    if let Some(start) = path.iter().position(|id| **id == definition.identifier) {
        let mut cycle: Vec<CapabilityId> = path[start..].iter().map(|id| (*id).clone()).collect();
        cycle.push(definition.identifier.clone());
        return Err(CatalogError::Cycle { cycle });
    }

    path.push(&definition.identifier);
    let mut outcome = Evaluation::Granted;
    for nested in definition.additional.iter().filter(|d| d.is_valid_at(now)) {
        let nested_outcome = evaluate(nested, roles, now, path)?;
        if !nested_outcome.is_granted() {
            outcome = nested_outcome;
            break;
        }
    }
    path.pop();

    if outcome.is_granted()
        && !definition.one_of.is_empty()
        && definition.one_of.is_disjoint(roles)
    {
        outcome = Evaluation::MissingRole {
            at: definition.identifier.clone(),
        };
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn roles(names: &[&'static str]) -> BTreeSet<Role> {
        names.iter().map(|n| Role::new(*n)).collect()
    }

    #[test]
    fn window_bounds_are_inclusive_and_optional() {
        let now = Utc::now();
        let def = CapabilityDefinition::new("f").with_window(Some(now), Some(now));
        assert!(def.is_valid_at(now));
        assert!(!def.is_valid_at(now + Duration::seconds(1)));
        assert!(!def.is_valid_at(now - Duration::seconds(1)));
        assert!(CapabilityDefinition::new("open").is_valid_at(now));
    }

    #[test]
    fn one_of_requires_intersection() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([
            CapabilityDefinition::new("c").with_one_of(["r1", "r2"]),
        ]);
        let id = CapabilityId::new("c");

        let granted = |r: &[&'static str]| {
            catalog
                .evaluate(&id, &roles(r), now)
                .unwrap()
                .is_some_and(|e| e.is_granted())
        };
        assert!(granted(&["r2"]));
        assert!(granted(&["r1", "x"]));
        assert!(!granted(&["x", "y"]));
    }

    #[test]
    fn additional_outside_window_is_skipped() {
        let now = Utc::now();
        let expired = CapabilityDefinition::new("d")
            .with_window(None, Some(now - Duration::days(1)))
            .with_one_of(["nobody"]);
        let catalog = CapabilityCatalog::from_definitions([CapabilityDefinition::new("c")
            .with_one_of(["r1"])
            .with_additional(expired)]);

        let outcome = catalog
            .evaluate(&CapabilityId::new("c"), &roles(&["r1"]), now)
            .unwrap();
        assert_eq!(outcome, Some(Evaluation::Granted));
    }

    #[test]
    fn valid_additional_must_be_granted() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([CapabilityDefinition::new("c")
            .with_one_of(["r1"])
            .with_additional(CapabilityDefinition::new("d").with_one_of(["r2"]))]);

        let outcome = catalog
            .evaluate(&CapabilityId::new("c"), &roles(&["r1"]), now)
            .unwrap();
        assert_eq!(
            outcome,
            Some(Evaluation::MissingRole {
                at: CapabilityId::new("d")
            })
        );

        let outcome = catalog
            .evaluate(&CapabilityId::new("c"), &roles(&["r1", "r2"]), now)
            .unwrap();
        assert_eq!(outcome, Some(Evaluation::Granted));
    }

    #[test]
    fn unknown_or_expired_capability_is_not_evaluated() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([CapabilityDefinition::new("old")
            .with_window(None, Some(now - Duration::minutes(1)))]);

        assert_eq!(
            catalog.evaluate(&CapabilityId::new("old"), &roles(&["r"]), now),
            Ok(None)
        );
        assert_eq!(
            catalog.evaluate(&CapabilityId::new("missing"), &roles(&["r"]), now),
            Ok(None)
        );
    }

    #[test]
    fn self_reference_fails_fast() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([CapabilityDefinition::new("a")
            .with_additional(
                CapabilityDefinition::new("b").with_additional(CapabilityDefinition::new("a")),
            )]);

        let err = catalog
            .evaluate(&CapabilityId::new("a"), &roles(&["r"]), now)
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::Cycle {
                cycle: vec![
                    CapabilityId::new("a"),
                    CapabilityId::new("b"),
                    CapabilityId::new("a")
                ]
            }
        );
    }

    #[test]
    fn repeated_sibling_is_not_a_cycle() {
        let now = Utc::now();
        let shared = CapabilityDefinition::new("shared").with_one_of(["r"]);
        let catalog = CapabilityCatalog::from_definitions([CapabilityDefinition::new("c")
            .with_additional(shared.clone())
            .with_additional(shared)]);

        assert_eq!(
            catalog.evaluate(&CapabilityId::new("c"), &roles(&["r"]), now),
            Ok(Some(Evaluation::Granted))
        );
    }

    #[test]
    fn granted_lists_all_valid_granted_definitions() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([
            CapabilityDefinition::new("open"),
            CapabilityDefinition::new("creator-only").with_one_of(["cert-creator"]),
            CapabilityDefinition::new("admin-only").with_one_of(["admin"]),
        ]);

        let granted = catalog.granted(&roles(&["cert-creator"]), now).unwrap();
        assert_eq!(
            granted,
            BTreeSet::from([CapabilityId::new("open"), CapabilityId::new("creator-only")])
        );
    }

    #[test]
    fn any_valid_duplicate_definition_grants() {
        let now = Utc::now();
        let catalog = CapabilityCatalog::from_definitions([
            CapabilityDefinition::new("c").with_one_of(["r1"]),
            CapabilityDefinition::new("c")
                .with_window(None, Some(now - Duration::days(1)))
                .with_one_of(["r1"]),
            CapabilityDefinition::new("c").with_one_of(["r2"]),
        ]);
        let id = CapabilityId::new("c");

        assert_eq!(catalog.evaluate(&id, &roles(&["r1"]), now), Ok(Some(Evaluation::Granted)));
        assert_eq!(catalog.evaluate(&id, &roles(&["r2"]), now), Ok(Some(Evaluation::Granted)));
        assert_eq!(
            catalog.evaluate(&id, &roles(&["r3"]), now),
            Ok(Some(Evaluation::MissingRole { at: id.clone() }))
        );
        assert_eq!(catalog.granted(&roles(&["r1"]), now), Ok(BTreeSet::from([id.clone()])));
        assert_eq!(catalog.active(now), BTreeSet::from([id]));
    }

    #[test]
    fn nested_definitions_deserialize() {
        let json = r#"{
            "identifier": "create-vaccine-certificate",
            "from": "2021-01-01T00:00:00Z",
            "oneOf": ["cert-creator"],
            "additional": [{ "identifier": "web-ui", "oneOf": ["web-user"] }]
        }"#;
        let def: CapabilityDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.identifier.as_str(), "create-vaccine-certificate");
        assert!(def.until.is_none());
        assert_eq!(def.additional[0].one_of, BTreeSet::from([Role::new("web-user")]));
    }
}
