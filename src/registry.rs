//! Explicit catalog of resource-type registrations.
//!
//! Adapters are collected by an explicit startup routine
//! ([`Registry::builtin`]) rather than load-time side effects, so tests can
//! build registries over any subset of adapters.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::resource::ResourceLister;
use crate::types::Scope;

/// Static metadata for one resource type.
#[derive(Clone)]
pub struct Registration {
    /// Stable identifier used in user-facing type selection.
    pub name: &'static str,
    pub scope: Scope,
    pub lister: Arc<dyn ResourceLister>,
    /// Resource types that must be removed before this one. Honored as a
    /// removal ordering of types within the sweep pass.
    pub depends_on: &'static [&'static str],
    /// Names of the boolean toggles this type consults at removal time.
    pub settings: &'static [&'static str],
    /// Former type names kept working in selection configs.
    pub deprecated_aliases: &'static [&'static str],
}

/// Catalog mapping resource-type name → registration.
#[derive(Default)]
pub struct Registry {
    registrations: Vec<Registration>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of all built-in adapters.
    ///
    /// This is the single explicit registration point: every service module
    /// contributes its registrations here.
    pub fn builtin() -> Result<Self> {
        let mut registry = Registry::new();

        crate::resources::apigateway::register(&mut registry)?;
        crate::resources::appmesh::register(&mut registry)?;
        crate::resources::dynamodb::register(&mut registry)?;
        crate::resources::ec2::register(&mut registry)?;
        crate::resources::iam::register(&mut registry)?;
        crate::resources::kms::register(&mut registry)?;
        crate::resources::rds::register(&mut registry)?;
        crate::resources::s3::register(&mut registry)?;
        crate::resources::secretsmanager::register(&mut registry)?;
        crate::resources::sns::register(&mut registry)?;

        registry.validate_dependencies()?;
        Ok(registry)
    }

    /// Register one resource type. Duplicate names or aliases are an error.
    pub fn register(&mut self, registration: Registration) -> Result<()> {
        if self.resolve(registration.name).is_some() {
            bail!(
                "resource type '{}' is already registered.",
                registration.name
            );
        }
        for alias in registration.deprecated_aliases {
            if self.resolve(alias).is_some() {
                bail!(
                    "deprecated alias '{}' of resource type '{}' collides with an existing registration.",
                    alias,
                    registration.name
                );
            }
        }

        self.index
            .insert(registration.name, self.registrations.len());
        self.registrations.push(registration);
        Ok(())
    }

    /// Look up a registration by name or deprecated alias.
    pub fn resolve(&self, name: &str) -> Option<&Registration> {
        if let Some(&i) = self.index.get(name) {
            return Some(&self.registrations[i]);
        }
        self.registrations
            .iter()
            .find(|r| r.deprecated_aliases.contains(&name))
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.name).collect()
    }

    /// Every `depends_on` target must name a registered type.
    pub fn validate_dependencies(&self) -> Result<()> {
        for registration in &self.registrations {
            for dep in registration.depends_on {
                if !self.index.contains_key(dep) {
                    bail!(
                        "resource type '{}' depends on unregistered type '{}'.",
                        registration.name,
                        dep
                    );
                }
            }
        }
        Ok(())
    }

    /// Registrations ordered so every `depends_on` target precedes its
    /// dependent; ties keep registration order (deterministic Kahn).
    ///
    /// This is a static ordering of types, not a per-resource dependency
    /// scheduler: each type is listed and removed once per pass.
    pub fn iter_ordered(&self) -> Result<Vec<&Registration>> {
        self.validate_dependencies()?;

        let mut placed: HashSet<&'static str> = HashSet::new();
        let mut ordered: Vec<&Registration> = Vec::with_capacity(self.registrations.len());

        while ordered.len() < self.registrations.len() {
            let before = ordered.len();
            for registration in &self.registrations {
                if placed.contains(registration.name) {
                    continue;
                }
                if registration
                    .depends_on
                    .iter()
                    .all(|dep| placed.contains(dep))
                {
                    placed.insert(registration.name);
                    ordered.push(registration);
                }
            }
            if ordered.len() == before {
                let stuck: Vec<&str> = self
                    .registrations
                    .iter()
                    .filter(|r| !placed.contains(r.name))
                    .map(|r| r.name)
                    .collect();
                bail!(
                    "dependency cycle among resource types: {}.",
                    stuck.join(", ")
                );
            }
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLister;

    fn registration(
        name: &'static str,
        depends_on: &'static [&'static str],
        deprecated_aliases: &'static [&'static str],
    ) -> Registration {
        Registration {
            name,
            scope: Scope::Region,
            lister: Arc::new(MockLister::empty()),
            depends_on,
            settings: &[],
            deprecated_aliases,
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = Registry::new();
        registry
            .register(registration("SNSTopic", &[], &[]))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("SNSTopic").is_some());
        assert!(registry.resolve("Unknown").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(registration("SNSTopic", &[], &[]))
            .unwrap();
        assert!(registry.register(registration("SNSTopic", &[], &[])).is_err());
    }

    #[test]
    fn alias_resolves_and_collides() {
        let mut registry = Registry::new();
        registry
            .register(registration("IAMRole", &[], &["IamRole"]))
            .unwrap();

        assert!(registry.resolve("IamRole").is_some());
        assert_eq!(registry.resolve("IamRole").unwrap().name, "IAMRole");
        // New registration under the alias name collides.
        assert!(registry.register(registration("IamRole", &[], &[])).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(registration("IAMRole", &["IAMRolePolicyAttachment"], &[]))
            .unwrap();
        assert!(registry.validate_dependencies().is_err());
        assert!(registry.iter_ordered().is_err());
    }

    #[test]
    fn iter_ordered_puts_dependencies_first() {
        let mut registry = Registry::new();
        registry
            .register(registration("IAMRole", &["IAMRolePolicyAttachment"], &[]))
            .unwrap();
        registry
            .register(registration("IAMRolePolicyAttachment", &[], &[]))
            .unwrap();
        registry
            .register(registration("SNSTopic", &[], &[]))
            .unwrap();

        let names: Vec<&str> = registry.iter_ordered().unwrap().iter().map(|r| r.name).collect();
        let role = names.iter().position(|n| *n == "IAMRole").unwrap();
        let attachment = names
            .iter()
            .position(|n| *n == "IAMRolePolicyAttachment")
            .unwrap();
        assert!(attachment < role);
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn iter_ordered_is_deterministic() {
        let mut registry = Registry::new();
        registry.register(registration("A", &[], &[])).unwrap();
        registry.register(registration("B", &[], &[])).unwrap();
        registry.register(registration("C", &["B"], &[])).unwrap();

        let first: Vec<&str> = registry.iter_ordered().unwrap().iter().map(|r| r.name).collect();
        let second: Vec<&str> = registry.iter_ordered().unwrap().iter().map(|r| r.name).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["A", "B", "C"]);
    }

    #[test]
    fn dependency_cycle_is_an_error() {
        let mut registry = Registry::new();
        registry.register(registration("A", &["B"], &[])).unwrap();
        registry.register(registration("B", &["A"], &[])).unwrap();

        let err = registry.iter_ordered().unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn builtin_registry_is_consistent() {
        let registry = Registry::builtin().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.names().contains(&"S3Bucket"));
        assert!(registry.names().contains(&"SecretsManagerSecret"));
        // Every registration participates in a valid ordering.
        let ordered = registry.iter_ordered().unwrap();
        assert_eq!(ordered.len(), registry.len());
        // Spot-check the dependency-bearing registrations.
        let names: Vec<&str> = ordered.iter().map(|r| r.name).collect();
        let role = names.iter().position(|n| *n == "IAMRole").unwrap();
        let attachment = names
            .iter()
            .position(|n| *n == "IAMRolePolicyAttachment")
            .unwrap();
        assert!(attachment < role);
        let mesh = names.iter().position(|n| *n == "AppMeshMesh").unwrap();
        let node = names
            .iter()
            .position(|n| *n == "AppMeshVirtualNode")
            .unwrap();
        assert!(node < mesh);
    }
}
