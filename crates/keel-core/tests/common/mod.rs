//! Shared fixtures: an in-memory package universe and a solve shorthand.

use keel_core::manifest::Manifest;
use keel_core::solver::{resolve, Environment, SolveContext, SolveMode};
use keel_core::source::{
    HostedSource, MemoryRegistry, PathSource, SdkLayout, SdkSource, SourceRegistry,
};
use keel_core::{Lockfile, SolveError};
use keel_schema::{PackageName, Version, VersionConstraint};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds a hosted universe of packages and resolves against it.
pub struct Universe {
    client: MemoryRegistry,
    sdk: SdkLayout,
    environment: Environment,
}

impl Universe {
    pub fn new() -> Self {
        Self {
            client: MemoryRegistry::new(),
            sdk: SdkLayout::new(),
            environment: Environment::new(),
        }
    }

    /// Publish a package version with plain hosted dependencies given as
    /// `(name, constraint)` pairs.
    pub fn publish(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> &mut Self {
        let manifest = deps.iter().fold(
            Manifest::new(PackageName::new(name), v(version)),
            |manifest, (dep, constraint)| manifest.with_dependency(hosted_range(dep, constraint)),
        );
        self.publish_manifest(manifest)
    }

    /// Publish a fully built manifest.
    pub fn publish_manifest(&mut self, manifest: Manifest) -> &mut Self {
        self.client.publish(manifest);
        self
    }

    /// Make magic package `name` available at `version`.
    pub fn with_magic(&mut self, name: &str, version: &str) -> &mut Self {
        self.environment = self.environment.clone().with(name, v(version));
        self
    }

    pub fn registry(&self) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(HostedSource::new(
            Arc::new(self.client.clone()),
            PathBuf::from("/nonexistent-cache"),
        )));
        registry.register(Arc::new(PathSource::new()));
        registry.register(Arc::new(SdkSource::new(self.sdk.clone())));
        registry
    }

    pub async fn solve(&self, root: &Manifest) -> Result<Lockfile, SolveError> {
        self.solve_with(root, None, SolveMode::Get, &[]).await
    }

    pub async fn solve_with(
        &self,
        root: &Manifest,
        lockfile: Option<&Lockfile>,
        mode: SolveMode,
        unlock: &[&str],
    ) -> Result<Lockfile, SolveError> {
        let registry = self.registry();
        resolve(SolveContext {
            root,
            lockfile,
            mode,
            unlock: unlock.iter().map(|n| PackageName::new(n)).collect::<HashSet<_>>(),
            registry: &registry,
            environment: &self.environment,
        })
        .await
    }
}

pub fn v(text: &str) -> Version {
    Version::parse(text).unwrap()
}

pub fn c(text: &str) -> VersionConstraint {
    VersionConstraint::parse(text).unwrap()
}

/// A hosted range at the default host, as manifests written by hand parse.
pub fn hosted_range(name: &str, constraint: &str) -> keel_core::PackageRange {
    let source = HostedSource::offline();
    use keel_core::source::Source as _;
    source
        .parse_ref(&PackageName::new(name), None)
        .unwrap()
        .with_constraint(c(constraint))
}

/// A root manifest with plain hosted dependencies.
pub fn root(name: &str, deps: &[(&str, &str)]) -> Manifest {
    deps.iter().fold(
        Manifest::new(PackageName::new(name), v("1.0.0")),
        |manifest, (dep, constraint)| manifest.with_dependency(hosted_range(dep, constraint)),
    )
}

/// Assert that the lockfile pinned `name` at exactly `version`.
pub fn assert_pinned(lockfile: &Lockfile, name: &str, version: &str) {
    let id = lockfile
        .id_for(&PackageName::new(name))
        .unwrap_or_else(|| panic!("{name} missing from lockfile"));
    assert_eq!(id.version(), &v(version), "version of {name}");
}
