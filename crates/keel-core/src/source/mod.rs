//! Source plug-ins: where packages come from.
//!
//! A [`Source`] owns everything description-specific for one class of
//! packages: parsing and canonicalizing descriptions, enumerating available
//! versions, reading manifests, and materializing an id on disk.  The solver
//! only ever talks to sources through the [`SourceRegistry`] and never
//! inspects descriptions itself.

mod git;
mod hosted;
mod path;
mod sdk;

pub use git::{GitBackend, GitSource};
pub use hosted::{HostedSource, MemoryRegistry, RegistryClient, DEFAULT_HOST};
pub use path::PathSource;
pub use sdk::{SdkLayout, SdkSource};

use crate::error::{ParseError, SourceError};
use crate::ident::{PackageId, PackageRef};
use crate::manifest::Manifest;
use async_trait::async_trait;
use keel_schema::{PackageName, SourceName, Version};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A named strategy for serving packages.
///
/// The async operations are the solver's only suspension points; they may
/// perform I/O and must be re-entrant under sequential calls.  Raw
/// descriptions arrive as the TOML value written in a manifest or lockfile;
/// the `parse_*` operations canonicalize them into [`crate::Description`]
/// values, so equality and hashing of parsed refs carry this source's
/// semantics.
#[async_trait]
pub trait Source: Send + Sync {
    /// The name this source registers under (`hosted`, `git`, ...).
    fn name(&self) -> &SourceName;

    /// Parse a raw description into a versionless ref.  `raw` is `None` when
    /// the manifest used the bare shorthand form.
    fn parse_ref(
        &self,
        name: &PackageName,
        raw: Option<&toml::Value>,
    ) -> Result<PackageRef, ParseError>;

    /// Parse a raw description plus a concrete version into an id.
    fn parse_id(
        &self,
        name: &PackageName,
        version: Version,
        raw: Option<&toml::Value>,
    ) -> Result<PackageId, ParseError>;

    /// Whether two raw descriptions denote the same package.
    fn descriptions_equal(&self, a: &toml::Value, b: &toml::Value) -> bool;

    /// Hash of a raw description, consistent with [`Self::descriptions_equal`].
    fn hash_description(&self, raw: &toml::Value) -> u64;

    /// All available versions of `target`, ordered the way this source
    /// prefers them (newest first for every built-in source).  An empty list
    /// means the package is unknown here.
    async fn list_versions(
        &self,
        registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<Vec<PackageId>, SourceError>;

    /// The manifest of a concrete id.
    async fn describe_dependencies(
        &self,
        registry: &SourceRegistry,
        id: &PackageId,
    ) -> Result<Manifest, SourceError>;

    /// Make the package content of `id` available locally and return its
    /// directory.  Used by the system cache, never by the solver.
    async fn materialize(&self, id: &PackageId) -> Result<PathBuf, SourceError>;
}

/// A ref named a source that is not registered.
#[derive(Error, Debug)]
#[error("unknown package source \"{0}\"")]
pub struct UnknownSourceError(pub SourceName);

/// Maps source names to their plug-ins for one resolution.
///
/// Passed explicitly wherever description semantics are needed; there is no
/// process-wide registry.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<SourceName, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name, replacing any previous entry.
    pub fn register(&mut self, source: Arc<dyn Source>) -> &mut Self {
        self.sources.insert(source.name().clone(), source);
        self
    }

    pub fn get(&self, name: &SourceName) -> Result<&Arc<dyn Source>, UnknownSourceError> {
        self.sources
            .get(name)
            .ok_or_else(|| UnknownSourceError(name.clone()))
    }

    /// The source serving `target`.  Root and magic refs have none; asking
    /// for theirs is a caller bug.
    pub fn source_of(&self, target: &PackageRef) -> Result<&Arc<dyn Source>, UnknownSourceError> {
        let name = target
            .source()
            .expect("root and magic packages have no source");
        self.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.sources.keys().collect();
        names.sort();
        f.debug_struct("SourceRegistry").field("sources", &names).finish()
    }
}

/// The system cache boundary: where a materialized package lives on disk.
///
/// Downloading and extraction happen behind this trait; the core only needs
/// the location to emit the runtime's packages file.
pub trait SystemCache: Send + Sync {
    fn package_root(&self, id: &PackageId) -> PathBuf;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Description;

    #[test]
    fn test_registry_unknown_source() {
        let registry = SourceRegistry::new();
        let err = match registry.get(&SourceName::new("hosted")) {
            Err(e) => e,
            Ok(_) => panic!("expected unknown source error"),
        };
        assert_eq!(err.to_string(), "unknown package source \"hosted\"");
    }

    #[test]
    fn test_registry_lookup_by_ref() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(HostedSource::offline()));

        let target = PackageRef::sourced(
            PackageName::new("foo"),
            SourceName::new("hosted"),
            Description::Hosted {
                url: DEFAULT_HOST.to_string(),
            },
        );
        assert!(registry.source_of(&target).is_ok());
        assert!(registry.contains("hosted"));
        assert!(!registry.contains("git"));
    }
}
