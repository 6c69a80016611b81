//! Per-resolution caches over source answers.
//!
//! Both caches are monotonic: once filled for a ref or id they are never
//! invalidated mid-solve, so backtracking never re-queries a source.

use crate::error::SolveError;
use crate::ident::{PackageId, PackageRef};
use crate::manifest::Manifest;
use crate::source::SourceRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Memoized, source-ordered candidate lists per ref.
#[derive(Default)]
pub struct VersionCache {
    lists: HashMap<PackageRef, Vec<PackageId>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The available ids for `target`, in the owning source's preference
    /// order (newest first for the built-in sources).
    pub async fn list(
        &mut self,
        registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<&[PackageId], SolveError> {
        if !self.lists.contains_key(target) {
            let source = registry.source_of(target)?;
            let ids = source.list_versions(registry, target).await?;
            tracing::trace!(package = %target, count = ids.len(), "listed versions");
            self.lists.insert(target.clone(), ids);
        }
        Ok(self.lists.get(target).expect("just inserted"))
    }
}

/// Memoized manifests per id; each manifest is read once per resolution.
#[derive(Default)]
pub struct ManifestCache {
    manifests: HashMap<PackageId, Arc<Manifest>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a manifest the solver already holds (the root's).
    pub fn insert(&mut self, id: PackageId, manifest: Arc<Manifest>) {
        self.manifests.insert(id, manifest);
    }

    pub async fn describe(
        &mut self,
        registry: &SourceRegistry,
        id: &PackageId,
    ) -> Result<Arc<Manifest>, SolveError> {
        if let Some(found) = self.manifests.get(id) {
            return Ok(Arc::clone(found));
        }
        let source = registry.source_of(id.to_ref())?;
        let manifest = Arc::new(source.describe_dependencies(registry, id).await?);
        self.manifests.insert(id.clone(), Arc::clone(&manifest));
        Ok(manifest)
    }
}
