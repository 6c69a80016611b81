//! The version solver.
//!
//! A single-threaded backtracking search over package versions: select a
//! candidate, propagate its dependencies into the constraint store, and on
//! conflict walk the derivation graph back to the most recent decision
//! worth reversing.  Fully deterministic for fixed inputs and fixed source
//! answers; the only suspension points are calls into sources.

pub mod cache;
pub mod derivation;
pub mod report;
pub mod store;

mod solve;

use crate::error::SolveError;
use crate::lockfile::Lockfile;
use crate::manifest::Manifest;
use crate::source::SourceRegistry;
use keel_schema::{PackageName, Version};
use std::collections::{BTreeMap, HashSet};

/// What the front-end asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveMode {
    /// Honor the lockfile wherever it is still legal.
    #[default]
    Get,
    /// Ignore lockfile pins for unlocked packages and prefer newer versions.
    Upgrade,
    /// Like upgrade, but prefer the oldest versions sources still offer.
    Downgrade,
}

/// Versions of the magic packages visible to this resolution (the SDK and
/// anything else the installation injects).
#[derive(Debug, Clone, Default)]
pub struct Environment {
    versions: BTreeMap<PackageName, Version>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that magic package `name` exists at `version`.
    #[must_use]
    pub fn with(mut self, name: &str, version: Version) -> Self {
        self.versions.insert(PackageName::new(name), version);
        self
    }

    pub fn version_of(&self, name: &PackageName) -> Option<&Version> {
        self.versions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PackageName, &Version)> {
        self.versions.iter()
    }
}

/// Everything one resolution needs; passed explicitly, no process state.
pub struct SolveContext<'a> {
    pub root: &'a Manifest,
    /// Prior solution used as a bias, or `None` for a fresh resolve.
    pub lockfile: Option<&'a Lockfile>,
    pub mode: SolveMode,
    /// Packages whose lockfile pin may be discarded.  Empty means "none"
    /// for [`SolveMode::Get`] and "all" for upgrade and downgrade.
    pub unlock: HashSet<PackageName>,
    pub registry: &'a SourceRegistry,
    pub environment: &'a Environment,
}

/// Resolve the root manifest to a complete assignment of one id per
/// package, returned as a fresh lockfile.  Nothing is written to disk.
pub async fn resolve(ctx: SolveContext<'_>) -> Result<Lockfile, SolveError> {
    solve::Solver::new(ctx).run().await
}
