//! The backtracking search loop: seed, propagate, decide, expand, unwind.

use crate::error::SolveError;
use crate::ident::{PackageId, PackageRange, PackageRef};
use crate::lockfile::Lockfile;
use crate::manifest::Manifest;
use crate::solver::cache::{ManifestCache, VersionCache};
use crate::solver::derivation::{DerivationGraph, SelectionKind};
use crate::solver::report::ConflictReport;
use crate::solver::store::{AddError, ConstraintStore};
use crate::solver::{Environment, SolveContext, SolveMode};
use crate::source::SourceRegistry;
use keel_schema::{FeatureName, PackageName, Version};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A candidate-level conflict the search can recover from by unwinding.
struct Conflict {
    name: PackageName,
    /// The selections whose constraints clashed.
    seeds: Vec<PackageId>,
}

/// Why an expansion stopped: a dead branch to unwind, or a failure that
/// ends the resolution.
enum Interrupt {
    Conflict(Conflict),
    Fatal(SolveError),
}

impl From<SolveError> for Interrupt {
    fn from(err: SolveError) -> Self {
        Interrupt::Fatal(err)
    }
}

/// A candidate ruled out while the partial assignment below `depth`
/// stands.  Unwinding past `depth` lifts the ban.
struct Ban {
    depth: usize,
    name: PackageName,
    version: Version,
}

pub(crate) struct Solver<'a> {
    registry: &'a SourceRegistry,
    environment: &'a Environment,
    lockfile: Lockfile,
    mode: SolveMode,
    unlock: HashSet<PackageName>,
    root_id: PackageId,
    store: ConstraintStore,
    graph: DerivationGraph,
    versions: VersionCache,
    manifests: ManifestCache,
    /// Order in which refs were first constrained; drives deterministic
    /// propagation and decision order.
    seen_order: Vec<PackageName>,
    seen: HashSet<PackageName>,
    banned: Vec<Ban>,
}

impl<'a> Solver<'a> {
    pub(crate) fn new(ctx: SolveContext<'a>) -> Self {
        let root_id =
            PackageRef::root(ctx.root.name().clone()).at_version(ctx.root.version().clone());
        let mut manifests = ManifestCache::new();
        manifests.insert(root_id.clone(), Arc::new(ctx.root.clone()));
        Self {
            registry: ctx.registry,
            environment: ctx.environment,
            lockfile: ctx.lockfile.cloned().unwrap_or_default(),
            mode: ctx.mode,
            unlock: ctx.unlock,
            root_id,
            store: ConstraintStore::new(),
            graph: DerivationGraph::new(),
            versions: VersionCache::new(),
            manifests,
            seen_order: Vec::new(),
            seen: HashSet::new(),
            banned: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<Lockfile, SolveError> {
        // Seed: the root is pinned, magic packages are pinned at whatever
        // the environment provides.  Both are derivations, never reversed.
        self.graph
            .push(self.root_id.clone(), SelectionKind::Derivation);
        let environment = self.environment;
        for (name, version) in environment.iter() {
            let id = PackageRef::magic(name.clone()).at_version(version.clone());
            self.graph.push(id, SelectionKind::Derivation);
        }

        if let Err(interrupt) = self.expand(self.root_id.clone()).await {
            self.recover(interrupt)?;
        }

        loop {
            match self.select_next().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(interrupt) => self.recover(interrupt)?,
            }
        }

        let ids = self
            .graph
            .selections()
            .filter(|s| !s.id.is_root() && !s.id.is_magic())
            .map(|s| s.id.clone());
        Ok(Lockfile::from_ids(ids))
    }

    /// Unit propagation, then one decision.  Returns `false` once every
    /// seen ref is decided.
    async fn select_next(&mut self) -> Result<bool, Interrupt> {
        let mut to_decide: Option<PackageName> = None;
        for name in self.seen_order.clone() {
            if self.graph.position(&name).is_some() || !self.store.contains(&name) {
                continue;
            }
            let candidates = self.candidates_for(&name).await?;
            if candidates.is_empty() {
                let entry = self.store.entry(&name).expect("entry checked above");
                return Err(Interrupt::Conflict(Conflict {
                    seeds: entry.causes().cloned().collect(),
                    name,
                }));
            }
            if candidates.len() == 1 {
                let id = candidates.into_iter().next().expect("one candidate");
                tracing::debug!(package = %id, "propagated: single legal candidate");
                return self
                    .select(id, SelectionKind::Derivation)
                    .await
                    .map(|()| true);
            }
            if to_decide.is_none() {
                to_decide = Some(name);
            }
        }

        match to_decide {
            None => Ok(false),
            Some(name) => {
                let mut candidates = self.candidates_for(&name).await?;
                let id = candidates.swap_remove(0);
                tracing::debug!(package = %id, alternatives = candidates.len(), "decided");
                self.select(id, SelectionKind::Decision).await.map(|()| true)
            }
        }
    }

    /// The legal candidates for `name` in try-order: the owning source's
    /// preference order (reversed for a downgrade of an unlocked package),
    /// with a still-legal lockfile pin moved to the front for locked
    /// packages.
    async fn candidates_for(&mut self, name: &PackageName) -> Result<Vec<PackageId>, Interrupt> {
        let entry = self.store.entry(name).expect("candidates of unseen ref");
        let target = entry.target().clone();
        let intersection = entry.intersection().clone();

        let all = self.versions.list(self.registry, &target).await?;
        if all.is_empty() {
            return Err(Interrupt::Fatal(SolveError::NoVersions {
                name: name.clone(),
                constraint: intersection,
            }));
        }

        let banned = &self.banned;
        let mut allowed: Vec<PackageId> = all
            .iter()
            .filter(|id| {
                intersection.allows(id.version())
                    && !banned
                        .iter()
                        .any(|ban| &ban.name == name && &ban.version == id.version())
            })
            .cloned()
            .collect();

        let unlocked = self.is_unlocked(name);
        if self.mode == SolveMode::Downgrade && unlocked {
            allowed.reverse();
        }
        if !unlocked {
            if let Some(locked) = self.lockfile.id_for(name) {
                if let Some(at) = allowed.iter().position(|id| id == locked) {
                    let pinned = allowed.remove(at);
                    allowed.insert(0, pinned);
                }
            }
        }
        Ok(allowed)
    }

    fn is_unlocked(&self, name: &PackageName) -> bool {
        match self.mode {
            SolveMode::Get => self.unlock.contains(name),
            // An empty unlock set means "everything" for these modes.
            SolveMode::Upgrade | SolveMode::Downgrade => {
                self.unlock.is_empty() || self.unlock.contains(name)
            }
        }
    }

    async fn select(&mut self, id: PackageId, kind: SelectionKind) -> Result<(), Interrupt> {
        self.graph.push(id.clone(), kind);
        self.expand(id).await
    }

    /// Register everything the manifest of `cause` imposes: dependencies,
    /// dev-dependencies when `cause` is the root, environment constraints,
    /// and the conditional groups of every feature its dependers enabled.
    async fn expand(&mut self, cause: PackageId) -> Result<(), Interrupt> {
        let manifest = self.manifests.describe(self.registry, &cause).await?;

        let mut work: VecDeque<(PackageRange, PackageId)> = manifest
            .dependencies()
            .iter()
            .map(|range| (range.clone(), cause.clone()))
            .collect();
        if cause.is_root() {
            work.extend(
                manifest
                    .dev_dependencies()
                    .iter()
                    .map(|range| (range.clone(), cause.clone())),
            );
        }
        work.extend(
            manifest
                .environment()
                .iter()
                .map(|range| (range.clone(), cause.clone())),
        );

        if !cause.is_root() {
            let enabled: Vec<FeatureName> = self
                .store
                .entry(cause.name())
                .map(|entry| entry.features().iter().cloned().collect())
                .unwrap_or_default();
            for feature in enabled {
                for range in self.feature_group(&manifest, &cause, &feature)? {
                    work.push_back((range.clone(), cause.clone()));
                }
            }
        }

        self.register_all(work).await
    }

    /// Impose ranges on the store one by one, queueing follow-up work
    /// (feature growth on already-decided packages) behind the rest.
    async fn register_all(
        &mut self,
        mut work: VecDeque<(PackageRange, PackageId)>,
    ) -> Result<(), Interrupt> {
        while let Some((range, cause)) = work.pop_front() {
            let name = range.name().clone();

            // A dependency on the root package itself just validates
            // against the pinned root version.
            if name == *self.root_id.name() {
                if range.constraint().allows(self.root_id.version()) {
                    continue;
                }
                let report = ConflictReport::single(
                    &name,
                    (!cause.is_root()).then(|| cause.clone()),
                    range.constraint().clone(),
                );
                return Err(Interrupt::Fatal(SolveError::Unsatisfiable(Box::new(report))));
            }

            // A constraint on a magic package the environment does not
            // provide can never be met.
            if range.to_ref().is_magic() && self.environment.version_of(&name).is_none() {
                let _ = self.store.add(range, cause);
                let report =
                    ConflictReport::from_store(&name, &self.store, &self.graph, self.environment);
                return Err(Interrupt::Fatal(SolveError::SdkIncompatible(Box::new(report))));
            }

            tracing::trace!(dependency = %range, cause = %cause, "registering");
            let added = match self.store.add(range.clone(), cause) {
                Err(AddError::Mismatch(mismatch)) => {
                    return Err(Interrupt::Fatal(SolveError::DescriptionMismatch {
                        name: mismatch.name,
                        introducer_a: mismatch.existing_cause.to_string(),
                        a: mismatch.existing.to_string(),
                        introducer_b: mismatch.incoming_cause.to_string(),
                        b: mismatch.incoming.to_string(),
                    }))
                }
                Err(AddError::Conflict(conflict)) => {
                    return Err(Interrupt::Conflict(Conflict {
                        name: conflict.name,
                        seeds: conflict.culprits,
                    }))
                }
                Ok(added) => added,
            };

            if self.seen.insert(name.clone()) {
                self.seen_order.push(name.clone());
            }

            // Already selected: the narrowed requirement must still allow
            // the selection, and any newly enabled feature expands now.
            if let Some(selection) = self.graph.selection_for(&name) {
                let selected = selection.id.clone();
                if !range.constraint().allows(selected.version()) {
                    let entry = self.store.entry(&name).expect("just added");
                    let mut seeds: Vec<PackageId> = entry.causes().cloned().collect();
                    seeds.push(selected);
                    return Err(Interrupt::Conflict(Conflict { name, seeds }));
                }
                if !added.new_features.is_empty() && !selected.is_magic() {
                    let manifest = self.manifests.describe(self.registry, &selected).await?;
                    for feature in &added.new_features {
                        for range in self.feature_group(&manifest, &selected, feature)? {
                            work.push_back((range.clone(), selected.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn feature_group<'m>(
        &self,
        manifest: &'m Manifest,
        id: &PackageId,
        feature: &FeatureName,
    ) -> Result<&'m [PackageRange], Interrupt> {
        manifest.feature_group(feature).ok_or_else(|| {
            Interrupt::Fatal(SolveError::UnknownFeature {
                package: id.name().clone(),
                feature: feature.clone(),
                requested_by: self.feature_requester(id.name(), feature),
            })
        })
    }

    fn feature_requester(&self, name: &PackageName, feature: &FeatureName) -> String {
        self.store
            .entry(name)
            .and_then(|entry| {
                entry
                    .ranges()
                    .iter()
                    .find(|(_, range)| range.features().contains(feature))
                    .map(|(cause, _)| {
                        if cause.is_root() {
                            "the root package".to_string()
                        } else {
                            cause.to_string()
                        }
                    })
            })
            .unwrap_or_else(|| "a depender".to_string())
    }

    fn recover(&mut self, interrupt: Interrupt) -> Result<(), SolveError> {
        match interrupt {
            Interrupt::Fatal(err) => Err(err),
            Interrupt::Conflict(conflict) => self.backtrack(conflict),
        }
    }

    /// Unwind to the most recent decision implicated in the conflict and
    /// rule its candidate out.  Fails the resolution when no such decision
    /// exists.
    fn backtrack(&mut self, conflict: Conflict) -> Result<(), SolveError> {
        let culprits = self.graph.expand_culprits(&conflict.seeds, &self.store);
        let Some(target) = self.graph.deepest_decision_in(&culprits) else {
            return Err(self.fail(&conflict.name));
        };

        let mut failed = None;
        while self.graph.len() > target {
            let selection = self.graph.pop().expect("stack holds the target");
            self.store.remove(&selection.id);
            failed = Some(selection.id);
        }
        let failed = failed.expect("popped the culprit decision");

        let depth = self.graph.len();
        self.banned.retain(|ban| ban.depth <= depth);
        self.banned.push(Ban {
            depth,
            name: failed.name().clone(),
            version: failed.version().clone(),
        });
        tracing::debug!(
            package = %failed,
            conflict = %conflict.name,
            depth,
            "backtracked: candidate ruled out"
        );
        Ok(())
    }

    fn fail(&self, name: &PackageName) -> SolveError {
        let report = ConflictReport::from_store(name, &self.store, &self.graph, self.environment);
        if report.is_magic() {
            SolveError::SdkIncompatible(Box::new(report))
        } else {
            SolveError::Unsatisfiable(Box::new(report))
        }
    }
}
