//! Human-readable explanations for unsatisfiable inputs.

use crate::ident::PackageId;
use crate::solver::derivation::DerivationGraph;
use crate::solver::store::ConstraintStore;
use crate::solver::Environment;
use keel_schema::{PackageName, Version, VersionConstraint};
use std::fmt;

/// One "X depends on P <constraint>" link in the explanation.
#[derive(Debug, Clone)]
pub struct ReportLine {
    /// The selection whose manifest imposed the constraint; `None` for the
    /// root package.
    pub depender: Option<PackageId>,
    pub constraint: VersionConstraint,
}

/// Why no version of one package can satisfy its dependers, with the
/// culprit constraints listed newest-decision-first.
#[derive(Debug, Clone)]
pub struct ConflictReport {
    package: PackageName,
    lines: Vec<ReportLine>,
    /// Set when the conflicting package is magic: the environment's pinned
    /// version, or `None` when the environment does not provide it at all.
    sdk_version: Option<Version>,
    is_magic: bool,
}

impl ConflictReport {
    /// Build a report for the package whose constraints can no longer be
    /// met, reading the surviving constraint set out of the store.
    pub fn from_store(
        package: &PackageName,
        store: &ConstraintStore,
        graph: &DerivationGraph,
        environment: &Environment,
    ) -> Self {
        let mut lines: Vec<(usize, ReportLine)> = Vec::new();
        let mut is_magic = false;

        if let Some(entry) = store.entry(package) {
            is_magic = entry.target().is_magic();
            for (cause, range) in entry.ranges() {
                let position = graph.position(cause.name()).unwrap_or(0);
                let depender = if cause.is_root() {
                    None
                } else {
                    Some(cause.clone())
                };
                lines.push((
                    position,
                    ReportLine {
                        depender,
                        constraint: range.constraint().clone(),
                    },
                ));
            }
        }

        // Newest decision first.
        lines.sort_by(|a, b| b.0.cmp(&a.0));

        Self {
            package: package.clone(),
            lines: lines.into_iter().map(|(_, line)| line).collect(),
            sdk_version: environment.version_of(package).cloned(),
            is_magic,
        }
    }

    /// A single-link report, for failures with no store entry to walk
    /// (e.g. a dependency on the root package itself).
    pub fn single(
        package: &PackageName,
        depender: Option<PackageId>,
        constraint: VersionConstraint,
    ) -> Self {
        Self {
            package: package.clone(),
            lines: vec![ReportLine {
                depender,
                constraint,
            }],
            sdk_version: None,
            is_magic: false,
        }
    }

    pub fn package(&self) -> &PackageName {
        &self.package
    }

    pub fn lines(&self) -> &[ReportLine] {
        &self.lines
    }

    pub fn is_magic(&self) -> bool {
        self.is_magic
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match &line.depender {
                None => write!(f, "the root package depends on ")?,
                Some(id) => write!(f, "{} {} depends on ", id.name(), id.version())?,
            }
            write!(f, "{} {}; ", self.package, line.constraint)?;
        }

        if self.is_magic {
            match &self.sdk_version {
                Some(version) if self.lines.len() > 1 => write!(
                    f,
                    "the current {} version ({version}) satisfies none of them",
                    self.package
                ),
                Some(version) => write!(
                    f,
                    "the current {} version ({version}) does not satisfy it",
                    self.package
                ),
                None => write!(
                    f,
                    "the current environment does not provide {}",
                    self.package
                ),
            }
        } else {
            let closing = match self.lines.len() {
                0 | 1 => "the requirement",
                2 => "both",
                _ => "all of them",
            };
            write!(f, "no version of {} satisfies {closing}", self.package)
        }
    }
}
