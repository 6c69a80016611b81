//! The constraint store: per package, the intersection of every range the
//! current partial assignment imposes on it.

use crate::ident::{PackageId, PackageRange, PackageRef};
use keel_schema::{FeatureName, PackageName, VersionConstraint};
use std::collections::{BTreeSet, HashMap};

/// Accumulated requirements on one package.
#[derive(Debug)]
pub struct Entry {
    target: PackageRef,
    /// Every imposed range with the selection that imposed it, oldest
    /// first.  The multiset the intersection is recomputed from on
    /// backtrack.
    ranges: Vec<(PackageId, PackageRange)>,
    intersection: VersionConstraint,
    features: BTreeSet<FeatureName>,
}

impl Entry {
    pub fn target(&self) -> &PackageRef {
        &self.target
    }

    pub fn intersection(&self) -> &VersionConstraint {
        &self.intersection
    }

    /// Features any depender asked this package to enable.
    pub fn features(&self) -> &BTreeSet<FeatureName> {
        &self.features
    }

    pub fn ranges(&self) -> &[(PackageId, PackageRange)] {
        &self.ranges
    }

    pub fn causes(&self) -> impl Iterator<Item = &PackageId> {
        self.ranges.iter().map(|(cause, _)| cause)
    }

    fn recompute(&mut self) {
        self.intersection = self
            .ranges
            .iter()
            .fold(VersionConstraint::any(), |acc, (_, range)| {
                acc.intersect(range.constraint())
            });
        self.features = self
            .ranges
            .iter()
            .flat_map(|(_, range)| range.features().iter().cloned())
            .collect();
    }
}

/// The imposed ranges on a package no longer intersect.
#[derive(Debug)]
pub struct StoreConflict {
    pub name: PackageName,
    /// Selections whose constraints participate in the empty intersection,
    /// the incoming one last.
    pub culprits: Vec<PackageId>,
}

/// Two dependers disagree about which package a name denotes.
#[derive(Debug)]
pub struct RefMismatch {
    pub name: PackageName,
    pub existing: PackageRef,
    pub existing_cause: PackageId,
    pub incoming: PackageRef,
    pub incoming_cause: PackageId,
}

#[derive(Debug)]
pub enum AddError {
    Conflict(StoreConflict),
    Mismatch(Box<RefMismatch>),
}

/// What [`ConstraintStore::add`] did.
#[derive(Debug)]
pub struct Added {
    /// This was the first range ever imposed on the package.
    pub first_seen: bool,
    /// Features newly requested by this range.
    pub new_features: BTreeSet<FeatureName>,
}

/// Source of truth for "what versions of P are still legal".
#[derive(Debug, Default)]
pub struct ConstraintStore {
    entries: HashMap<PackageName, Entry>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, name: &PackageName) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.entries.contains_key(name)
    }

    /// Impose `range` on its package, intersecting with what is already
    /// required.  The conflicting constraint stays in the store on failure
    /// so reporting can show the full set; the caller unwinds it by
    /// removing its cause.
    pub fn add(&mut self, range: PackageRange, cause: PackageId) -> Result<Added, AddError> {
        let name = range.name().clone();
        match self.entries.get_mut(&name) {
            None => {
                let new_features = range.features().clone();
                let entry = Entry {
                    target: range.to_ref().clone(),
                    intersection: range.constraint().clone(),
                    features: new_features.clone(),
                    ranges: vec![(cause, range)],
                };
                self.entries.insert(name, entry);
                Ok(Added {
                    first_seen: true,
                    new_features,
                })
            }
            Some(entry) => {
                if !entry.target.same_package(range.to_ref()) {
                    return Err(AddError::Mismatch(Box::new(RefMismatch {
                        name,
                        existing: entry.target.clone(),
                        existing_cause: entry.ranges[0].0.clone(),
                        incoming: range.to_ref().clone(),
                        incoming_cause: cause,
                    })));
                }

                let narrowed = entry.intersection.intersect(range.constraint());
                let new_features: BTreeSet<FeatureName> = range
                    .features()
                    .difference(&entry.features)
                    .cloned()
                    .collect();
                entry.features.extend(new_features.iter().cloned());
                entry.ranges.push((cause, range));

                if narrowed.is_empty() {
                    let culprits = entry.causes().cloned().collect();
                    Err(AddError::Conflict(StoreConflict { name, culprits }))
                } else {
                    entry.intersection = narrowed;
                    Ok(Added {
                        first_seen: false,
                        new_features,
                    })
                }
            }
        }
    }

    /// Drop every range `cause` imposed and recompute the affected
    /// intersections.  Entries left with no ranges disappear entirely.
    pub fn remove(&mut self, cause: &PackageId) {
        self.entries.retain(|_, entry| {
            let before = entry.ranges.len();
            entry.ranges.retain(|(c, _)| c != cause);
            if entry.ranges.is_empty() {
                return false;
            }
            if entry.ranges.len() != before {
                entry.recompute();
            }
            true
        });
    }
}
