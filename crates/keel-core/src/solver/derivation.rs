//! The derivation graph: which selections exist, which were free choices,
//! and which selections a conflict can be traced back to.

use crate::ident::PackageId;
use crate::solver::store::ConstraintStore;
use keel_schema::PackageName;
use std::collections::{HashMap, HashSet};

/// How a selection entered the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// The solver chose among several candidates; reversible.
    Decision,
    /// Forced: the root, a magic package, or unit propagation with a single
    /// legal candidate.  Reversing it directly is meaningless; its causes
    /// are what can change.
    Derivation,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub id: PackageId,
    pub kind: SelectionKind,
}

/// The ordered stack of selections plus the cause bookkeeping needed to
/// unwind it.
#[derive(Debug, Default)]
pub struct DerivationGraph {
    stack: Vec<Selection>,
    positions: HashMap<PackageName, usize>,
}

impl DerivationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn push(&mut self, id: PackageId, kind: SelectionKind) {
        self.positions.insert(id.name().clone(), self.stack.len());
        self.stack.push(Selection { id, kind });
    }

    pub fn pop(&mut self) -> Option<Selection> {
        let selection = self.stack.pop()?;
        self.positions.remove(selection.id.name());
        Some(selection)
    }

    /// The selection currently holding `name`, if any.
    pub fn selection_for(&self, name: &PackageName) -> Option<&Selection> {
        self.positions.get(name).map(|&at| &self.stack[at])
    }

    /// Stack position of the selection for `name` (0 is the root).
    pub fn position(&self, name: &PackageName) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn selections(&self) -> impl Iterator<Item = &Selection> {
        self.stack.iter()
    }

    /// Expand a conflict's immediate causes into the set of packages whose
    /// reversal could matter.  Derivations are transparent: they were
    /// forced, so the selections that constrained them take their place.
    /// The result is closed under that substitution.
    pub fn expand_culprits(
        &self,
        seeds: &[PackageId],
        store: &ConstraintStore,
    ) -> HashSet<PackageName> {
        let mut result: HashSet<PackageName> = HashSet::new();
        let mut work: Vec<PackageName> = seeds.iter().map(|id| id.name().clone()).collect();

        while let Some(name) = work.pop() {
            if !result.insert(name.clone()) {
                continue;
            }
            let forced = matches!(
                self.selection_for(&name),
                None | Some(Selection {
                    kind: SelectionKind::Derivation,
                    ..
                })
            );
            if forced {
                if let Some(entry) = store.entry(&name) {
                    for cause in entry.causes() {
                        if !result.contains(cause.name()) {
                            work.push(cause.name().clone());
                        }
                    }
                }
            }
        }
        result
    }

    /// Deepest stack index holding a reversible decision on one of `names`.
    pub fn deepest_decision_in(&self, names: &HashSet<PackageName>) -> Option<usize> {
        self.stack.iter().enumerate().rev().find_map(|(at, selection)| {
            (selection.kind == SelectionKind::Decision && names.contains(selection.id.name()))
                .then_some(at)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{Description, PackageRef};
    use keel_schema::{SourceName, Version, VersionConstraint};

    fn hosted_ref(name: &str) -> PackageRef {
        PackageRef::sourced(
            PackageName::new(name),
            SourceName::new("hosted"),
            Description::Hosted {
                url: "https://pkg.keel.dev".to_string(),
            },
        )
    }

    fn id(name: &str, version: &str) -> PackageId {
        hosted_ref(name).at_version(Version::parse(version).unwrap())
    }

    #[test]
    fn test_push_pop_tracks_positions() {
        let mut graph = DerivationGraph::new();
        graph.push(id("a", "1.0.0"), SelectionKind::Decision);
        graph.push(id("b", "1.0.0"), SelectionKind::Derivation);

        assert_eq!(graph.position(&PackageName::new("a")), Some(0));
        assert_eq!(graph.position(&PackageName::new("b")), Some(1));

        graph.pop();
        assert_eq!(graph.position(&PackageName::new("b")), None);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_culprits_expand_through_derivations() {
        // a (decision) constrains b (derivation); a conflict blaming b must
        // reach back to a.
        let mut graph = DerivationGraph::new();
        let a = id("a", "1.0.0");
        let b = id("b", "1.0.0");
        graph.push(a.clone(), SelectionKind::Decision);
        graph.push(b.clone(), SelectionKind::Derivation);

        let mut store = ConstraintStore::new();
        store
            .add(
                hosted_ref("b").with_constraint(VersionConstraint::parse("^1.0.0").unwrap()),
                a.clone(),
            )
            .unwrap();

        let culprits = graph.expand_culprits(std::slice::from_ref(&b), &store);
        assert!(culprits.contains(&PackageName::new("a")));
        assert!(culprits.contains(&PackageName::new("b")));

        let target = graph.deepest_decision_in(&culprits);
        assert_eq!(target, Some(0));
    }

    #[test]
    fn test_no_decision_means_no_target() {
        let mut graph = DerivationGraph::new();
        graph.push(id("root", "1.0.0"), SelectionKind::Derivation);

        let mut names = HashSet::new();
        names.insert(PackageName::new("root"));
        assert_eq!(graph.deepest_decision_in(&names), None);
    }
}
