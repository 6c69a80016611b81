//! Package identity: which package, which concrete version, which span of
//! acceptable versions.
//!
//! A [`PackageRef`] names a package without committing to a version, a
//! [`PackageId`] is a fully resolved retrievable coordinate, and a
//! [`PackageRange`] is a ref plus a version constraint and feature set.
//! Descriptions inside a ref are stored in the canonical form produced by
//! the owning source's parser, so structural equality and hashing carry the
//! source-defined semantics (two spellings of the same hosted URL compare
//! equal because the hosted source canonicalized both).

use keel_schema::{FeatureName, PackageName, SourceName, Version, VersionConstraint};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Source-specific data locating a package, one variant per source kind.
///
/// Only the owning source constructs these, via its `parse_ref`/`parse_id`
/// operations, which canonicalize on entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Description {
    /// A package server URL, without trailing slash.
    Hosted { url: String },
    /// A git repository plus the revision and subdirectory to read.
    Git {
        url: String,
        reference: String,
        path: String,
    },
    /// A package rooted at a local directory (lexically cleaned).
    Path { path: PathBuf },
    /// A package bundled with an installed SDK.
    Sdk { sdk: String },
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::Hosted { url } => write!(f, "{url}"),
            Description::Git {
                url,
                reference,
                path,
            } => {
                write!(f, "{url}#{reference}")?;
                if path != "." {
                    write!(f, "/{path}")?;
                }
                Ok(())
            }
            Description::Path { path } => write!(f, "{}", path.display()),
            Description::Sdk { sdk } => write!(f, "sdk {sdk}"),
        }
    }
}

/// Where a package comes from.
///
/// Root and magic packages have no source and no description; the variants
/// make that unrepresentable rather than a null to check for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The project being resolved.  Never replaced, never retrieved.
    Root,
    /// A synthesized package carrying environment constraints (e.g. the SDK
    /// version).  Participates in solving but is never retrieved.
    Magic,
    /// An ordinary package served by a registered source.
    Sourced {
        source: SourceName,
        description: Description,
    },
}

/// A package identity without a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    name: PackageName,
    origin: Origin,
}

impl PackageRef {
    /// The root project's ref.
    pub fn root(name: PackageName) -> Self {
        Self {
            name,
            origin: Origin::Root,
        }
    }

    /// A magic ref used to inject implicit constraints into the graph.
    pub fn magic(name: PackageName) -> Self {
        Self {
            name,
            origin: Origin::Magic,
        }
    }

    /// A ref served by `source` and located by `description`.
    pub fn sourced(name: PackageName, source: SourceName, description: Description) -> Self {
        Self {
            name,
            origin: Origin::Sourced {
                source,
                description,
            },
        }
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_root(&self) -> bool {
        matches!(self.origin, Origin::Root)
    }

    pub fn is_magic(&self) -> bool {
        matches!(self.origin, Origin::Magic)
    }

    /// The source serving this ref, if it has one.
    pub fn source(&self) -> Option<&SourceName> {
        match &self.origin {
            Origin::Sourced { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The source-specific location, if the ref has one.
    pub fn description(&self) -> Option<&Description> {
        match &self.origin {
            Origin::Sourced { description, .. } => Some(description),
            _ => None,
        }
    }

    /// Whether `other` denotes the same package as `self`.
    pub fn same_package(&self, other: &PackageRef) -> bool {
        self == other
    }

    /// Fix this ref at a concrete version.
    pub fn at_version(&self, version: Version) -> PackageId {
        PackageId {
            inner: self.clone(),
            version,
        }
    }

    /// Turn this ref into a range over the given constraint.
    pub fn with_constraint(&self, constraint: VersionConstraint) -> PackageRange {
        PackageRange {
            inner: self.clone(),
            constraint,
            features: BTreeSet::new(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Root | Origin::Magic => write!(f, "{}", self.name),
            Origin::Sourced { source, .. } => write!(f, "{} from {}", self.name, source),
        }
    }
}

/// A package identity fixed at a concrete version; retrievable.
///
/// Note that the same logical content can be reachable through multiple
/// non-equal ids (the same bits from two mirrors); the solver treats those
/// as distinct packages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    inner: PackageRef,
    version: Version,
}

impl PackageId {
    pub fn name(&self) -> &PackageName {
        &self.inner.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The identity of this id without its version.  Idempotent.
    pub fn to_ref(&self) -> &PackageRef {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_root()
    }

    pub fn is_magic(&self) -> bool {
        self.inner.is_magic()
    }

    pub fn source(&self) -> Option<&SourceName> {
        self.inner.source()
    }

    pub fn description(&self) -> Option<&Description> {
        self.inner.description()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.name, self.version)
    }
}

/// A constraint over the versions of one package, plus the features the
/// depender asks that package to enable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRange {
    inner: PackageRef,
    constraint: VersionConstraint,
    features: BTreeSet<FeatureName>,
}

impl PackageRange {
    pub fn name(&self) -> &PackageName {
        &self.inner.name
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.constraint
    }

    pub fn features(&self) -> &BTreeSet<FeatureName> {
        &self.features
    }

    pub fn to_ref(&self) -> &PackageRef {
        &self.inner
    }

    /// Whether `id` is the same package and its version is acceptable.
    pub fn allows(&self, id: &PackageId) -> bool {
        self.inner.same_package(&id.inner) && self.constraint.allows(&id.version)
    }

    /// Union-merge `features` into this range.  An empty input returns the
    /// receiver unchanged.
    #[must_use]
    pub fn with_features<I>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = FeatureName>,
    {
        self.features.extend(features);
        self
    }

    /// Replace the constraint, keeping identity and features.
    #[must_use]
    pub fn with_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.constraint = constraint;
        self
    }
}

impl fmt::Display for PackageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.name, self.constraint)
    }
}

/// The version the root package is pinned at when its manifest declares
/// none.
pub fn root_version() -> Version {
    Version {
        major: 0,
        minor: 0,
        patch: 0,
        pre: semver::Prerelease::new("root").expect("static pre-release"),
        build: semver::BuildMetadata::EMPTY,
    }
}
