//! Domain-specific errors for dependency resolution.

use keel_schema::{PackageName, SourceName, VersionConstraint};
use thiserror::Error;

use crate::solver::report::ConflictReport;

/// Malformed input: a manifest, lockfile, or source description.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{file}: {source}")]
    Toml {
        file: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("{file}: {message}")]
    Manifest { file: String, message: String },

    #[error("{file}: invalid version constraint for \"{name}\": {message}")]
    Constraint {
        file: String,
        name: PackageName,
        message: String,
    },

    #[error("invalid {source_name} description for \"{name}\": {message}")]
    Description {
        source_name: SourceName,
        name: PackageName,
        message: String,
    },

    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// A source plug-in failed to answer.  Never retried by the core.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source {source_name} is unavailable: {message}")]
    Unavailable {
        source_name: SourceName,
        message: String,
    },

    #[error("package {name} could not be found by source {source_name}")]
    PackageNotFound {
        source_name: SourceName,
        name: PackageName,
    },

    #[error("source {source_name} served an unusable manifest: {source}")]
    BadManifest {
        source_name: SourceName,
        #[source]
        source: Box<SolveError>,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Top-level failure of a resolution.
#[derive(Error, Debug)]
pub enum SolveError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown package source \"{0}\"")]
    UnknownSource(SourceName),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no versions of {name} match {constraint}")]
    NoVersions {
        name: PackageName,
        constraint: VersionConstraint,
    },

    #[error("{0}")]
    Unsatisfiable(Box<ConflictReport>),

    #[error("{0}")]
    SdkIncompatible(Box<ConflictReport>),

    /// A dependency asked a package to enable a feature it does not declare.
    #[error("package {package} has no feature \"{feature}\" (requested by {requested_by})")]
    UnknownFeature {
        package: PackageName,
        feature: keel_schema::FeatureName,
        requested_by: String,
    },

    /// Two dependencies name the same package but disagree about where it
    /// comes from.
    #[error(
        "incompatible dependencies on {name}: {introducer_a} wants it from \
         {a}, {introducer_b} wants it from {b}"
    )]
    DescriptionMismatch {
        name: PackageName,
        introducer_a: String,
        a: String,
        introducer_b: String,
        b: String,
    },
}

impl From<crate::source::UnknownSourceError> for SolveError {
    fn from(err: crate::source::UnknownSourceError) -> Self {
        SolveError::UnknownSource(err.0)
    }
}

/// Process exit statuses reported to the front-end, following sysexits.h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitStatus {
    Success = 0,
    Usage = 64,
    Data = 65,
    Unavailable = 69,
}

impl SolveError {
    /// The exit status a front-end should report for this failure.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            SolveError::Parse(_) => ExitStatus::Data,
            SolveError::UnknownSource(_) => ExitStatus::Usage,
            SolveError::Source(SourceError::Parse(_) | SourceError::BadManifest { .. }) => {
                ExitStatus::Data
            }
            SolveError::Source(_) => ExitStatus::Unavailable,
            SolveError::NoVersions { .. }
            | SolveError::Unsatisfiable(_)
            | SolveError::SdkIncompatible(_)
            | SolveError::UnknownFeature { .. }
            | SolveError::DescriptionMismatch { .. } => ExitStatus::Data,
        }
    }
}
