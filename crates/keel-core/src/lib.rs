//! The dependency resolution core of keel.
//!
//! Given a root manifest, a registry of package sources, and optionally a
//! prior lockfile, [`solver::resolve`] computes one concrete version per
//! package satisfying every transitive constraint and returns the result as
//! a new [`Lockfile`].  Transport, archives, and the CLI live elsewhere;
//! they reach this crate through the boundary traits in [`source`].

pub mod error;
pub mod ident;
pub mod lockfile;
pub mod manifest;
pub mod solver;
pub mod source;

pub use error::{ExitStatus, ParseError, SolveError, SourceError};
pub use ident::{Description, Origin, PackageId, PackageRange, PackageRef};
pub use lockfile::Lockfile;
pub use manifest::Manifest;
pub use solver::{resolve, Environment, SolveContext, SolveMode};
