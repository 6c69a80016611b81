pub mod name;
pub mod version;

// Re-exports
pub use name::{FeatureName, PackageName, SourceName};
pub use version::{Version, VersionConstraint};

/// Name of the manifest file at the root of every keel package.
pub const MANIFEST_FILE: &str = "keel.toml";

/// Name of the lockfile written next to the root manifest.
pub const LOCKFILE_FILE: &str = "keel.lock";
