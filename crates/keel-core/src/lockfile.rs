//! Lockfile lifecycle: the persisted result of a resolution.
//!
//! The lockfile (`keel.lock`) pins one concrete id per package so later
//! retrievals reproduce the same graph.  During a resolution it is a bias,
//! not a constraint: the solver prefers locked ids wherever they are still
//! legal.

use crate::error::{ParseError, SolveError};
use crate::ident::{Description, PackageId};
use crate::source::{SourceRegistry, SystemCache};
use keel_schema::{PackageName, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Format version written to new lockfiles.
const LOCK_FORMAT: u32 = 1;

/// A resolved set of packages, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    packages: BTreeMap<PackageName, PackageId>,
}

impl Lockfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lockfile from resolved ids.  Root and magic packages are
    /// never recorded; callers pass only retrievable ids.
    pub fn from_ids<I: IntoIterator<Item = PackageId>>(ids: I) -> Self {
        Self {
            packages: ids
                .into_iter()
                .map(|id| (id.name().clone(), id))
                .collect(),
        }
    }

    /// The pinned id for `name`, if the prior resolution chose one.
    pub fn id_for(&self, name: &PackageName) -> Option<&PackageId> {
        self.packages.get(name)
    }

    /// All pinned ids, ascending by package name.
    pub fn packages(&self) -> impl Iterator<Item = &PackageId> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Parse lockfile text, rehydrating each entry through its source so
    /// descriptions come back in canonical form.
    pub fn parse(text: &str, file: &str, registry: &SourceRegistry) -> Result<Self, SolveError> {
        let raw: RawLockfile = toml::from_str(text).map_err(|e| ParseError::Toml {
            file: file.to_string(),
            source: Box::new(e),
        })?;
        if raw.version > LOCK_FORMAT {
            return Err(ParseError::Manifest {
                file: file.to_string(),
                message: format!(
                    "lockfile format {} is newer than this keel understands",
                    raw.version
                ),
            }
            .into());
        }

        let mut packages = BTreeMap::new();
        for entry in raw.packages {
            let name = PackageName::new(&entry.name);
            let version = Version::parse(&entry.version).map_err(|e| ParseError::Manifest {
                file: file.to_string(),
                message: format!("invalid locked version for \"{}\": {e}", entry.name),
            })?;
            let source = registry.get(&keel_schema::SourceName::new(&entry.source))?;
            let id = source.parse_id(&name, version, entry.description.as_ref())?;
            packages.insert(name, id);
        }
        Ok(Self { packages })
    }

    /// Serialize deterministically: entries ascending by name.
    pub fn serialize(&self) -> String {
        let raw = RawLockfile {
            version: LOCK_FORMAT,
            packages: self
                .packages
                .values()
                .map(|id| LockedPackage {
                    name: id.name().to_string(),
                    version: id.version().to_string(),
                    source: id
                        .source()
                        .expect("only sourced packages are locked")
                        .to_string(),
                    description: Some(encode_description(
                        id.description().expect("sourced id has a description"),
                    )),
                })
                .collect(),
        };
        toml::to_string_pretty(&raw).expect("lockfile model always serializes")
    }

    /// Load a lockfile, treating a missing file as an empty one so first
    /// resolutions look like any other.
    pub async fn load(path: &Path, registry: &SourceRegistry) -> Result<Self, SolveError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text, &path.display().to_string(), registry),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(ParseError::Io {
                file: path.display().to_string(),
                source,
            }
            .into()),
        }
    }

    /// Atomically persist to disk: write a temp file, then rename, so a
    /// reader never observes a partial lockfile.
    pub async fn save(&self, path: &Path) -> Result<(), SolveError> {
        let content = self.serialize();
        let tmp = path.with_extension("lock.tmp");
        let io_err = |source: std::io::Error| ParseError::Io {
            file: path.display().to_string(),
            source,
        };
        tokio::fs::write(&tmp, &content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    /// Render the flat name-to-location map the language runtime reads.
    /// Locations come from the system cache; the root package maps to its
    /// own `lib/` directory.
    pub fn packages_file(&self, cache: &dyn SystemCache, root_name: &PackageName) -> String {
        let mut out = String::from("# Generated by keel. Do not edit.\n");
        for id in self.packages.values() {
            let root = cache.package_root(id);
            let _ = writeln!(out, "{}:file://{}/lib/", id.name(), root.display());
        }
        let _ = writeln!(out, "{root_name}:lib/");
        out
    }
}

#[derive(Serialize, Deserialize)]
struct RawLockfile {
    version: u32,
    #[serde(default, rename = "package")]
    packages: Vec<LockedPackage>,
}

#[derive(Serialize, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<toml::Value>,
}

/// Encode a canonical description as the lockfile's opaque blob.  Parsing
/// goes back through the owning source, so this round-trips by construction.
fn encode_description(description: &Description) -> toml::Value {
    let mut table = toml::value::Table::new();
    let mut put = |key: &str, value: &str| {
        table.insert(key.to_string(), toml::Value::String(value.to_string()));
    };
    match description {
        Description::Hosted { url } => put("url", url),
        Description::Git {
            url,
            reference,
            path,
        } => {
            put("url", url);
            put("ref", reference);
            put("path", path);
        }
        Description::Path { path } => put("path", &path.display().to_string()),
        Description::Sdk { sdk } => put("sdk", sdk),
    }
    toml::Value::Table(table)
}
