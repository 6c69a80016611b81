//! Manifest parsing for keel packages.
//!
//! A manifest (`keel.toml`) declares a package's identity, its dependencies
//! and dev-dependencies, its environment constraints (SDK gating), and its
//! features with their conditional dependency groups:
//!
//! ```toml
//! [package]
//! name = "demo"
//! version = "1.2.3"
//!
//! [environment]
//! sdk = "^3.0.0"
//!
//! [dependencies]
//! foo = "^1.0.0"
//! bar = { version = "^2.0", git = "https://git.example/bar" }
//! local = { path = "../local" }
//! styled = { version = "^1.0", features = ["themes"] }
//!
//! [dev-dependencies]
//! checker = "^1.0"
//!
//! [features.themes]
//! palette = "^0.4"
//! ```
//!
//! Dependency tables keep declaration order; the solver walks them in the
//! order they were written.

use crate::error::{ParseError, SolveError};
use crate::ident::{root_version, PackageRange, PackageRef};
use crate::source::SourceRegistry;
use keel_schema::{FeatureName, PackageName, SourceName, Version, VersionConstraint};
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed project metadata for one package version.
#[derive(Debug, Clone)]
pub struct Manifest {
    name: PackageName,
    version: Version,
    dependencies: Vec<PackageRange>,
    dev_dependencies: Vec<PackageRange>,
    environment: Vec<PackageRange>,
    features: BTreeMap<FeatureName, Vec<PackageRange>>,
}

impl Manifest {
    /// An empty manifest, for programmatic construction (registries, tests).
    pub fn new(name: PackageName, version: Version) -> Self {
        Self {
            name,
            version,
            dependencies: Vec::new(),
            dev_dependencies: Vec::new(),
            environment: Vec::new(),
            features: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Dependencies considered for every depender.
    pub fn dependencies(&self) -> &[PackageRange] {
        &self.dependencies
    }

    /// Dependencies considered only when this package is the root; a
    /// library's test-only deps never pollute downstream resolutions.
    pub fn dev_dependencies(&self) -> &[PackageRange] {
        &self.dev_dependencies
    }

    /// Constraints over magic packages (SDK and friends).
    pub fn environment(&self) -> &[PackageRange] {
        &self.environment
    }

    pub fn declared_features(&self) -> impl Iterator<Item = &FeatureName> {
        self.features.keys()
    }

    pub fn has_feature(&self, feature: &FeatureName) -> bool {
        self.features.contains_key(feature)
    }

    /// The conditional dependency group gated by `feature`.
    pub fn feature_group(&self, feature: &FeatureName) -> Option<&[PackageRange]> {
        self.features.get(feature).map(Vec::as_slice)
    }

    #[must_use]
    pub fn with_dependency(mut self, range: PackageRange) -> Self {
        self.dependencies.push(range);
        self
    }

    #[must_use]
    pub fn with_dev_dependency(mut self, range: PackageRange) -> Self {
        self.dev_dependencies.push(range);
        self
    }

    /// Constrain the magic package `name` (e.g. `sdk`).
    #[must_use]
    pub fn with_environment(mut self, name: &str, constraint: VersionConstraint) -> Self {
        self.environment
            .push(PackageRef::magic(PackageName::new(name)).with_constraint(constraint));
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature: &str, group: Vec<PackageRange>) -> Self {
        self.features.insert(FeatureName::new(feature), group);
        self
    }

    /// Parse manifest text.
    ///
    /// `file` labels errors; `base` is the directory relative path
    /// dependencies resolve against, `None` for manifests that have no
    /// location (registry-served), in which case path dependencies are
    /// rejected.
    pub fn parse(
        text: &str,
        file: &str,
        registry: &SourceRegistry,
        base: Option<&Path>,
    ) -> Result<Self, SolveError> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| ParseError::Toml {
            file: file.to_string(),
            source: Box::new(e),
        })?;
        raw.resolve(file, registry, base)
    }

    /// Load and parse a manifest from disk; relative path dependencies
    /// resolve against the manifest's directory.
    pub async fn load(path: &Path, registry: &SourceRegistry) -> Result<Self, SolveError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ParseError::Io {
                file: path.display().to_string(),
                source,
            })?;
        Self::parse(
            &text,
            &path.display().to_string(),
            registry,
            path.parent(),
        )
    }
}

#[derive(serde::Deserialize)]
struct RawManifest {
    package: RawPackage,
    #[serde(default)]
    environment: toml::value::Table,
    #[serde(default)]
    dependencies: toml::value::Table,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: toml::value::Table,
    #[serde(default)]
    features: toml::value::Table,
}

#[derive(serde::Deserialize)]
struct RawPackage {
    name: String,
    version: Option<String>,
}

impl RawManifest {
    fn resolve(
        self,
        file: &str,
        registry: &SourceRegistry,
        base: Option<&Path>,
    ) -> Result<Manifest, SolveError> {
        if !PackageName::is_valid(&self.package.name) {
            return Err(ParseError::Manifest {
                file: file.to_string(),
                message: format!("invalid package name \"{}\"", self.package.name),
            }
            .into());
        }
        let name = PackageName::new(&self.package.name);
        let version = match &self.package.version {
            None => root_version(),
            Some(v) => Version::parse(v).map_err(|e| ParseError::Manifest {
                file: file.to_string(),
                message: format!("invalid package version \"{v}\": {e}"),
            })?,
        };

        let mut manifest = Manifest::new(name, version);
        manifest.dependencies = parse_group(&self.dependencies, file, registry, base)?;
        manifest.dev_dependencies = parse_group(&self.dev_dependencies, file, registry, base)?;

        for (magic_name, value) in &self.environment {
            let constraint = match value {
                toml::Value::String(s) => {
                    VersionConstraint::parse(s).map_err(|e| ParseError::Constraint {
                        file: file.to_string(),
                        name: PackageName::new(magic_name),
                        message: e.to_string(),
                    })?
                }
                other => {
                    return Err(ParseError::Manifest {
                        file: file.to_string(),
                        message: format!("environment entry \"{magic_name}\" must be a constraint string, got {other}"),
                    }
                    .into())
                }
            };
            manifest.environment.push(
                PackageRef::magic(PackageName::new(magic_name)).with_constraint(constraint),
            );
        }

        for (feature, value) in &self.features {
            let group = match value {
                toml::Value::Table(table) => parse_group(table, file, registry, base)?,
                other => {
                    return Err(ParseError::Manifest {
                        file: file.to_string(),
                        message: format!(
                            "feature \"{feature}\" must be a table of dependencies, got {other}"
                        ),
                    }
                    .into())
                }
            };
            manifest
                .features
                .insert(FeatureName::new(feature), group);
        }

        Ok(manifest)
    }
}

fn parse_group(
    table: &toml::value::Table,
    file: &str,
    registry: &SourceRegistry,
    base: Option<&Path>,
) -> Result<Vec<PackageRange>, SolveError> {
    table
        .iter()
        .map(|(name, value)| parse_dependency(name, value, file, registry, base))
        .collect()
}

/// Parse one dependency entry into a range.
///
/// Accepted shapes: a bare constraint string (hosted, default host), or a
/// table carrying `version`, `features`, and the description.  The source is
/// the explicit `source` key when present, otherwise inferred: `path` means
/// the path source, `git` means the git source, `url` means hosted.
fn parse_dependency(
    name_str: &str,
    value: &toml::Value,
    file: &str,
    registry: &SourceRegistry,
    base: Option<&Path>,
) -> Result<PackageRange, SolveError> {
    if !PackageName::is_valid(name_str) {
        return Err(ParseError::Manifest {
            file: file.to_string(),
            message: format!("invalid dependency name \"{name_str}\""),
        }
        .into());
    }
    let name = PackageName::new(name_str);
    let parse_constraint = |text: &str| -> Result<VersionConstraint, SolveError> {
        VersionConstraint::parse(text)
            .map_err(|e| {
                ParseError::Constraint {
                    file: file.to_string(),
                    name: name.clone(),
                    message: e.to_string(),
                }
                .into()
            })
    };

    match value {
        toml::Value::String(constraint) => {
            let constraint = parse_constraint(constraint)?;
            let source = registry.get(&SourceName::new("hosted"))?;
            Ok(source.parse_ref(&name, None)?.with_constraint(constraint))
        }
        toml::Value::Table(table) => {
            let constraint = match table.get("version") {
                None => VersionConstraint::any(),
                Some(toml::Value::String(text)) => parse_constraint(text)?,
                Some(other) => {
                    return Err(ParseError::Manifest {
                        file: file.to_string(),
                        message: format!(
                            "\"version\" of dependency \"{name}\" must be a string, got {other}"
                        ),
                    }
                    .into())
                }
            };

            let mut features = Vec::new();
            if let Some(value) = table.get("features") {
                match value {
                    toml::Value::Array(entries) => {
                        for entry in entries {
                            match entry {
                                toml::Value::String(f) => features.push(FeatureName::new(f)),
                                other => {
                                    return Err(ParseError::Manifest {
                                        file: file.to_string(),
                                        message: format!(
                                            "features of dependency \"{name}\" must be strings, got {other}"
                                        ),
                                    }
                                    .into())
                                }
                            }
                        }
                    }
                    other => {
                        return Err(ParseError::Manifest {
                            file: file.to_string(),
                            message: format!(
                                "\"features\" of dependency \"{name}\" must be an array, got {other}"
                            ),
                        }
                        .into())
                    }
                }
            }

            let source_name = match table.get("source") {
                Some(toml::Value::String(s)) => SourceName::new(s),
                Some(other) => {
                    return Err(ParseError::Manifest {
                        file: file.to_string(),
                        message: format!(
                            "\"source\" of dependency \"{name}\" must be a string, got {other}"
                        ),
                    }
                    .into())
                }
                None if table.contains_key("path") => SourceName::new("path"),
                None if table.contains_key("git") => SourceName::new("git"),
                None => SourceName::new("hosted"),
            };

            let description = description_table(&name, &source_name, table, file, base)?;
            let source = registry.get(&source_name)?;
            let target = source.parse_ref(&name, description.as_ref())?;
            Ok(target
                .with_constraint(constraint)
                .with_features(features))
        }
        other => Err(ParseError::Manifest {
            file: file.to_string(),
            message: format!("dependency \"{name}\" must be a string or a table, got {other}"),
        }
        .into()),
    }
}

/// Strip the range-level keys from a dependency table, leaving the raw
/// description for the source.  Rewrites the `git` shorthand to `url` and
/// anchors relative paths at `base`.
fn description_table(
    name: &PackageName,
    source_name: &SourceName,
    table: &toml::value::Table,
    file: &str,
    base: Option<&Path>,
) -> Result<Option<toml::Value>, SolveError> {
    let mut description = toml::value::Table::new();
    for (key, value) in table {
        match key.as_str() {
            "version" | "source" | "features" => {}
            "git" => {
                description.insert("url".to_string(), value.clone());
            }
            "path" => {
                let raw = match value {
                    toml::Value::String(p) => p,
                    other => {
                        return Err(ParseError::Manifest {
                            file: file.to_string(),
                            message: format!(
                                "\"path\" of dependency \"{name}\" must be a string, got {other}"
                            ),
                        }
                        .into())
                    }
                };
                // A git dependency's `path` points inside the repository and
                // stays relative; a path dependency is anchored at the
                // declaring manifest's directory.
                let anchored = if source_name == "path" {
                    let Some(base) = base else {
                        return Err(ParseError::Manifest {
                            file: file.to_string(),
                            message: format!(
                                "path dependency \"{name}\" is not allowed here: \
                                 the declaring manifest has no directory"
                            ),
                        }
                        .into());
                    };
                    base.join(raw).display().to_string()
                } else {
                    raw.clone()
                };
                description.insert("path".to_string(), toml::Value::String(anchored));
            }
            _ => {
                description.insert(key.clone(), value.clone());
            }
        }
    }
    if description.is_empty() {
        Ok(None)
    } else {
        Ok(Some(toml::Value::Table(description)))
    }
}
