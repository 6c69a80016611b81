//! The path source: packages rooted at a local directory.

use crate::error::{ParseError, SourceError};
use crate::ident::{Description, PackageId, PackageRef};
use crate::manifest::Manifest;
use crate::source::{Source, SourceRegistry};
use async_trait::async_trait;
use keel_schema::{PackageName, SourceName, Version, MANIFEST_FILE};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

pub struct PathSource {
    name: SourceName,
}

impl PathSource {
    pub fn new() -> Self {
        Self {
            name: SourceName::new("path"),
        }
    }

    fn parse_description(
        &self,
        name: &PackageName,
        raw: Option<&toml::Value>,
    ) -> Result<Description, ParseError> {
        let bad = |message: String| ParseError::Description {
            source_name: self.name.clone(),
            name: name.clone(),
            message,
        };
        let path = match raw {
            Some(toml::Value::String(path)) => PathBuf::from(path),
            Some(toml::Value::Table(table)) => match table.get("path") {
                Some(toml::Value::String(path)) => PathBuf::from(path),
                Some(other) => return Err(bad(format!("\"path\" must be a string, got {other}"))),
                None => return Err(bad("missing \"path\"".to_string())),
            },
            Some(other) => return Err(bad(format!("expected a directory path, got {other}"))),
            None => return Err(bad("a path dependency needs a directory".to_string())),
        };
        Ok(Description::Path {
            path: clean_path(&path),
        })
    }

    fn dir_of<'a>(&self, target: &'a PackageRef) -> &'a Path {
        match target.description() {
            Some(Description::Path { path }) => path,
            _ => unreachable!("path source asked about a non-path ref"),
        }
    }

    async fn manifest_for(
        &self,
        registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<Manifest, SourceError> {
        let dir = self.dir_of(target);
        let manifest = Manifest::load(&dir.join(MANIFEST_FILE), registry)
            .await
            .map_err(|e| SourceError::BadManifest {
                source_name: self.name.clone(),
                source: Box::new(e),
            })?;
        if manifest.name() != target.name() {
            return Err(SourceError::Parse(ParseError::Manifest {
                file: dir.join(MANIFEST_FILE).display().to_string(),
                message: format!(
                    "expected package \"{}\", found \"{}\"",
                    target.name(),
                    manifest.name()
                ),
            }));
        }
        Ok(manifest)
    }
}

impl Default for PathSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for PathSource {
    fn name(&self) -> &SourceName {
        &self.name
    }

    fn parse_ref(
        &self,
        name: &PackageName,
        raw: Option<&toml::Value>,
    ) -> Result<PackageRef, ParseError> {
        Ok(PackageRef::sourced(
            name.clone(),
            self.name.clone(),
            self.parse_description(name, raw)?,
        ))
    }

    fn parse_id(
        &self,
        name: &PackageName,
        version: Version,
        raw: Option<&toml::Value>,
    ) -> Result<PackageId, ParseError> {
        Ok(self.parse_ref(name, raw)?.at_version(version))
    }

    fn descriptions_equal(&self, a: &toml::Value, b: &toml::Value) -> bool {
        let probe = PackageName::new("-");
        match (
            self.parse_description(&probe, Some(a)),
            self.parse_description(&probe, Some(b)),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn hash_description(&self, raw: &toml::Value) -> u64 {
        let probe = PackageName::new("-");
        let mut hasher = DefaultHasher::new();
        match self.parse_description(&probe, Some(raw)) {
            Ok(description) => description.hash(&mut hasher),
            Err(_) => raw.to_string().hash(&mut hasher),
        }
        hasher.finish()
    }

    async fn list_versions(
        &self,
        registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<Vec<PackageId>, SourceError> {
        let manifest = self.manifest_for(registry, target).await?;
        Ok(vec![target.at_version(manifest.version().clone())])
    }

    async fn describe_dependencies(
        &self,
        registry: &SourceRegistry,
        id: &PackageId,
    ) -> Result<Manifest, SourceError> {
        self.manifest_for(registry, id.to_ref()).await
    }

    async fn materialize(&self, id: &PackageId) -> Result<PathBuf, SourceError> {
        Ok(self.dir_of(id.to_ref()).to_path_buf())
    }
}

/// Lexically clean a path: drop `.` components and fold `..` into the
/// preceding component where one exists.  No filesystem access, so two
/// spellings of the same directory compare equal without requiring it to
/// exist yet.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
