//! The git source: packages read from a repository at a fixed revision.
//!
//! Cloning and revision lookup stay behind the [`GitBackend`] boundary.  A
//! git package exposes exactly one version per `(url, reference)` pair: the
//! version its manifest declares at that revision.

use crate::error::{ParseError, SourceError};
use crate::ident::{Description, PackageId, PackageRef};
use crate::manifest::Manifest;
use crate::source::{Source, SourceRegistry};
use async_trait::async_trait;
use keel_schema::{PackageName, SourceName, Version};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// Transport boundary for the git source.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Read the manifest at `path` inside the repository `url` checked out
    /// at `reference`.
    async fn manifest_at(
        &self,
        registry: &SourceRegistry,
        url: &str,
        reference: &str,
        path: &str,
    ) -> Result<Manifest, SourceError>;

    /// Check the repository out at `reference` and return the working
    /// directory.
    async fn checkout(&self, url: &str, reference: &str) -> Result<PathBuf, SourceError>;
}

pub struct GitSource {
    name: SourceName,
    backend: Arc<dyn GitBackend>,
}

impl GitSource {
    pub fn new(backend: Arc<dyn GitBackend>) -> Self {
        Self {
            name: SourceName::new("git"),
            backend,
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

        let (url, reference, path) = match raw {
            Some(toml::Value::String(url)) => (url.clone(), None, None),
            Some(toml::Value::Table(table)) => {
                let url = match table.get("url") {
                    Some(toml::Value::String(url)) => url.clone(),
                    Some(other) => return Err(bad(format!("\"url\" must be a string, got {other}"))),
                    None => return Err(bad("missing \"url\"".to_string())),
                };
                let get_str = |key: &str| -> Result<Option<String>, ParseError> {
                    match table.get(key) {
                        None => Ok(None),
                        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
                        Some(other) => Err(bad(format!("\"{key}\" must be a string, got {other}"))),
                    }
                };
                (url, get_str("ref")?, get_str("path")?)
            }
            Some(other) => return Err(bad(format!("expected a repository URL, got {other}"))),
            None => return Err(bad("a git dependency needs a repository URL".to_string())),
        };

        Ok(Description::Git {
            url: canonical_git_url(&url),
            reference: reference.unwrap_or_else(|| "HEAD".to_string()),
            path: canonical_subpath(path.as_deref().unwrap_or(".")),
        })
    }

    fn location<'a>(&self, target: &'a PackageRef) -> (&'a str, &'a str, &'a str) {
        match target.description() {
            Some(Description::Git {
                url,
                reference,
                path,
            }) => (url, reference, path),
            _ => unreachable!("git source asked about a non-git ref"),
        }
    }

    async fn manifest_for(
        &self,
        registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<Manifest, SourceError> {
        let (url, reference, path) = self.location(target);
        let manifest = self
            .backend
            .manifest_at(registry, url, reference, path)
            .await?;
        if manifest.name() != target.name() {
            return Err(SourceError::Parse(ParseError::Manifest {
                file: format!("{url}#{reference}"),
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

#[async_trait]
impl Source for GitSource {
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
        let (url, reference, path) = self.location(id.to_ref());
        let checkout = self.backend.checkout(url, reference).await?;
        Ok(checkout.join(path))
    }
}

/// Canonical form of a repository URL: trailing slashes stripped, scheme and
/// host lowercased when the URL parses.
fn canonical_git_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.to_string().trim_end_matches('/').to_string(),
        // scp-style remotes (git@host:repo) do not parse as URLs; keep them
        // verbatim minus trailing slashes.
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// Lexically cleaned subdirectory, `.` for the repository root.
fn canonical_subpath(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneCommit {
        manifest: Manifest,
    }

    #[async_trait]
    impl GitBackend for OneCommit {
        async fn manifest_at(
            &self,
            _registry: &SourceRegistry,
            _url: &str,
            _reference: &str,
            _path: &str,
        ) -> Result<Manifest, SourceError> {
            Ok(self.manifest.clone())
        }

        async fn checkout(&self, _url: &str, _reference: &str) -> Result<PathBuf, SourceError> {
            Ok(PathBuf::from("/tmp/checkout"))
        }
    }

    fn raw(url: &str) -> toml::Value {
        let mut table = toml::value::Table::new();
        table.insert("url".to_string(), toml::Value::String(url.to_string()));
        toml::Value::Table(table)
    }

    #[test]
    fn test_defaults_ref_and_path() {
        let source = GitSource::new(Arc::new(OneCommit {
            manifest: Manifest::new(PackageName::new("x"), Version::new(1, 0, 0)),
        }));
        let target = source
            .parse_ref(&PackageName::new("x"), Some(&raw("https://git.example/x")))
            .unwrap();
        assert_eq!(
            target.description(),
            Some(&Description::Git {
                url: "https://git.example/x".to_string(),
                reference: "HEAD".to_string(),
                path: ".".to_string(),
            })
        );
    }

    #[test]
    fn test_url_trailing_slash_ignored() {
        let source = GitSource::new(Arc::new(OneCommit {
            manifest: Manifest::new(PackageName::new("x"), Version::new(1, 0, 0)),
        }));
        assert!(source.descriptions_equal(&raw("https://git.example/x/"), &raw("https://git.example/x")));
        assert!(!source.descriptions_equal(&raw("https://git.example/x"), &raw("https://git.example/y")));
    }

    #[test]
    fn test_subpath_cleaning() {
        assert_eq!(canonical_subpath("./packages//core/"), "packages/core");
        assert_eq!(canonical_subpath("."), ".");
        assert_eq!(canonical_subpath("a/../b"), "b");
    }

    #[tokio::test]
    async fn test_lists_the_single_manifest_version() {
        let source = GitSource::new(Arc::new(OneCommit {
            manifest: Manifest::new(PackageName::new("x"), Version::new(2, 1, 0)),
        }));
        let registry = SourceRegistry::new();
        let target = source
            .parse_ref(&PackageName::new("x"), Some(&raw("https://git.example/x")))
            .unwrap();

        let ids = source.list_versions(&registry, &target).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].version(), &Version::new(2, 1, 0));
    }

    #[tokio::test]
    async fn test_name_mismatch_is_an_error() {
        let source = GitSource::new(Arc::new(OneCommit {
            manifest: Manifest::new(PackageName::new("actual"), Version::new(1, 0, 0)),
        }));
        let registry = SourceRegistry::new();
        let target = source
            .parse_ref(&PackageName::new("expected"), Some(&raw("https://git.example/x")))
            .unwrap();

        assert!(source.list_versions(&registry, &target).await.is_err());
    }
}
