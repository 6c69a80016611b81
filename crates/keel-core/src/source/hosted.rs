//! The hosted source: packages served by a registry over HTTP.
//!
//! Transport stays behind the [`RegistryClient`] boundary; the in-crate
//! [`MemoryRegistry`] implementation backs tests and offline fixtures.

use crate::error::{ParseError, SourceError};
use crate::ident::{Description, PackageId, PackageRef};
use crate::manifest::Manifest;
use crate::source::{Source, SourceRegistry};
use async_trait::async_trait;
use keel_schema::{PackageName, SourceName, Version};
use std::collections::{BTreeMap, HashMap};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// The registry every bare dependency resolves against.
pub const DEFAULT_HOST: &str = "https://pkg.keel.dev";

/// Transport boundary for the hosted source.
///
/// Implementations may cache; they are called sequentially by a single
/// solver and must surface transport failures as
/// [`SourceError::Unavailable`] — the core never retries.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// All published versions of `name` on `host`, in ascending order.
    async fn versions(&self, host: &str, name: &PackageName) -> Result<Vec<Version>, SourceError>;

    /// The manifest of one published version.
    async fn manifest(
        &self,
        host: &str,
        name: &PackageName,
        version: &Version,
    ) -> Result<Manifest, SourceError>;

    /// Download and unpack a package archive into `dest`.
    async fn fetch(
        &self,
        host: &str,
        name: &PackageName,
        version: &Version,
        dest: &Path,
    ) -> Result<(), SourceError>;
}

/// Packages published to a registry host.
pub struct HostedSource {
    name: SourceName,
    client: std::sync::Arc<dyn RegistryClient>,
    cache_root: PathBuf,
}

impl HostedSource {
    pub fn new(client: std::sync::Arc<dyn RegistryClient>, cache_root: PathBuf) -> Self {
        Self {
            name: SourceName::new("hosted"),
            client,
            cache_root,
        }
    }

    /// A hosted source with no reachable registry; description handling
    /// still works, listing anything yields nothing.
    pub fn offline() -> Self {
        Self::new(std::sync::Arc::new(MemoryRegistry::new()), PathBuf::new())
    }

    fn parse_description(
        &self,
        name: &PackageName,
        raw: Option<&toml::Value>,
    ) -> Result<Description, ParseError> {
        let url = match raw {
            None => DEFAULT_HOST.to_string(),
            Some(toml::Value::String(url)) => url.clone(),
            Some(toml::Value::Table(table)) => match table.get("url") {
                None => DEFAULT_HOST.to_string(),
                Some(toml::Value::String(url)) => url.clone(),
                Some(other) => {
                    return Err(self.bad_description(name, format!("\"url\" must be a string, got {other}")))
                }
            },
            Some(other) => {
                return Err(self.bad_description(name, format!("expected a URL, got {other}")))
            }
        };
        Ok(Description::Hosted {
            url: canonical_url(&url).map_err(|message| self.bad_description(name, message))?,
        })
    }

    fn bad_description(&self, name: &PackageName, message: String) -> ParseError {
        ParseError::Description {
            source_name: self.name.clone(),
            name: name.clone(),
            message,
        }
    }

    fn host_of<'a>(&self, target: &'a PackageRef) -> &'a str {
        match target.description() {
            Some(Description::Hosted { url }) => url,
            _ => unreachable!("hosted source asked about a non-hosted ref"),
        }
    }
}

#[async_trait]
impl Source for HostedSource {
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
        _registry: &SourceRegistry,
        target: &PackageRef,
    ) -> Result<Vec<PackageId>, SourceError> {
        let host = self.host_of(target);
        let mut versions = self.client.versions(host, target.name()).await?;
        // Newest first; the client contract is ascending.
        versions.sort();
        versions.reverse();
        Ok(versions
            .into_iter()
            .map(|v| target.at_version(v))
            .collect())
    }

    async fn describe_dependencies(
        &self,
        _registry: &SourceRegistry,
        id: &PackageId,
    ) -> Result<Manifest, SourceError> {
        let host = self.host_of(id.to_ref());
        let manifest = self.client.manifest(host, id.name(), id.version()).await?;
        if manifest.name() != id.name() {
            return Err(SourceError::Parse(ParseError::Manifest {
                file: format!("{} {} from {host}", id.name(), id.version()),
                message: format!("manifest is for \"{}\"", manifest.name()),
            }));
        }
        Ok(manifest)
    }

    async fn materialize(&self, id: &PackageId) -> Result<PathBuf, SourceError> {
        let host = self.host_of(id.to_ref());
        let dest = self
            .cache_root
            .join("hosted")
            .join(host_slug(host))
            .join(format!("{}-{}", id.name(), id.version()));
        self.client.fetch(host, id.name(), id.version(), &dest).await?;
        Ok(dest)
    }
}

/// Canonical form of a registry URL: parsed, normalized, no trailing slash.
fn canonical_url(raw: &str) -> Result<String, String> {
    let parsed = url::Url::parse(raw).map_err(|e| e.to_string())?;
    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

/// Directory-safe name for a host, e.g. `pkg.keel.dev`.
fn host_slug(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

/// An in-memory registry: manifests published directly into a map.
///
/// Backs the test suite and offline fixtures; the version list it serves is
/// the ascending key order of its map, so the hosted source's newest-first
/// ordering is exercised for real.
#[derive(Default, Clone)]
pub struct MemoryRegistry {
    packages: HashMap<String, HashMap<PackageName, BTreeMap<Version, Manifest>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a manifest to the default host.
    pub fn publish(&mut self, manifest: Manifest) -> &mut Self {
        self.publish_at(DEFAULT_HOST, manifest)
    }

    /// Publish a manifest to a specific host.
    pub fn publish_at(&mut self, host: &str, manifest: Manifest) -> &mut Self {
        let host = canonical_url(host).unwrap_or_else(|_| host.to_string());
        self.packages
            .entry(host)
            .or_default()
            .entry(manifest.name().clone())
            .or_default()
            .insert(manifest.version().clone(), manifest);
        self
    }

    fn lookup(&self, host: &str, name: &PackageName) -> Option<&BTreeMap<Version, Manifest>> {
        self.packages.get(host)?.get(name)
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn versions(&self, host: &str, name: &PackageName) -> Result<Vec<Version>, SourceError> {
        Ok(self
            .lookup(host, name)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn manifest(
        &self,
        host: &str,
        name: &PackageName,
        version: &Version,
    ) -> Result<Manifest, SourceError> {
        self.lookup(host, name)
            .and_then(|versions| versions.get(version))
            .cloned()
            .ok_or_else(|| SourceError::PackageNotFound {
                source_name: SourceName::new("hosted"),
                name: name.clone(),
            })
    }

    async fn fetch(
        &self,
        _host: &str,
        _name: &PackageName,
        _version: &Version,
        dest: &Path,
    ) -> Result<(), SourceError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| SourceError::Unavailable {
                source_name: SourceName::new("hosted"),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted() -> HostedSource {
        HostedSource::offline()
    }

    #[test]
    fn test_bare_dependency_uses_default_host() {
        let target = hosted().parse_ref(&PackageName::new("foo"), None).unwrap();
        assert_eq!(
            target.description(),
            Some(&Description::Hosted {
                url: DEFAULT_HOST.to_string()
            })
        );
    }

    #[test]
    fn test_trailing_slash_is_canonicalized_away() {
        let a = toml::Value::String("https://mirror.example/".to_string());
        let b = toml::Value::String("https://mirror.example".to_string());

        let source = hosted();
        assert!(source.descriptions_equal(&a, &b));
        assert_eq!(source.hash_description(&a), source.hash_description(&b));
    }

    #[test]
    fn test_distinct_hosts_differ() {
        let a = toml::Value::String("https://mirror.example".to_string());
        let b = toml::Value::String("https://other.example".to_string());
        assert!(!hosted().descriptions_equal(&a, &b));
    }

    #[test]
    fn test_rejects_malformed_url() {
        let raw = toml::Value::String("not a url".to_string());
        assert!(hosted().parse_ref(&PackageName::new("foo"), Some(&raw)).is_err());
    }

    #[tokio::test]
    async fn test_memory_registry_lists_newest_first() {
        let mut client = MemoryRegistry::new();
        client.publish(Manifest::new(PackageName::new("foo"), Version::new(1, 0, 0)));
        client.publish(Manifest::new(PackageName::new("foo"), Version::new(1, 1, 0)));
        client.publish(Manifest::new(PackageName::new("foo"), Version::new(0, 9, 0)));

        let source = HostedSource::new(std::sync::Arc::new(client), PathBuf::new());
        let registry = SourceRegistry::new();
        let target = source.parse_ref(&PackageName::new("foo"), None).unwrap();

        let ids = source.list_versions(&registry, &target).await.unwrap();
        let versions: Vec<String> = ids.iter().map(|id| id.version().to_string()).collect();
        assert_eq!(versions, ["1.1.0", "1.0.0", "0.9.0"]);
    }
}
