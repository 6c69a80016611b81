//! The sdk source: packages that ship inside an installed SDK.
//!
//! Bundled packages are pinned: each exposes exactly the version found in
//! the installation, so a resolution can only ever pick what the SDK
//! provides.

use crate::error::{ParseError, SourceError};
use crate::ident::{Description, PackageId, PackageRef};
use crate::manifest::Manifest;
use crate::source::{Source, SourceRegistry};
use async_trait::async_trait;
use keel_schema::{PackageName, SourceName, Version};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// The installed SDKs visible to one resolution: for each SDK name, the
/// packages it bundles and where they live.
#[derive(Default, Clone)]
pub struct SdkLayout {
    bundled: HashMap<String, HashMap<PackageName, (PathBuf, Manifest)>>,
}

impl SdkLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bundled package of `sdk` rooted at `dir`.
    pub fn bundle(&mut self, sdk: &str, dir: PathBuf, manifest: Manifest) -> &mut Self {
        self.bundled
            .entry(sdk.to_string())
            .or_default()
            .insert(manifest.name().clone(), (dir, manifest));
        self
    }

    fn find(&self, sdk: &str, name: &PackageName) -> Option<&(PathBuf, Manifest)> {
        self.bundled.get(sdk)?.get(name)
    }
}

pub struct SdkSource {
    name: SourceName,
    layout: SdkLayout,
}

impl SdkSource {
    pub fn new(layout: SdkLayout) -> Self {
        Self {
            name: SourceName::new("sdk"),
            layout,
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
        let sdk = match raw {
            // Bare form: the default SDK.
            None => "keel".to_string(),
            Some(toml::Value::String(sdk)) => sdk.clone(),
            Some(toml::Value::Table(table)) => match table.get("sdk") {
                None => "keel".to_string(),
                Some(toml::Value::String(sdk)) => sdk.clone(),
                Some(other) => return Err(bad(format!("\"sdk\" must be a string, got {other}"))),
            },
            Some(other) => return Err(bad(format!("expected an SDK name, got {other}"))),
        };
        Ok(Description::Sdk { sdk })
    }

    fn bundled_for(&self, target: &PackageRef) -> Option<&(PathBuf, Manifest)> {
        match target.description() {
            Some(Description::Sdk { sdk }) => self.layout.find(sdk, target.name()),
            _ => unreachable!("sdk source asked about a non-sdk ref"),
        }
    }
}

#[async_trait]
impl Source for SdkSource {
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
        Ok(self
            .bundled_for(target)
            .map(|(_, manifest)| vec![target.at_version(manifest.version().clone())])
            .unwrap_or_default())
    }

    async fn describe_dependencies(
        &self,
        _registry: &SourceRegistry,
        id: &PackageId,
    ) -> Result<Manifest, SourceError> {
        self.bundled_for(id.to_ref())
            .map(|(_, manifest)| manifest.clone())
            .ok_or_else(|| SourceError::PackageNotFound {
                source_name: self.name.clone(),
                name: id.name().clone(),
            })
    }

    async fn materialize(&self, id: &PackageId) -> Result<PathBuf, SourceError> {
        self.bundled_for(id.to_ref())
            .map(|(dir, _)| dir.clone())
            .ok_or_else(|| SourceError::PackageNotFound {
                source_name: self.name.clone(),
                name: id.name().clone(),
            })
    }
}
