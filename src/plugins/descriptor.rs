//! Package descriptors and catalog documents.
//!
//! Descriptors arrive from three places: the remote catalog endpoint, the
//! local fallback catalog shipped next to the application, and the plugin
//! host (for packages that are already installed). All three share one schema.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid plugin version: {0:?}")]
pub struct VersionParseError(pub String);

/// Two-component package version, rendered as `major.minor`.
///
/// Ordering is major first, then minor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(default)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
}

impl PluginVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PluginVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VersionParseError(s.to_string());
        let mut parts = s.trim().split('.');
        let major = parts.next().ok_or_else(err)?.parse::<u32>().map_err(|_| err())?;
        let minor = parts.next().ok_or_else(err)?.parse::<u32>().map_err(|_| err())?;
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self { major, minor })
    }
}

/// Kind of mining device attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    Cpu,
    Nvidia,
    Amd,
    Intel,
}

impl DeviceType {
    /// Key used for this device type in `supportedDevicesAlgorithms`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Intel => "INTEL",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package as described by a catalog or by the plugin host.
///
/// Unknown JSON fields are ignored; missing or `null` fields take their
/// default value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDescriptor {
    #[serde(rename = "uuid", deserialize_with = "null_as_default")]
    pub id: Uuid,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author: String,
    #[serde(deserialize_with = "null_as_default")]
    pub version: PluginVersion,
    /// Plugin API version the package was built against (0 = unspecified).
    #[serde(rename = "apiVersion", deserialize_with = "null_as_default")]
    pub api_version: u32,
    #[serde(rename = "pluginPackageURL", deserialize_with = "null_as_default")]
    pub plugin_package_url: String,
    #[serde(rename = "minerPackageURL", deserialize_with = "null_as_default")]
    pub miner_package_url: String,
    /// Alternate locations for the miner binaries, tried after `minerPackageURL`.
    #[serde(rename = "minerPackageMirrorURLs", deserialize_with = "null_as_default")]
    pub miner_package_mirror_urls: Vec<String>,
    #[serde(rename = "supportedDevicesAlgorithms", deserialize_with = "null_as_default")]
    pub supported_devices_algorithms: HashMap<String, Vec<String>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PackageDescriptor {
    /// Local view of an installed package. Installed packages carry no URLs.
    pub fn local(id: Uuid, name: impl Into<String>, author: impl Into<String>, version: PluginVersion) -> Self {
        Self {
            id,
            name: name.into(),
            author: author.into(),
            version,
            ..Default::default()
        }
    }

    /// Candidate URLs for the miner binaries, in the order they should be tried.
    pub fn binary_package_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(1 + self.miner_package_mirror_urls.len());
        let candidates = std::iter::once(&self.miner_package_url).chain(&self.miner_package_mirror_urls);
        for url in candidates {
            if !url.is_empty() && !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Device type keys that list at least one supported algorithm.
    pub fn supported_device_keys(&self) -> impl Iterator<Item = &str> {
        self.supported_devices_algorithms
            .iter()
            .filter(|(_, algorithms)| !algorithms.is_empty())
            .map(|(key, _)| key.as_str())
    }

    pub fn supports_device(&self, device: DeviceType) -> bool {
        self.supported_device_keys()
            .any(|key| key.eq_ignore_ascii_case(device.as_str()))
    }

    /// Number of attached devices this package can drive.
    pub fn supported_device_count(&self, devices: &[DeviceType]) -> usize {
        devices.iter().filter(|d| self.supports_device(**d)).count()
    }
}

/// Parse a catalog document (a JSON array of descriptors).
///
/// A `null` document is an empty catalog. Entries without an identity are dropped.
pub fn parse_catalog(json: &str) -> Result<Vec<PackageDescriptor>, CatalogError> {
    let parsed: Option<Vec<PackageDescriptor>> = serde_json::from_str(json)?;
    let mut descriptors = parsed.unwrap_or_default();
    let before = descriptors.len();
    descriptors.retain(|d| !d.id.is_nil());
    if descriptors.len() != before {
        tracing::warn!(dropped = before - descriptors.len(), "catalog entries without uuid ignored");
    }
    Ok(descriptors)
}

/// Load a catalog document from disk.
pub fn load_catalog_file(path: &Path) -> Result<Vec<PackageDescriptor>, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_and_order() {
        let a: PluginVersion = "1.10".parse().unwrap();
        let b: PluginVersion = "1.9".parse().unwrap();
        assert!(a > b);
        assert_eq!(a.to_string(), "1.10");
        assert!("1".parse::<PluginVersion>().is_err());
        assert!("1.2.3".parse::<PluginVersion>().is_err());
        assert!("v1.2".parse::<PluginVersion>().is_err());
    }

    #[test]
    fn catalog_tolerates_missing_null_and_unknown_fields() {
        let json = r#"[
            {
                "uuid": "e294f620-94eb-11ea-a64d-17be303ea466",
                "name": "GMiner",
                "author": null,
                "version": { "major": 2, "minor": 1 },
                "pluginPackageURL": "https://example.invalid/plugin.zip",
                "supportedDevicesAlgorithms": { "NVIDIA": ["KAWPOW"], "AMD": [] },
                "somethingNew": 42
            },
            { "name": "no identity" }
        ]"#;
        let catalog = parse_catalog(json).unwrap();
        assert_eq!(catalog.len(), 1);
        let d = &catalog[0];
        assert_eq!(d.name, "GMiner");
        assert_eq!(d.author, "");
        assert_eq!(d.version, PluginVersion::new(2, 1));
        assert!(d.miner_package_url.is_empty());
        assert!(d.supports_device(DeviceType::Nvidia));
        assert!(!d.supports_device(DeviceType::Amd));
    }

    #[test]
    fn null_catalog_is_empty() {
        assert!(parse_catalog("null").unwrap().is_empty());
    }

    #[test]
    fn binary_urls_keep_order_and_skip_duplicates() {
        let d = PackageDescriptor {
            miner_package_url: "a".into(),
            miner_package_mirror_urls: vec!["".into(), "b".into(), "a".into()],
            ..Default::default()
        };
        assert_eq!(d.binary_package_urls(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn device_count_counts_devices_not_types() {
        let mut d = PackageDescriptor::default();
        d.supported_devices_algorithms.insert("nvidia".into(), vec!["DaggerHashimoto".into()]);
        let devices = [DeviceType::Nvidia, DeviceType::Nvidia, DeviceType::Cpu];
        assert_eq!(d.supported_device_count(&devices), 2);
    }
}
