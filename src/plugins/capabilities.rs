//! Collaborator capabilities the plugin subsystem depends on.
//!
//! Network transfer, archive handling, plugin loading and device management
//! all live outside this crate. The manager only sees these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::descriptor::{DeviceType, PackageDescriptor, PluginVersion};

/// Failure reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct CapabilityError {
    pub operation: &'static str,
    pub message: String,
}

impl CapabilityError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self { operation, message: message.into() }
    }
}

/// Percent-complete callback handed to long-running collaborator calls.
pub type PercentFn<'a> = dyn Fn(u8) + Send + Sync + 'a;

#[async_trait]
pub trait PackageDownloader: Send + Sync {
    /// Download `url` into `dest_dir`, naming the file after `file_stem`.
    ///
    /// Returns the path of the written archive.
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_stem: &str,
        progress: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, CapabilityError>;
}

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        progress: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), CapabilityError>;
}

/// A plugin unit discovered in an extracted package directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlugin {
    pub id: Uuid,
    pub name: String,
    pub author: String,
    pub version: PluginVersion,
    /// Loader unit file that gets promoted to the package root on activation.
    pub unit_path: PathBuf,
}

impl LoadedPlugin {
    pub fn descriptor(&self) -> PackageDescriptor {
        PackageDescriptor::local(self.id, self.name.clone(), self.author.clone(), self.version)
    }
}

/// Loads, registers and activates plugin units.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Discover plugin units in `dir`.
    fn load_plugins(&self, dir: &Path) -> Vec<LoadedPlugin>;

    /// Drop the active instance of `id` and its containers, if any.
    fn unload(&self, id: Uuid);

    fn register(&self, plugin: &LoadedPlugin);

    fn initialize(&self, id: Uuid) -> Result<(), CapabilityError>;

    /// Enable the plugin's algorithms on every known device.
    fn activate_algorithms(&self, id: Uuid);

    fn remove_algorithms(&self, id: Uuid);

    /// Re-evaluate device compatibility for a freshly activated plugin.
    async fn cross_reference_devices(&self, id: Uuid);

    /// Local views of every installed package, built-ins included.
    fn installed(&self) -> Vec<PackageDescriptor>;

    /// Miner binary files the plugin expects but cannot find.
    fn missing_binary_files(&self, _id: Uuid) -> Vec<String> {
        Vec::new()
    }

    /// Locations the plugin itself advertises for its miner binaries.
    fn binary_package_urls(&self, _id: Uuid) -> Vec<String> {
        Vec::new()
    }
}

pub trait DeviceProvider: Send + Sync {
    fn device_types(&self) -> Vec<DeviceType>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    PluginUpdated { success: bool },
    MissingBinaries,
}

/// User-facing notification raised by the plugin subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub plugin_name: String,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn plugin_updated(plugin_name: impl Into<String>, success: bool) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            kind: NotificationKind::PluginUpdated { success },
            created_at: Utc::now(),
        }
    }

    pub fn missing_binaries(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            kind: NotificationKind::MissingBinaries,
            created_at: Utc::now(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::PluginUpdated { success } => tracing::info!(
                plugin = %notification.plugin_name,
                success,
                at = %notification.created_at,
                "plugin update finished"
            ),
            NotificationKind::MissingBinaries => tracing::warn!(
                plugin = %notification.plugin_name,
                at = %notification.created_at,
                "plugin miner binaries are missing"
            ),
        }
    }
}

/// Source of the remote package catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PackageDescriptor>, CapabilityError>;
}

#[async_trait]
pub trait DeviceRestarter: Send + Sync {
    async fn restart_active_devices(&self);
}

/// Bundle of collaborators handed to the manager and pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn PackageDownloader>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub host: Arc<dyn PluginHost>,
    pub devices: Arc<dyn DeviceProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub catalog_source: Arc<dyn CatalogSource>,
}
