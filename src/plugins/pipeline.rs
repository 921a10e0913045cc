//! Download/extract/load pipeline for one package.
//!
//! Stages run strictly in order:
//!
//! 1. prepare `dlls/<ver>` and `bins/<ver>`, prune old binary versions
//! 2. download and extract the plugin package
//! 3. download and extract the miner binaries, trying each candidate URL
//! 4. load, initialize and activate the plugin units
//!
//! Cancellation is checked after every blocking step. Anything that stops
//! the pipeline before activation removes the directories it created, so a
//! failed install never leaves a half-populated version behind.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::capabilities::Collaborators;
use super::catalog::{CrossReferenceEntry, PackageCatalog};
use super::descriptor::PluginVersion;
use super::progress::{PipelineStage, ProgressSink};
use super::store::{remove_dir_logged, remove_file_logged, reset_dir, PackageStore, StoreError};
use crate::telemetry::{InstallSpan, SpanExt};

const PLUGIN_ARCHIVE_STEM: &str = "plugin";
const MINER_ARCHIVE_STEM: &str = "miner_bins";

#[derive(Error, Debug)]
enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("package {0} has no online descriptor")]
    MissingOnlineView(Uuid),
}

/// `failure`, unless the token was cancelled, in which case `Canceled`.
fn stopped(cancel: &CancellationToken, failure: PipelineStage) -> PipelineStage {
    if cancel.is_cancelled() {
        PipelineStage::Canceled
    } else {
        failure
    }
}

pub struct DownloadInstallPipeline {
    store: Arc<PackageStore>,
    catalog: Arc<PackageCatalog>,
    collab: Collaborators,
    retain_versions: usize,
}

impl DownloadInstallPipeline {
    pub fn new(
        store: Arc<PackageStore>,
        catalog: Arc<PackageCatalog>,
        collab: Collaborators,
        retain_versions: usize,
    ) -> Self {
        Self { store, catalog, collab, retain_versions: retain_versions.max(1) }
    }

    /// Install the online version of `entry`.
    ///
    /// The terminal stage is reported to `progress` exactly once and returned.
    /// Errors and panics inside the pipeline end in `FailedUnknown`.
    pub async fn install(
        &self,
        entry: &CrossReferenceEntry,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> PipelineStage {
        let span = InstallSpan::new(&entry.id, entry.name());
        let run = AssertUnwindSafe(self.run(entry, cancel, progress)).catch_unwind();
        let stage = match run.instrument(span.clone()).await {
            Ok(Ok(stage)) => stage,
            Ok(Err(e)) => {
                error!(plugin_id = %entry.id, error = %e, "install failed");
                span.record("error.message", e.to_string().as_str());
                stopped(cancel, PipelineStage::FailedUnknown)
            }
            Err(_) => {
                error!(plugin_id = %entry.id, "install panicked");
                stopped(cancel, PipelineStage::FailedUnknown)
            }
        };
        span.record_stage(stage);
        progress.report(stage, 0);
        stage
    }

    async fn run(
        &self,
        entry: &CrossReferenceEntry,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineStage, PipelineError> {
        if cancel.is_cancelled() {
            return Ok(PipelineStage::Canceled);
        }
        let online = entry.online.as_ref().ok_or(PipelineError::MissingOnlineView(entry.id))?;
        let id = entry.id;
        let version = online.version;
        info!(plugin_id = %id, %version, "installing plugin");

        let (dlls_dir, bins_dir) = self.store.prepare_version_dirs(id, version)?;
        self.store.retain_recent_versions(&self.store.bins_root(id), self.retain_versions);
        let discard = || {
            remove_dir_logged(&dlls_dir);
            remove_dir_logged(&bins_dir);
        };

        // Plugin package
        progress.report(PipelineStage::PendingDownloadingPlugin, 0);
        let on_download = |p: u8| progress.report(PipelineStage::DownloadingPlugin, p);
        let archive = match self
            .collab
            .downloader
            .download(&online.plugin_package_url, &dlls_dir, PLUGIN_ARCHIVE_STEM, &on_download, cancel)
            .await
        {
            Ok(archive) => archive,
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "plugin package download failed");
                discard();
                return Ok(stopped(cancel, PipelineStage::FailedDownloadingPlugin));
            }
        };
        if cancel.is_cancelled() {
            remove_file_logged(&archive);
            discard();
            return Ok(PipelineStage::Canceled);
        }

        progress.report(PipelineStage::PendingExtractingPlugin, 0);
        let on_extract = |p: u8| progress.report(PipelineStage::ExtractingPlugin, p);
        let extracted = self.collab.extractor.extract(&archive, &dlls_dir, &on_extract, cancel).await;
        remove_file_logged(&archive);
        if let Err(e) = extracted {
            warn!(plugin_id = %id, error = %e, "plugin package extraction failed");
            discard();
            return Ok(stopped(cancel, PipelineStage::FailedExtractingPlugin));
        }
        if cancel.is_cancelled() {
            discard();
            return Ok(PipelineStage::Canceled);
        }

        // Miner binaries
        let urls = online.binary_package_urls();
        let binaries = self.fetch_binaries(id, &urls, &bins_dir, cancel, progress).await;
        if binaries != PipelineStage::Success {
            discard();
            return Ok(binaries);
        }

        // Load and activate
        let host = &self.collab.host;
        let loaded = host.load_plugins(&dlls_dir);
        if loaded.is_empty() {
            warn!(plugin_id = %id, "no plugin units found in package");
            remove_dir_logged(&dlls_dir);
            return Ok(stopped(cancel, PipelineStage::FailedPluginLoad));
        }

        // The last unit loaded decides the outcome.
        let mut stage = PipelineStage::FailedPluginLoad;
        for plugin in &loaded {
            host.unload(plugin.id);
            host.register(plugin);
            self.store.copy_settings_files(&dlls_dir, id);
            let outcome = match host.initialize(plugin.id) {
                Ok(()) => {
                    let unit = self.store.promote_loader_unit(id, &plugin.unit_path)?;
                    debug!(plugin_id = %plugin.id, unit = %unit.display(), "loader unit promoted");
                    host.activate_algorithms(plugin.id);
                    host.cross_reference_devices(plugin.id).await;
                    PipelineStage::Success
                }
                Err(e) => {
                    error!(plugin_id = %plugin.id, error = %e, "plugin initialization failed");
                    PipelineStage::FailedPluginInit
                }
            };
            stage = stopped(cancel, outcome);
        }

        let devices = self.collab.devices.device_types();
        self.catalog.reconcile(&host.installed(), None, &devices);
        Ok(stopped(cancel, stage))
    }

    /// Re-download the miner binaries of an installed package.
    ///
    /// Reports the terminal stage exactly once and returns it.
    pub async fn install_binaries(
        &self,
        id: Uuid,
        version: PluginVersion,
        urls: &[String],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> PipelineStage {
        let bins_dir = self.store.bins_dir(id, version);
        let stage = match reset_dir(&bins_dir) {
            Ok(()) => {
                let stage = self.fetch_binaries(id, urls, &bins_dir, cancel, progress).await;
                if stage == PipelineStage::Success {
                    self.store.retain_recent_versions(&self.store.bins_root(id), self.retain_versions);
                } else {
                    remove_dir_logged(&bins_dir);
                }
                stage
            }
            Err(e) => {
                error!(plugin_id = %id, error = %e, "cannot prepare binaries directory");
                stopped(cancel, PipelineStage::FailedUnknown)
            }
        };
        progress.report(stage, 0);
        stage
    }

    /// Try each candidate URL until one downloads and extracts.
    ///
    /// Returns `Success`, `Canceled`, or the failure of the last attempt.
    async fn fetch_binaries(
        &self,
        id: Uuid,
        urls: &[String],
        bins_dir: &Path,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> PipelineStage {
        let mut failure = PipelineStage::FailedDownloadingMiner;
        if urls.is_empty() {
            warn!(plugin_id = %id, "package lists no miner binaries");
        }

        for url in urls {
            progress.report(PipelineStage::PendingDownloadingMiner, 0);
            let on_download = |p: u8| progress.report(PipelineStage::DownloadingMiner, p);
            let archive = match self
                .collab
                .downloader
                .download(url, bins_dir, MINER_ARCHIVE_STEM, &on_download, cancel)
                .await
            {
                Ok(archive) => archive,
                Err(e) => {
                    warn!(plugin_id = %id, url = %url, error = %e, "miner download failed");
                    if cancel.is_cancelled() {
                        return PipelineStage::Canceled;
                    }
                    failure = PipelineStage::FailedDownloadingMiner;
                    continue;
                }
            };
            if cancel.is_cancelled() {
                remove_file_logged(&archive);
                return PipelineStage::Canceled;
            }

            progress.report(PipelineStage::PendingExtractingMiner, 0);
            let on_extract = |p: u8| progress.report(PipelineStage::ExtractingMiner, p);
            let extracted = self.collab.extractor.extract(&archive, bins_dir, &on_extract, cancel).await;
            remove_file_logged(&archive);
            if cancel.is_cancelled() {
                return PipelineStage::Canceled;
            }
            match extracted {
                Ok(()) => return PipelineStage::Success,
                Err(e) => {
                    warn!(plugin_id = %id, url = %url, error = %e, "miner extraction failed");
                    failure = PipelineStage::FailedExtractingMiner;
                    if let Err(e) = reset_dir(bins_dir) {
                        warn!(plugin_id = %id, error = %e, "cannot clear partial extraction");
                    }
                }
            }
        }
        failure
    }
}
