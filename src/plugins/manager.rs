//! Plugin manager: the entry point for installs, removals and catalog refreshes.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::blacklist::Blacklist;
use super::capabilities::{Collaborators, Notification};
use super::catalog::{CrossReferenceEntry, PackageCatalog};
use super::descriptor::{load_catalog_file, PackageDescriptor};
use super::lifecycle::{InstallLifecycleState, LifecycleTracker};
use super::pipeline::DownloadInstallPipeline;
use super::progress::{NoopProgress, PipelineStage, ProgressSink};
use super::store::PackageStore;
use super::task::{InstallTask, InstallTaskRegistry};
use super::PluginError;
use crate::telemetry::{self, SpanExt};

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Version directories kept per package under `bins/`.
    pub retain_versions: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { retain_versions: 3 }
    }
}

pub struct PluginManager {
    catalog: Arc<PackageCatalog>,
    store: Arc<PackageStore>,
    blacklist: Arc<Blacklist>,
    tasks: InstallTaskRegistry,
    lifecycle: LifecycleTracker,
    pipeline: DownloadInstallPipeline,
    collab: Collaborators,
    online: RwLock<Option<Vec<PackageDescriptor>>>,
    bootstrap_loaded: AtomicBool,
    shutdown: CancellationToken,
}

impl PluginManager {
    pub fn new(
        catalog: Arc<PackageCatalog>,
        store: Arc<PackageStore>,
        blacklist: Arc<Blacklist>,
        collab: Collaborators,
        config: ManagerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let pipeline = DownloadInstallPipeline::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            collab.clone(),
            config.retain_versions,
        );
        Self {
            catalog,
            store,
            blacklist,
            tasks: InstallTaskRegistry::new(),
            lifecycle: LifecycleTracker::new(),
            pipeline,
            collab,
            online: RwLock::new(None),
            bootstrap_loaded: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn catalog(&self) -> &Arc<PackageCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<PackageStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    pub fn tasks(&self) -> &InstallTaskRegistry {
        &self.tasks
    }

    /// Cancelled on shutdown; every install token is a child of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Seed the online view from the catalog file shipped with the application.
    pub fn load_bootstrap_catalog(&self, path: &Path) -> bool {
        match load_catalog_file(path) {
            Ok(descriptors) => {
                info!(path = %path.display(), packages = descriptors.len(), "bootstrap catalog loaded");
                *self.online.write() = Some(descriptors);
                self.bootstrap_loaded.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no usable bootstrap catalog");
                false
            }
        }
    }

    /// Fetch the online catalog.
    ///
    /// On failure the previous view is kept, and the refresh still counts as
    /// usable when a bootstrap catalog was loaded.
    pub async fn refresh_online_catalog(&self) -> bool {
        match self.collab.catalog_source.fetch().await {
            Ok(descriptors) => {
                info!(packages = descriptors.len(), "online catalog refreshed");
                *self.online.write() = Some(descriptors);
                telemetry::record_catalog_refresh(true);
                true
            }
            Err(e) => {
                error!(error = %e, "online catalog refresh failed");
                telemetry::record_catalog_refresh(false);
                self.bootstrap_loaded.load(Ordering::SeqCst)
            }
        }
    }

    /// Cross-reference installed packages with the last known online catalog.
    pub fn reconcile(&self) -> Vec<CrossReferenceEntry> {
        let online = self.online.read().clone();
        let installed = self.collab.host.installed();
        let devices = self.collab.devices.device_types();
        self.catalog.reconcile(&installed, online.as_deref(), &devices)
    }

    pub fn is_installing(&self, id: &Uuid) -> bool {
        self.tasks.is_active(id)
    }

    /// Download and install the online version of `id`.
    ///
    /// Returns `Canceled` without side effects when an install of the same
    /// package is already running. Otherwise `id` leaves the blacklist, its
    /// lifecycle moves to `InstallOrUpdate` and reaches a terminal state
    /// however the install ends.
    pub async fn download_and_install(
        &self,
        id: Uuid,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> PipelineStage {
        if self.shutdown.is_cancelled() {
            return PipelineStage::Canceled;
        }
        let task = Arc::new(InstallTask::new(id, self.shutdown.child_token()));
        if !self.tasks.try_register(Arc::clone(&task)) {
            warn!(plugin_id = %id, "install already in progress");
            return PipelineStage::Canceled;
        }
        telemetry::record_active_installs(self.tasks.len());
        self.lifecycle.begin(id, InstallLifecycleState::InstallOrUpdate);
        self.blacklist.remove(&id);

        let entry = self.catalog.get(&id);
        let mut guard = InstallGuard {
            manager: self,
            task: Arc::clone(&task),
            name: entry.as_ref().map(|e| e.name().to_string()).unwrap_or_else(|| id.to_string()),
            stage: None,
        };

        if let Some(sink) = progress.or_else(|| self.tasks.fallback_for(&id)) {
            sink.report(PipelineStage::Pending, 0);
            task.subscribe(sink);
        }

        let stage = match entry {
            Some(entry) => self.pipeline.install(&entry, task.cancel_token(), task.as_ref()).await,
            None => {
                warn!(plugin_id = %id, "install requested for unknown package");
                task.report(PipelineStage::FailedUnknown, 0);
                PipelineStage::FailedUnknown
            }
        };
        guard.stage = Some(stage);
        stage
    }

    pub fn try_cancel_install(&self, id: &Uuid) -> bool {
        self.tasks.try_cancel(id)
    }

    pub fn cancel_all_installs(&self) -> usize {
        self.tasks.cancel_all()
    }

    pub fn attach_progress(&self, id: Uuid, sink: Arc<dyn ProgressSink>) {
        self.tasks.attach(id, sink);
    }

    pub fn detach_progress(&self, id: Uuid, sink: &Arc<dyn ProgressSink>) {
        self.tasks.detach(id, sink);
    }

    pub fn fallback_progress(&self, id: &Uuid) -> Option<Arc<dyn ProgressSink>> {
        self.tasks.fallback_for(id)
    }

    /// Uninstall `id` and blacklist it so it is not reinstalled automatically.
    pub fn remove_plugin(&self, id: Uuid, reconcile: bool) -> Result<(), PluginError> {
        let span = telemetry::InstallSpan::removal(&id);
        let _entered = span.enter();
        self.tasks.try_cancel(&id);
        self.lifecycle.begin(id, InstallLifecycleState::Remove);

        let host = &self.collab.host;
        host.unload(id);
        host.remove_algorithms(id);
        let result = self.store.delete_package(id).map_err(PluginError::from);

        let terminal = match &result {
            Ok(()) => {
                self.blacklist.add(id);
                info!(plugin_id = %id, "plugin removed");
                InstallLifecycleState::RemoveSuccess
            }
            Err(e) => {
                error!(plugin_id = %id, error = %e, "plugin removal failed");
                InstallLifecycleState::RemoveFailed
            }
        };
        self.catalog.clear_local(&id);
        if reconcile {
            self.reconcile();
        }
        self.lifecycle.try_update(id, terminal, InstallLifecycleState::Remove);
        telemetry::record_remove_outcome(result.is_ok());
        span.record_result(&result);
        result
    }

    /// Re-download miner binaries for installed packages that lost them.
    ///
    /// Returns the number of packages whose binaries were restored.
    pub async fn download_missing_binaries(&self, cancel: &CancellationToken) -> usize {
        let host = &self.collab.host;
        let mut restored = 0;
        for descriptor in host.installed() {
            if cancel.is_cancelled() {
                break;
            }
            let id = descriptor.id;
            if !self.is_usable(&id) || host.missing_binary_files(id).is_empty() {
                continue;
            }
            let urls = host.binary_package_urls(id);
            if urls.is_empty() {
                continue;
            }
            info!(plugin_id = %id, "restoring missing miner binaries");
            let stage = self
                .pipeline
                .install_binaries(id, descriptor.version, &urls, cancel, &NoopProgress)
                .await;
            if stage == PipelineStage::Canceled {
                break;
            }
            if host.missing_binary_files(id).is_empty() {
                restored += 1;
            } else {
                self.collab.notifier.notify(Notification::missing_binaries(&descriptor.name));
            }
        }
        restored
    }

    /// `"<uuid>-<major>.<minor>"` for every installed, usable package.
    pub fn installed_versions(&self) -> Vec<String> {
        self.collab
            .host
            .installed()
            .into_iter()
            .filter(|d| self.is_usable(&d.id))
            .map(|d| format!("{}-{}", d.id, d.version))
            .collect()
    }

    /// Not blacklisted and not known to be API-incompatible.
    fn is_usable(&self, id: &Uuid) -> bool {
        !self.blacklist.contains(id) && self.catalog.get(id).map_or(true, |e| e.compatible)
    }
}

/// Settles an install however its future ends, including when it is dropped.
struct InstallGuard<'a> {
    manager: &'a PluginManager,
    task: Arc<InstallTask>,
    name: String,
    stage: Option<PipelineStage>,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        let manager = self.manager;
        let id = self.task.id();
        let stage = self.stage.unwrap_or(PipelineStage::Canceled);
        let success = stage == PipelineStage::Success;

        manager.tasks.remove(&self.task);
        self.task.release();

        let terminal = if success {
            InstallLifecycleState::InstallOrUpdateSuccess
        } else {
            InstallLifecycleState::InstallOrUpdateFailed
        };
        manager.lifecycle.try_update(id, terminal, InstallLifecycleState::InstallOrUpdate);
        manager.collab.notifier.notify(Notification::plugin_updated(&self.name, success));
        telemetry::record_install_outcome(stage);
        telemetry::record_active_installs(manager.tasks.len());
    }
}
