//! MinerHub CORE
//!
//! Lifecycle manager for miner plugin packages plus the profitability
//! registry that drives algorithm selection.
//!
//! # Responsibilities
//!
//! - **Catalog**: cross-reference installed packages with the online catalog
//! - **Install**: download, extract, load and activate packages, with progress
//!   and cancellation per package
//! - **Store**: own the `plugins/` layout and prune old versions
//! - **Scheduler**: refresh the catalog, auto-update, restart devices once a
//!   burst of installs has settled
//! - **Profitability**: per-algorithm paying rates and the stable set
//!
//! # Boundaries
//!
//! Network transfer, archive extraction, plugin loading and device control
//! are collaborators supplied by the embedding application through the
//! traits in [`plugins::capabilities`].

pub mod cli;
pub mod config;
pub mod plugins;
pub mod profitability;
pub mod telemetry;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use config::EnvConfig;
use plugins::{
    spawn_scheduler, Blacklist, Collaborators, DeviceRestarter, PackageCatalog, PackageStore,
    PluginManager,
};
use profitability::ProfitabilityRegistry;

/// Wired plugin subsystem and profitability registry.
pub struct PluginRuntime {
    pub config: EnvConfig,
    pub catalog: Arc<PackageCatalog>,
    pub store: Arc<PackageStore>,
    pub blacklist: Arc<Blacklist>,
    pub manager: Arc<PluginManager>,
    pub profitability: Arc<ProfitabilityRegistry>,
    collab: Collaborators,
    shutdown: CancellationToken,
}

impl PluginRuntime {
    /// `builtin` lists packages that ship with the application.
    pub fn new(
        config: EnvConfig,
        collab: Collaborators,
        builtin: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        telemetry::describe_metrics();
        let shutdown = CancellationToken::new();
        let blacklist = Arc::new(Blacklist::load(config.blacklist_path()));
        let store = Arc::new(PackageStore::new(
            config.plugins_dir(),
            config.packages_dir(),
            config.internals_dir(),
        ));
        let catalog = Arc::new(PackageCatalog::new(
            config.catalog_policy(),
            Arc::clone(&blacklist),
            builtin,
        ));
        let manager = Arc::new(PluginManager::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::clone(&blacklist),
            collab.clone(),
            config.manager_config(),
            shutdown.clone(),
        ));
        let profitability = Arc::new(ProfitabilityRegistry::new(config.profitability_config()));

        Self { config, catalog, store, blacklist, manager, profitability, collab, shutdown }
    }

    /// Startup maintenance and the first reconciliation.
    ///
    /// `obsolete` lists package identities that are no longer supported and
    /// get deleted from disk.
    pub async fn start(&self, obsolete: &[Uuid]) {
        let deleted = self.store.delete_obsolete(obsolete);
        let version_changed = self.store.version_changed(&self.config.app_version);
        self.store.cleanup_plugins(version_changed, self.collab.extractor.as_ref()).await;
        self.manager.load_bootstrap_catalog(&self.config.bootstrap_catalog_path());
        let entries = self.manager.reconcile();
        info!(
            entries = entries.len(),
            obsolete_deleted = deleted,
            version_changed,
            "plugin runtime started"
        );
    }

    pub fn spawn_scheduler(&self, restarter: Arc<dyn DeviceRestarter>) -> JoinHandle<()> {
        spawn_scheduler(
            Arc::clone(&self.manager),
            restarter,
            self.config.scheduler_config(),
        )
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal the scheduler and every running install to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
