//! Miner plugin package lifecycle.
//!
//! Tracks installed and online packages, keeps installs up to date in the
//! background and owns the on-disk package layout.

pub mod blacklist;
pub mod capabilities;
pub mod catalog;
pub mod descriptor;
pub mod lifecycle;
pub mod manager;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod task;

use thiserror::Error;

pub use blacklist::Blacklist;
pub use capabilities::{
    ArchiveExtractor, CapabilityError, CatalogSource, Collaborators, DeviceProvider,
    DeviceRestarter, LoadedPlugin, LogNotifier, Notification, NotificationKind, Notifier,
    PackageDownloader, PercentFn, PluginHost,
};
pub use catalog::{CatalogPolicy, CrossReferenceEntry, PackageCatalog};
pub use descriptor::{
    load_catalog_file, parse_catalog, CatalogError, DeviceType, PackageDescriptor, PluginVersion,
};
pub use lifecycle::{InstallLifecycleState, LifecycleTracker, RestartDebouncer};
pub use manager::{ManagerConfig, PluginManager};
pub use pipeline::DownloadInstallPipeline;
pub use progress::{FnProgress, NoopProgress, PipelineStage, ProgressSink};
pub use scheduler::{spawn_scheduler, InstallDispatcher, IntervalGate, SchedulerConfig, UpdatePolicy};
pub use store::{PackageStore, RetentionReport, StoreError};
pub use task::{InstallTask, InstallTaskRegistry};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("package store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}
