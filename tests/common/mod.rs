//! Mock collaborators and a wired manager for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use minerhub_core::plugins::{
    ArchiveExtractor, Blacklist, CapabilityError, CatalogPolicy, CatalogSource, Collaborators,
    DeviceProvider, DeviceRestarter, DeviceType, LoadedPlugin, ManagerConfig, Notification,
    Notifier, PackageCatalog, PackageDescriptor, PackageDownloader, PackageStore, PercentFn,
    PipelineStage, PluginHost, PluginManager, PluginVersion, ProgressSink,
};

pub const LOADER_EXT: &str = std::env::consts::DLL_EXTENSION;

/// Online descriptor with mock URLs derived from the id.
pub fn online(id: Uuid, major: u32, minor: u32) -> PackageDescriptor {
    let mut d = PackageDescriptor {
        id,
        name: format!("miner-{}", &id.to_string()[..8]),
        version: PluginVersion::new(major, minor),
        plugin_package_url: format!("plugin://{id}"),
        miner_package_url: format!("miner://{id}"),
        ..Default::default()
    };
    d.supported_devices_algorithms.insert("NVIDIA".into(), vec!["KAWPOW".into()]);
    d
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Download {
    Ok,
    Fail,
    /// Cancel the token, then return the archive anyway.
    CancelAfter,
    /// Wait until cancelled, then fail.
    Block,
    /// Wait for [`MockDownloader::open_gate`], then succeed.
    Gated,
}

pub struct MockDownloader {
    behavior: Mutex<HashMap<String, Download>>,
    gate: tokio::sync::Semaphore,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(HashMap::new()),
            gate: tokio::sync::Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockDownloader {
    /// Let `n` gated downloads through.
    pub fn open_gate(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn set(&self, url: impl Into<String>, behavior: Download) {
        self.behavior.lock().insert(url.into(), behavior);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PackageDownloader for MockDownloader {
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_stem: &str,
        progress: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, CapabilityError> {
        self.calls.lock().push(url.to_string());
        let behavior = self.behavior.lock().get(url).copied().unwrap_or(Download::Ok);
        match behavior {
            Download::Fail => return Err(CapabilityError::new("download", format!("404 {url}"))),
            Download::Block => {
                cancel.cancelled().await;
                return Err(CapabilityError::new("download", "cancelled"));
            }
            Download::Gated => {
                tokio::select! {
                    permit = self.gate.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                    }
                    () = cancel.cancelled() => {
                        return Err(CapabilityError::new("download", "cancelled"));
                    }
                }
            }
            Download::Ok | Download::CancelAfter => {}
        }
        progress(50);
        let archive = dest_dir.join(format!("{file_stem}.zip"));
        std::fs::write(&archive, url).map_err(|e| CapabilityError::new("download", e.to_string()))?;
        progress(100);
        if behavior == Download::CancelAfter {
            cancel.cancel();
        }
        Ok(archive)
    }
}

/// Extracts "archives" written by [`MockDownloader`].
///
/// Plugin archives produce `<uuid>.<loader ext>` plus `settings.json`; miner
/// archives produce `miner.bin`. The uuid is taken from the destination path.
#[derive(Default)]
pub struct MockExtractor {
    failing: Mutex<HashSet<String>>,
    pub extracted: AtomicUsize,
}

impl MockExtractor {
    pub fn fail_for(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }
}

fn package_id_from(dest: &Path) -> Option<String> {
    // plugins/<uuid>/{dlls,bins}/<ver> or plugins/<uuid>
    dest.ancestors()
        .filter_map(|p| p.file_name()?.to_str())
        .find(|name| Uuid::parse_str(name).is_ok())
        .map(str::to_string)
}

#[async_trait]
impl ArchiveExtractor for MockExtractor {
    async fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        progress: &PercentFn<'_>,
        _cancel: &CancellationToken,
    ) -> Result<(), CapabilityError> {
        let url = std::fs::read_to_string(archive).unwrap_or_default();
        if self.failing.lock().contains(&url) {
            std::fs::write(dest_dir.join("partial.bin"), b"x").ok();
            return Err(CapabilityError::new("extract", "corrupt archive"));
        }
        let io = |e: std::io::Error| CapabilityError::new("extract", e.to_string());
        let is_plugin = archive
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| !n.starts_with("miner_bins"));
        if is_plugin {
            let id = package_id_from(dest_dir).unwrap_or_else(|| "plugin".into());
            std::fs::write(dest_dir.join(format!("{id}.{LOADER_EXT}")), b"unit").map_err(io)?;
            std::fs::write(dest_dir.join("settings.json"), b"{}").map_err(io)?;
        } else {
            std::fs::write(dest_dir.join("miner.bin"), b"miner").map_err(io)?;
        }
        progress(100);
        self.extracted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type CrossReferenceHook = Arc<dyn Fn(Uuid) + Send + Sync>;

#[derive(Default)]
pub struct MockHost {
    installed: Mutex<HashMap<Uuid, PackageDescriptor>>,
    registered: Mutex<HashMap<Uuid, LoadedPlugin>>,
    init_failures: Mutex<HashSet<Uuid>>,
    required_bins: Mutex<HashMap<Uuid, Vec<PathBuf>>>,
    bin_urls: Mutex<HashMap<Uuid, Vec<String>>>,
    pub load_nothing: Mutex<bool>,
    pub activated: Mutex<Vec<Uuid>>,
    pub unloaded: Mutex<Vec<Uuid>>,
    pub algorithms_removed: Mutex<Vec<Uuid>>,
    cross_reference_hook: Mutex<Option<CrossReferenceHook>>,
}

impl MockHost {
    pub fn install(&self, descriptor: PackageDescriptor) {
        self.installed.lock().insert(descriptor.id, descriptor);
    }

    pub fn fail_init(&self, id: Uuid) {
        self.init_failures.lock().insert(id);
    }

    /// Files `id` needs on disk, and where to fetch them from.
    pub fn require_binaries(&self, id: Uuid, files: Vec<PathBuf>, urls: Vec<String>) {
        self.required_bins.lock().insert(id, files);
        self.bin_urls.lock().insert(id, urls);
    }

    pub fn installed_version(&self, id: &Uuid) -> Option<PluginVersion> {
        self.installed.lock().get(id).map(|d| d.version)
    }

    pub fn activated(&self) -> Vec<Uuid> {
        self.activated.lock().clone()
    }

    /// Run `hook` while device compatibility is re-evaluated.
    pub fn on_cross_reference(&self, hook: impl Fn(Uuid) + Send + Sync + 'static) {
        *self.cross_reference_hook.lock() = Some(Arc::new(hook));
    }
}

#[async_trait]
impl PluginHost for MockHost {
    fn load_plugins(&self, dir: &Path) -> Vec<LoadedPlugin> {
        if *self.load_nothing.lock() {
            return Vec::new();
        }
        let version = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<PluginVersion>().ok())
            .unwrap_or_default();
        let Ok(read) = std::fs::read_dir(dir) else { return Vec::new() };
        read.flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(LOADER_EXT))
            .filter_map(|p| {
                let id = Uuid::parse_str(p.file_stem()?.to_str()?).ok()?;
                Some(LoadedPlugin {
                    id,
                    name: format!("miner-{}", &id.to_string()[..8]),
                    author: "tests".into(),
                    version,
                    unit_path: p,
                })
            })
            .collect()
    }

    fn unload(&self, id: Uuid) {
        self.unloaded.lock().push(id);
        self.installed.lock().remove(&id);
    }

    fn register(&self, plugin: &LoadedPlugin) {
        self.registered.lock().insert(plugin.id, plugin.clone());
    }

    fn initialize(&self, id: Uuid) -> Result<(), CapabilityError> {
        if self.init_failures.lock().contains(&id) {
            return Err(CapabilityError::new("initialize", "plugin rejected host"));
        }
        if let Some(plugin) = self.registered.lock().get(&id) {
            self.installed.lock().insert(id, plugin.descriptor());
        }
        Ok(())
    }

    fn activate_algorithms(&self, id: Uuid) {
        self.activated.lock().push(id);
    }

    fn remove_algorithms(&self, id: Uuid) {
        self.algorithms_removed.lock().push(id);
    }

    async fn cross_reference_devices(&self, id: Uuid) {
        let hook = self.cross_reference_hook.lock().clone();
        if let Some(hook) = hook {
            hook(id);
        }
    }

    fn installed(&self) -> Vec<PackageDescriptor> {
        self.installed.lock().values().cloned().collect()
    }

    fn missing_binary_files(&self, id: Uuid) -> Vec<String> {
        self.required_bins
            .lock()
            .get(&id)
            .map(|files| {
                files.iter().filter(|f| !f.exists()).map(|f| f.display().to_string()).collect()
            })
            .unwrap_or_default()
    }

    fn binary_package_urls(&self, id: Uuid) -> Vec<String> {
        self.bin_urls.lock().get(&id).cloned().unwrap_or_default()
    }
}

pub struct MockDevices(pub Vec<DeviceType>);

impl DeviceProvider for MockDevices {
    fn device_types(&self) -> Vec<DeviceType> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

#[derive(Default)]
pub struct MockCatalogSource {
    catalog: Mutex<Option<Vec<PackageDescriptor>>>,
    stalled: AtomicBool,
    pub fetches: AtomicUsize,
}

impl MockCatalogSource {
    pub fn publish(&self, descriptors: Vec<PackageDescriptor>) {
        *self.catalog.lock() = Some(descriptors);
    }

    pub fn go_offline(&self) {
        *self.catalog.lock() = None;
    }

    /// Make every later fetch hang forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogSource for MockCatalogSource {
    async fn fetch(&self) -> Result<Vec<PackageDescriptor>, CapabilityError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.catalog
            .lock()
            .clone()
            .ok_or_else(|| CapabilityError::new("fetch", "endpoint unreachable"))
    }
}

#[derive(Default)]
pub struct CountingRestarter {
    pub restarts: AtomicUsize,
}

#[async_trait]
impl DeviceRestarter for CountingRestarter {
    async fn restart_active_devices(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(PipelineStage, u8)>>,
}

impl RecordingSink {
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.events.lock().iter().map(|(s, _)| *s).collect()
    }

    pub fn terminal(&self) -> Vec<PipelineStage> {
        self.stages().into_iter().filter(|s| s.is_terminal()).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, stage: PipelineStage, percent: u8) {
        self.events.lock().push((stage, percent));
    }
}

/// Manager wired to mocks over a temporary root.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<PackageStore>,
    pub catalog: Arc<PackageCatalog>,
    pub blacklist: Arc<Blacklist>,
    pub manager: Arc<PluginManager>,
    pub downloader: Arc<MockDownloader>,
    pub extractor: Arc<MockExtractor>,
    pub host: Arc<MockHost>,
    pub notifier: Arc<RecordingNotifier>,
    pub source: Arc<MockCatalogSource>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_retention(3)
    }

    pub fn with_retention(retain_versions: usize) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(PackageStore::under(dir.path()));
        let blacklist = Arc::new(Blacklist::load(dir.path().join("internals/blacklisted_plugins.json")));
        let catalog = Arc::new(PackageCatalog::new(CatalogPolicy::default(), blacklist.clone(), []));
        let downloader = Arc::new(MockDownloader::default());
        let extractor = Arc::new(MockExtractor::default());
        let host = Arc::new(MockHost::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let source = Arc::new(MockCatalogSource::default());
        let collab = Collaborators {
            downloader: downloader.clone(),
            extractor: extractor.clone(),
            host: host.clone(),
            devices: Arc::new(MockDevices(vec![DeviceType::Nvidia, DeviceType::Cpu])),
            notifier: notifier.clone(),
            catalog_source: source.clone(),
        };
        let shutdown = CancellationToken::new();
        let manager = Arc::new(PluginManager::new(
            catalog.clone(),
            store.clone(),
            blacklist.clone(),
            collab,
            ManagerConfig { retain_versions },
            shutdown.clone(),
        ));
        Self {
            dir,
            store,
            catalog,
            blacklist,
            manager,
            downloader,
            extractor,
            host,
            notifier,
            source,
            shutdown,
        }
    }

    /// Publish `online` and reconcile it against the host.
    pub async fn publish(&self, online: Vec<PackageDescriptor>) {
        self.source.publish(online);
        assert!(self.manager.refresh_online_catalog().await);
        self.manager.reconcile();
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
