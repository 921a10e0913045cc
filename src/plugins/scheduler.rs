//! Background scheduler: periodic catalog refresh, auto-update dispatch and
//! the debounced device restart.

use dashmap::DashSet;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capabilities::DeviceRestarter;
use super::catalog::CrossReferenceEntry;
use super::lifecycle::RestartDebouncer;
use super::manager::PluginManager;
use super::progress::ProgressSink;

pub const TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Which catalog entries the scheduler installs on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdatePolicy {
    /// Also install compatible packages that are not installed yet.
    pub install_discovered: bool,
}

impl UpdatePolicy {
    pub fn is_eligible(&self, entry: &CrossReferenceEntry, installing: bool) -> bool {
        let usable = entry.compatible && entry.supported;
        let can_update = usable && entry.installed && entry.has_newer_version;
        let discovered =
            self.install_discovered && usable && !entry.installed && entry.online.is_some();
        entry.auto_update_enabled && !installing && (can_update || discovered)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub refresh_interval: Duration,
    /// Run the first refresh on the first tick instead of after one interval.
    pub refresh_on_start: bool,
    pub auto_update: bool,
    pub policy: UpdatePolicy,
    pub max_concurrent_installs: usize,
    /// How long shutdown waits for cancelled installs to unwind.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: TICK_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_on_start: false,
            auto_update: true,
            policy: UpdatePolicy::default(),
            max_concurrent_installs: num_cpus::get().max(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Fires at most once per interval.
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration, fire_immediately: bool) -> Self {
        let last = if fire_immediately { None } else { Some(Instant::now()) };
        Self { interval, last }
    }

    /// True when the interval elapsed; the gate then re-arms from now.
    pub fn check_and_mark(&mut self) -> bool {
        let now = Instant::now();
        let due = self.last.map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}

pub struct InstallJob {
    pub id: Uuid,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

/// Bounded pool of install workers fed through a channel.
///
/// A package is queued at most once until its worker starts.
pub struct InstallDispatcher {
    tx: mpsc::UnboundedSender<InstallJob>,
    queued: Arc<DashSet<Uuid>>,
    supervisor: JoinHandle<()>,
}

impl InstallDispatcher {
    pub fn spawn(manager: Arc<PluginManager>, max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(DashSet::new());
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let supervisor = tokio::spawn(supervise(manager, rx, Arc::clone(&queued), permits));
        Self { tx, queued, supervisor }
    }

    pub fn submit(&self, id: Uuid, progress: Option<Arc<dyn ProgressSink>>) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        if self.tx.send(InstallJob { id, progress }).is_err() {
            self.queued.remove(&id);
            return false;
        }
        true
    }

    pub fn is_queued(&self, id: &Uuid) -> bool {
        self.queued.contains(id)
    }

    /// Stop accepting jobs and wait for running installs, aborting after `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        drop(self.tx);
        let mut supervisor = self.supervisor;
        if tokio::time::timeout(timeout, &mut supervisor).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "install workers did not stop in time");
            supervisor.abort();
        }
    }
}

async fn supervise(
    manager: Arc<PluginManager>,
    mut rx: mpsc::UnboundedReceiver<InstallJob>,
    queued: Arc<DashSet<Uuid>>,
    permits: Arc<Semaphore>,
) {
    let mut running: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                let manager = Arc::clone(&manager);
                let queued = Arc::clone(&queued);
                let permits = Arc::clone(&permits);
                running.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else { return };
                    queued.remove(&job.id);
                    let stage = manager.download_and_install(job.id, job.progress).await;
                    debug!(plugin_id = %job.id, %stage, "install worker finished");
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => log_join(joined),
        }
    }
    while let Some(joined) = running.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("install worker panicked");
        }
    }
}

/// Spawn the scheduler loop. It exits when the manager's shutdown token is
/// cancelled, after cancelling every running install.
pub fn spawn_scheduler(
    manager: Arc<PluginManager>,
    restarter: Arc<dyn DeviceRestarter>,
    config: SchedulerConfig,
) -> JoinHandle<()> {
    let shutdown = manager.shutdown_token().clone();
    tokio::spawn(async move {
        scheduler_loop(manager, restarter, config, shutdown).await;
    })
}

struct TickState {
    refresh: IntervalGate,
    restarts: RestartDebouncer,
}

async fn scheduler_loop(
    manager: Arc<PluginManager>,
    restarter: Arc<dyn DeviceRestarter>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) {
    let dispatcher = InstallDispatcher::spawn(Arc::clone(&manager), config.max_concurrent_installs);
    let mut state = TickState {
        refresh: IntervalGate::new(config.refresh_interval, config.refresh_on_start),
        restarts: RestartDebouncer::default(),
    };
    info!(
        refresh_secs = config.refresh_interval.as_secs(),
        workers = config.max_concurrent_installs,
        "plugin scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!("scheduler: shutdown signal received");
                break;
            }
            () = tokio::time::sleep(config.tick) => {}
        }
        let tick = tick(&manager, &restarter, &dispatcher, &config, &mut state, &shutdown);
        if AssertUnwindSafe(tick).catch_unwind().await.is_err() {
            error!("scheduler tick panicked");
        }
    }

    let cancelled = manager.cancel_all_installs();
    if cancelled > 0 {
        info!(cancelled, "cancelled running installs");
    }
    dispatcher.shutdown(config.shutdown_timeout).await;
}

async fn tick(
    manager: &Arc<PluginManager>,
    restarter: &Arc<dyn DeviceRestarter>,
    dispatcher: &InstallDispatcher,
    config: &SchedulerConfig,
    state: &mut TickState,
    shutdown: &CancellationToken,
) {
    if state.refresh.check_and_mark() && config.auto_update {
        let refreshed = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            refreshed = manager.refresh_online_catalog() => refreshed,
        };
        if refreshed {
            dispatch_updates(manager, dispatcher, &config.policy);
        }
    }
    if shutdown.is_cancelled() {
        return;
    }
    if let Some(settled) = state.restarts.tick(manager.lifecycle()) {
        info!(packages = settled.len(), "plugin operations settled, restarting devices");
        let restarter = Arc::clone(restarter);
        tokio::spawn(async move { restarter.restart_active_devices().await });
    }
}

fn dispatch_updates(manager: &PluginManager, dispatcher: &InstallDispatcher, policy: &UpdatePolicy) {
    for entry in manager.reconcile() {
        let installing = manager.is_installing(&entry.id) || dispatcher.is_queued(&entry.id);
        if !policy.is_eligible(&entry, installing) {
            continue;
        }
        if manager.catalog().is_builtin(&entry.id) && !entry.installed {
            continue;
        }
        info!(plugin_id = %entry.id, name = entry.name(), "scheduling plugin update");
        dispatcher.submit(entry.id, manager.fallback_progress(&entry.id));
    }
}
