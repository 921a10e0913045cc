//! Cross-reference of installed and online packages.
//!
//! Every package identity seen locally or in the online catalog gets one
//! [`CrossReferenceEntry`]. Reconciliation refreshes the views, derives the
//! update flags and republishes the ranked list to subscribers.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::blacklist::Blacklist;
use super::descriptor::{DeviceType, PackageDescriptor, PluginVersion};

/// Host-side inputs to the derived entry flags.
#[derive(Debug, Clone, Copy)]
pub struct CatalogPolicy {
    /// Plugin API version the host speaks. Packages declaring 0 are accepted.
    pub host_api_version: u32,
    /// Auto-update state for packages without an explicit override.
    pub auto_update_default: bool,
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self { host_api_version: 3, auto_update_default: true }
    }
}

/// Local and online views of one package identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossReferenceEntry {
    pub id: Uuid,
    pub local: Option<PackageDescriptor>,
    pub online: Option<PackageDescriptor>,
    pub installed: bool,
    pub has_newer_version: bool,
    pub compatible: bool,
    pub supported: bool,
    pub auto_update_enabled: bool,
    pub online_supported_device_count: usize,
}

impl CrossReferenceEntry {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            local: None,
            online: None,
            installed: false,
            has_newer_version: false,
            compatible: true,
            supported: true,
            auto_update_enabled: true,
            online_supported_device_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.online
            .as_ref()
            .or(self.local.as_ref())
            .map(|d| d.name.as_str())
            .unwrap_or_default()
    }

    pub fn local_version(&self) -> Option<PluginVersion> {
        self.local.as_ref().map(|d| d.version)
    }

    pub fn online_version(&self) -> Option<PluginVersion> {
        self.online.as_ref().map(|d| d.version)
    }

    fn refresh_derived(&mut self, policy: &CatalogPolicy, blacklisted: bool, auto_update: bool) {
        self.installed = self.local.is_some();
        self.has_newer_version = match (self.local_version(), self.online_version()) {
            (Some(local), Some(online)) => online > local,
            _ => false,
        };
        self.compatible = self
            .online
            .as_ref()
            .map(|d| d.api_version == 0 || d.api_version == policy.host_api_version)
            .unwrap_or(true);
        self.supported = !blacklisted;
        self.auto_update_enabled = auto_update;
    }

    fn is_empty(&self) -> bool {
        self.local.is_none() && self.online.is_none()
    }
}

/// Ranking order: updatable first, then by supported device count
/// (descending), then by name.
pub fn rank(entries: &mut [CrossReferenceEntry]) {
    entries.sort_by(|a, b| {
        b.has_newer_version
            .cmp(&a.has_newer_version)
            .then(b.online_supported_device_count.cmp(&a.online_supported_device_count))
            .then_with(|| a.name().cmp(b.name()))
    });
}

pub struct PackageCatalog {
    entries: DashMap<Uuid, CrossReferenceEntry>,
    builtin: HashSet<Uuid>,
    auto_update: DashMap<Uuid, bool>,
    blacklist: Arc<Blacklist>,
    policy: CatalogPolicy,
    ranked_tx: watch::Sender<Vec<CrossReferenceEntry>>,
    reconcile_lock: Mutex<()>,
}

impl PackageCatalog {
    /// `builtin` lists identities that ship with the application; they are
    /// tracked but never ranked.
    pub fn new(
        policy: CatalogPolicy,
        blacklist: Arc<Blacklist>,
        builtin: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        let (ranked_tx, _) = watch::channel(Vec::new());
        Self {
            entries: DashMap::new(),
            builtin: builtin.into_iter().collect(),
            auto_update: DashMap::new(),
            blacklist,
            policy,
            ranked_tx,
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Merge the installed and online views into the entry set.
    ///
    /// `online = None` keeps the previously known online views. Views that
    /// disappeared from the inputs are cleared and entries left with neither
    /// view are dropped. Returns a snapshot of all entries.
    pub fn reconcile(
        &self,
        installed: &[PackageDescriptor],
        online: Option<&[PackageDescriptor]>,
        devices: &[DeviceType],
    ) -> Vec<CrossReferenceEntry> {
        let _guard = self.reconcile_lock.lock();

        let installed_ids: HashSet<Uuid> = installed.iter().map(|d| d.id).collect();
        for descriptor in installed {
            self.entries
                .entry(descriptor.id)
                .or_insert_with(|| CrossReferenceEntry::new(descriptor.id))
                .local = Some(descriptor.clone());
        }

        if let Some(online) = online {
            let online_ids: HashSet<Uuid> = online.iter().map(|d| d.id).collect();
            for descriptor in online {
                self.entries
                    .entry(descriptor.id)
                    .or_insert_with(|| CrossReferenceEntry::new(descriptor.id))
                    .online = Some(descriptor.clone());
            }
            for mut entry in self.entries.iter_mut() {
                if !online_ids.contains(entry.key()) {
                    entry.online = None;
                }
            }
        }

        for mut entry in self.entries.iter_mut() {
            if !installed_ids.contains(entry.key()) {
                entry.local = None;
            }
            entry.online_supported_device_count = entry
                .online
                .as_ref()
                .map(|d| d.supported_device_count(devices))
                .unwrap_or(0);
            self.refresh_entry(&mut entry);
        }
        self.entries.retain(|_, entry| !entry.is_empty());

        debug!(entries = self.entries.len(), "catalog reconciled");
        self.publish_ranked();
        self.entries()
    }

    /// Drop the local view of `id`, removing the entry if nothing remains.
    pub fn clear_local(&self, id: &Uuid) {
        self.entries.remove_if_mut(id, |_, entry| {
            entry.local = None;
            entry.is_empty()
        });
        if let Some(mut entry) = self.entries.get_mut(id) {
            self.refresh_entry(&mut entry);
        }
        self.publish_ranked();
    }

    /// Override auto-update for one package.
    pub fn set_auto_update(&self, id: Uuid, enabled: bool) {
        self.auto_update.insert(id, enabled);
        if let Some(mut entry) = self.entries.get_mut(&id) {
            self.refresh_entry(&mut entry);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<CrossReferenceEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    pub fn entries(&self) -> Vec<CrossReferenceEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_builtin(&self, id: &Uuid) -> bool {
        self.builtin.contains(id)
    }

    /// Entries excluding built-ins, in ranking order.
    pub fn ranked(&self) -> Vec<CrossReferenceEntry> {
        let mut ranked: Vec<CrossReferenceEntry> = self
            .entries
            .iter()
            .filter(|e| !self.builtin.contains(e.key()))
            .map(|e| e.value().clone())
            .collect();
        rank(&mut ranked);
        ranked
    }

    /// Receive the ranked list every time it is republished.
    pub fn subscribe_ranked(&self) -> watch::Receiver<Vec<CrossReferenceEntry>> {
        self.ranked_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn refresh_entry(&self, entry: &mut CrossReferenceEntry) {
        let auto_update = self
            .auto_update
            .get(&entry.id)
            .map(|v| *v)
            .unwrap_or(self.policy.auto_update_default);
        let blacklisted = self.blacklist.contains(&entry.id);
        entry.refresh_derived(&self.policy, blacklisted, auto_update);
    }

    fn publish_ranked(&self) {
        self.ranked_tx.send_replace(self.ranked());
    }
}
