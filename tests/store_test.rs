//! On-disk package layout: retention, startup cleanup, missing binaries, runtime start.

mod common;

use common::{online, Download, Harness, MockExtractor, LOADER_EXT};
use minerhub_core::config;
use minerhub_core::plugins::{
    Collaborators, DeviceType, NotificationKind, PackageDescriptor, PackageStore, PluginVersion,
};
use minerhub_core::PluginRuntime;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn v(major: u32, minor: u32) -> PluginVersion {
    PluginVersion::new(major, minor)
}

#[test]
fn test_retention_keeps_newest_by_version_order() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let id = Uuid::new_v4();
    for version in [v(1, 9), v(1, 10), v(2, 0), v(0, 5)] {
        std::fs::create_dir_all(store.bins_dir(id, version)).unwrap();
    }
    std::fs::create_dir_all(store.bins_root(id).join("latest")).unwrap();

    let report = store.retain_recent_versions(&store.bins_root(id), 2);

    assert_eq!(report.kept, vec![v(2, 0), v(1, 10)]);
    assert_eq!(report.removed, vec![v(1, 9), v(0, 5)]);
    assert_eq!(report.skipped, vec!["latest".to_string()]);
    assert!(store.bins_root(id).join("latest").exists());
    assert!(!store.bins_dir(id, v(1, 9)).exists());
}

#[test]
fn test_retention_of_missing_dir_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let report = store.retain_recent_versions(&dir.path().join("nope"), 3);
    assert!(report.kept.is_empty() && report.removed.is_empty());
}

fn seed_bundled(store: &PackageStore, id: Uuid, root_units: usize) {
    for version in [v(1, 0), v(1, 1)] {
        std::fs::create_dir_all(store.bins_dir(id, version)).unwrap();
        std::fs::create_dir_all(store.dlls_dir(id, version)).unwrap();
    }
    let root = store.package_root(id);
    for n in 0..root_units {
        std::fs::write(root.join(format!("unit{n}.{LOADER_EXT}")), b"old").unwrap();
    }
    std::fs::create_dir_all(store.packages_dir()).unwrap();
    std::fs::write(store.packages_dir().join(format!("{id}.zip")), format!("plugin://{id}")).unwrap();
}

#[tokio::test]
async fn test_cleanup_reextracts_bundled_plugin_after_version_change() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let extractor = MockExtractor::default();
    let id = Uuid::new_v4();
    seed_bundled(&store, id, 1);

    store.cleanup_plugins(true, &extractor).await;

    assert!(store.bins_dir(id, v(1, 1)).exists());
    assert!(!store.bins_dir(id, v(1, 0)).exists());
    assert!(store.dlls_dir(id, v(1, 1)).exists());
    assert!(!store.dlls_dir(id, v(1, 0)).exists());
    let units = store.root_loader_units(id);
    assert_eq!(units.len(), 1);
    assert!(units[0].ends_with(format!("{id}.{LOADER_EXT}")));
    assert_eq!(extractor.extracted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cleanup_reextracts_when_root_has_several_units() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let extractor = MockExtractor::default();
    let id = Uuid::new_v4();
    seed_bundled(&store, id, 2);

    store.cleanup_plugins(false, &extractor).await;

    assert_eq!(store.root_loader_units(id).len(), 1);
    assert_eq!(extractor.extracted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cleanup_leaves_settled_package_alone() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let extractor = MockExtractor::default();
    let (bundled, downloaded) = (Uuid::new_v4(), Uuid::new_v4());
    seed_bundled(&store, bundled, 1);
    std::fs::create_dir_all(store.bins_dir(downloaded, v(1, 0))).unwrap();
    std::fs::create_dir_all(store.bins_dir(downloaded, v(1, 1))).unwrap();

    store.cleanup_plugins(false, &extractor).await;

    assert_eq!(extractor.extracted.load(Ordering::SeqCst), 0);
    assert!(store.package_root(bundled).join(format!("unit0.{LOADER_EXT}")).exists());
    assert!(store.bins_dir(downloaded, v(1, 0)).exists());
}

#[test]
fn test_obsolete_and_on_disk_listing() {
    let dir = TempDir::new().unwrap();
    let store = PackageStore::under(dir.path());
    let (kept, obsolete) = (Uuid::new_v4(), Uuid::new_v4());
    std::fs::create_dir_all(store.dlls_dir(kept, v(3, 2))).unwrap();
    std::fs::create_dir_all(store.dlls_dir(kept, v(3, 10))).unwrap();
    std::fs::create_dir_all(store.package_root(obsolete)).unwrap();
    std::fs::create_dir_all(store.plugins_dir().join("not-a-package")).unwrap();

    assert_eq!(store.delete_obsolete(&[obsolete, Uuid::new_v4()]), 1);
    assert_eq!(store.installed_on_disk(), vec![(kept, Some(v(3, 10)))]);
}

#[tokio::test]
async fn test_missing_binaries_restored() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    let descriptor = PackageDescriptor::local(id, "restorable", "tests", v(1, 0));
    h.host.install(descriptor);
    let expected = h.store.bins_dir(id, v(1, 0)).join("miner.bin");
    h.host.require_binaries(id, vec![expected.clone()], vec![format!("miner://{id}")]);

    let restored = h.manager.download_missing_binaries(&CancellationToken::new()).await;

    assert_eq!(restored, 1);
    assert!(expected.exists());
    assert!(h.notifier.notifications.lock().is_empty());
}

#[tokio::test]
async fn test_missing_binaries_notify_when_unrecoverable() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    h.host.install(PackageDescriptor::local(id, "broken", "tests", v(1, 0)));
    let expected = h.store.bins_dir(id, v(1, 0)).join("miner.bin");
    h.host.require_binaries(id, vec![expected], vec![format!("miner://{id}")]);
    h.downloader.set(format!("miner://{id}"), Download::Fail);

    let restored = h.manager.download_missing_binaries(&CancellationToken::new()).await;

    assert_eq!(restored, 0);
    let notifications = h.notifier.notifications.lock();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::MissingBinaries);
    assert_eq!(notifications[0].plugin_name, "broken");
}

#[tokio::test]
async fn test_runtime_start_seeds_catalog_from_bundled_file() {
    let h = Harness::new();
    let mut config = config::load();
    config.base_path = h.root().to_path_buf();

    let (bundled, obsolete) = (Uuid::new_v4(), Uuid::new_v4());
    let catalog_path = config.bootstrap_catalog_path();
    std::fs::create_dir_all(catalog_path.parent().unwrap()).unwrap();
    std::fs::write(&catalog_path, serde_json::to_string(&vec![online(bundled, 1, 0)]).unwrap()).unwrap();
    std::fs::create_dir_all(config.plugins_dir().join(obsolete.to_string())).unwrap();

    let collab = Collaborators {
        downloader: h.downloader.clone(),
        extractor: h.extractor.clone(),
        host: h.host.clone(),
        devices: Arc::new(common::MockDevices(vec![DeviceType::Nvidia])),
        notifier: h.notifier.clone(),
        catalog_source: h.source.clone(),
    };
    let runtime = PluginRuntime::new(config, collab, []);
    runtime.start(&[obsolete]).await;

    let entry = runtime.catalog.get(&bundled).unwrap();
    assert!(!entry.installed);
    assert_eq!(entry.online_version(), Some(v(1, 0)));
    assert_eq!(entry.online_supported_device_count, 1);
    assert!(!runtime.config.plugins_dir().join(obsolete.to_string()).exists());

    h.source.go_offline();
    assert!(runtime.manager.refresh_online_catalog().await);
    runtime.shutdown();
    assert!(runtime.shutdown_token().is_cancelled());
}
