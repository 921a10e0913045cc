// Copyright 2024-2026 MinerHub CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Catalog and retention CLI subcommands.
//!
//! The local view is read from the `plugins/` layout and the online view from
//! the bundled fallback catalog, so both commands work offline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{self, EnvConfig};
use crate::plugins::{
    load_catalog_file, Blacklist, CrossReferenceEntry, PackageCatalog, PackageDescriptor,
    PackageStore,
};

fn store_for(env: &EnvConfig) -> PackageStore {
    PackageStore::new(env.plugins_dir(), env.packages_dir(), env.internals_dir())
}

/// Cross-reference the packages on disk with the bundled catalog.
pub fn build_catalog(env: &EnvConfig) -> Vec<CrossReferenceEntry> {
    let online = match load_catalog_file(&env.bootstrap_catalog_path()) {
        Ok(online) => online,
        Err(e) => {
            tracing::debug!(error = %e, "no bundled catalog");
            Vec::new()
        }
    };
    let names: HashMap<_, _> = online.iter().map(|d| (d.id, d.name.clone())).collect();

    let installed: Vec<PackageDescriptor> = store_for(env)
        .installed_on_disk()
        .into_iter()
        .filter_map(|(id, version)| {
            let name = names.get(&id).cloned().unwrap_or_default();
            version.map(|v| PackageDescriptor::local(id, name, "", v))
        })
        .collect();

    let blacklist = Arc::new(Blacklist::load(env.blacklist_path()));
    let catalog = PackageCatalog::new(env.catalog_policy(), blacklist, []);
    catalog.reconcile(&installed, Some(online.as_slice()), &[]);
    catalog.ranked()
}

/// Print the ranked catalog. Returns the process exit code.
pub fn run_list(json: bool) -> i32 {
    let env = config::load();
    let entries = build_catalog(&env);

    if json {
        let rows: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "uuid": e.id,
                    "name": e.name(),
                    "installed": e.local_version().map(|v| v.to_string()),
                    "online": e.online_version().map(|v| v.to_string()),
                    "hasNewerVersion": e.has_newer_version,
                    "compatible": e.compatible,
                    "supported": e.supported,
                })
            })
            .collect();
        match serde_json::to_string_pretty(&rows) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Failed to serialize catalog: {e}");
                return 1;
            }
        }
        return 0;
    }

    if entries.is_empty() {
        println!("No packages found under {}", env.root().display());
        return 0;
    }
    println!("{:<38} {:<24} {:>9} {:>9}  FLAGS", "UUID", "NAME", "LOCAL", "ONLINE");
    for e in &entries {
        let local = e.local_version().map(|v| v.to_string()).unwrap_or_else(|| "-".into());
        let online = e.online_version().map(|v| v.to_string()).unwrap_or_else(|| "-".into());
        let mut flags = Vec::new();
        if e.has_newer_version {
            flags.push("update");
        }
        if !e.compatible {
            flags.push("incompatible");
        }
        if !e.supported {
            flags.push("removed");
        }
        println!("{:<38} {:<24} {:>9} {:>9}  {}", e.id, e.name(), local, online, flags.join(","));
    }
    0
}

/// Prune `bins/` of every installed package down to `keep` versions.
pub fn run_retain(keep: Option<usize>) -> i32 {
    let env = config::load();
    let keep = keep.unwrap_or(env.retain_versions).max(1);
    let store = store_for(&env);

    let mut removed = 0;
    for (id, _) in store.installed_on_disk() {
        let report = store.retain_recent_versions(&store.bins_root(id), keep);
        for version in &report.removed {
            println!("removed {id} bins/{version}");
        }
        for name in &report.skipped {
            eprintln!("WARNING: skipped {id} bins/{name} (not a version directory)");
        }
        removed += report.removed.len();
    }
    println!("Removed {removed} old version director{}.", if removed == 1 { "y" } else { "ies" });
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginVersion;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_build_catalog_names_local_packages_from_bundled_catalog() {
        let dir = TempDir::new().unwrap();
        let mut env = config::load();
        env.base_path = dir.path().to_path_buf();

        let id = Uuid::new_v4();
        let store = store_for(&env);
        std::fs::create_dir_all(store.dlls_dir(id, PluginVersion::new(1, 0))).unwrap();
        let online = PackageDescriptor {
            id,
            name: "gminer".into(),
            version: PluginVersion::new(1, 2),
            ..Default::default()
        };
        let path = env.bootstrap_catalog_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&vec![online]).unwrap()).unwrap();

        let entries = build_catalog(&env);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "gminer");
        assert_eq!(entries[0].local.as_ref().map(|d| d.name.as_str()), Some("gminer"));
        assert!(entries[0].has_newer_version);
    }
}
