//! On-disk layout of installed packages.
//!
//! ```text
//! plugins/<uuid>/                  package root (settings + active loader unit)
//! plugins/<uuid>/dlls/<M.m>/       extracted plugin packages
//! plugins/<uuid>/bins/<M.m>/       extracted miner binaries
//! plugins_packages/                bundled package archives
//! internals/                       application state files
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::capabilities::ArchiveExtractor;
use super::descriptor::PluginVersion;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("loader unit has no file name: {0}")]
    InvalidUnit(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Outcome of a retention pass over one version directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub kept: Vec<PluginVersion>,
    pub removed: Vec<PluginVersion>,
    /// Directory names that do not parse as `major.minor`; left untouched.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PackageStore {
    plugins_dir: PathBuf,
    packages_dir: PathBuf,
    internals_dir: PathBuf,
}

impl PackageStore {
    pub fn new(
        plugins_dir: impl Into<PathBuf>,
        packages_dir: impl Into<PathBuf>,
        internals_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            packages_dir: packages_dir.into(),
            internals_dir: internals_dir.into(),
        }
    }

    /// Standard layout below `base`.
    pub fn under(base: &Path) -> Self {
        Self::new(base.join("plugins"), base.join("plugins_packages"), base.join("internals"))
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    pub fn package_root(&self, id: Uuid) -> PathBuf {
        self.plugins_dir.join(id.to_string())
    }

    pub fn dlls_root(&self, id: Uuid) -> PathBuf {
        self.package_root(id).join("dlls")
    }

    pub fn bins_root(&self, id: Uuid) -> PathBuf {
        self.package_root(id).join("bins")
    }

    pub fn dlls_dir(&self, id: Uuid, version: PluginVersion) -> PathBuf {
        self.dlls_root(id).join(version.to_string())
    }

    pub fn bins_dir(&self, id: Uuid, version: PluginVersion) -> PathBuf {
        self.bins_root(id).join(version.to_string())
    }

    /// Clear and recreate `dlls/<ver>` and `bins/<ver>` for a fresh install.
    pub fn prepare_version_dirs(
        &self,
        id: Uuid,
        version: PluginVersion,
    ) -> Result<(PathBuf, PathBuf), StoreError> {
        let dlls = self.dlls_dir(id, version);
        let bins = self.bins_dir(id, version);
        reset_dir(&dlls)?;
        reset_dir(&bins)?;
        Ok((dlls, bins))
    }

    /// Keep the `keep` newest version directories under `dir` and delete the rest.
    ///
    /// A missing directory is not an error. Failures to delete are logged.
    pub fn retain_recent_versions(&self, dir: &Path, keep: usize) -> RetentionReport {
        let mut report = RetentionReport::default();
        let read = match std::fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "cannot scan version directories");
                }
                return report;
            }
        };

        let mut versions: Vec<(PluginVersion, PathBuf)> = Vec::new();
        for entry in read.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match name.parse::<PluginVersion>() {
                Ok(version) => versions.push((version, path)),
                Err(_) => {
                    warn!(dir = %path.display(), "skipping unversioned directory");
                    report.skipped.push(name);
                }
            }
        }

        versions.sort_by(|a, b| b.0.cmp(&a.0));
        for (index, (version, path)) in versions.into_iter().enumerate() {
            if index < keep {
                report.kept.push(version);
                continue;
            }
            remove_dir_logged(&path);
            report.removed.push(version);
        }
        if !report.removed.is_empty() {
            debug!(dir = %dir.display(), removed = ?report.removed, "old versions removed");
        }
        report
    }

    /// Startup maintenance for packages that ship bundled with the application.
    ///
    /// Only the newest extracted version of each bundled package is kept. When
    /// the application version changed, or the package root holds more than
    /// one loader unit, the root units are deleted and the bundled archive is
    /// re-extracted into the package root.
    pub async fn cleanup_plugins(&self, version_changed: bool, extractor: &dyn ArchiveExtractor) {
        let read = match std::fs::read_dir(&self.plugins_dir) {
            Ok(read) => read,
            Err(_) => return,
        };
        for entry in read.flatten() {
            let root = entry.path();
            if !root.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(|s| Uuid::parse_str(s).ok()) else {
                continue;
            };
            let Some(archive) = self.bundled_archive(id) else {
                continue;
            };

            self.retain_recent_versions(&self.bins_root(id), 1);
            self.retain_recent_versions(&self.dlls_root(id), 1);

            let units = self.root_loader_units(id);
            if !version_changed && units.len() <= 1 {
                continue;
            }
            for unit in &units {
                remove_file_logged(unit);
            }
            let cancel = CancellationToken::new();
            match extractor.extract(&archive, &root, &|_: u8| {}, &cancel).await {
                Ok(()) => info!(plugin_id = %id, "bundled plugin re-extracted"),
                Err(e) => warn!(plugin_id = %id, error = %e, "failed to re-extract bundled plugin"),
            }
        }
    }

    /// Delete the package directories of identities that are no longer supported.
    pub fn delete_obsolete(&self, ids: &[Uuid]) -> usize {
        let mut deleted = 0;
        for id in ids {
            let root = self.package_root(*id);
            if root.exists() {
                remove_dir_logged(&root);
                deleted += 1;
            }
        }
        deleted
    }

    /// Copy every `*.json` file from `from` into the package root of `id`.
    ///
    /// Existing files are overwritten. Returns the number of files copied.
    pub fn copy_settings_files(&self, from: &Path, id: Uuid) -> usize {
        let root = self.package_root(id);
        let Ok(read) = std::fs::read_dir(from) else {
            return 0;
        };
        let mut copied = 0;
        for entry in read.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension() != Some(OsStr::new("json")) {
                continue;
            }
            match std::fs::copy(&path, root.join(entry.file_name())) {
                Ok(_) => copied += 1,
                Err(e) => warn!(file = %path.display(), error = %e, "failed to copy settings file"),
            }
        }
        copied
    }

    /// Replace the loader units at the package root with `unit`.
    pub fn promote_loader_unit(&self, id: Uuid, unit: &Path) -> Result<PathBuf, StoreError> {
        let file_name = unit.file_name().ok_or_else(|| StoreError::InvalidUnit(unit.to_path_buf()))?;
        for stale in self.root_loader_units(id) {
            remove_file_logged(&stale);
        }
        let root = self.package_root(id);
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        let dest = root.join(file_name);
        std::fs::copy(unit, &dest).map_err(|e| StoreError::io(unit, e))?;
        Ok(dest)
    }

    /// Loader units sitting directly in the package root.
    pub fn root_loader_units(&self, id: Uuid) -> Vec<PathBuf> {
        let Ok(read) = std::fs::read_dir(self.package_root(id)) else {
            return Vec::new();
        };
        read.flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_loader_unit(path))
            .collect()
    }

    pub fn delete_package(&self, id: Uuid) -> Result<(), StoreError> {
        let root = self.package_root(id);
        match std::fs::remove_dir_all(&root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&root, e)),
        }
    }

    /// Compare `app_version` with the stamp left by the previous run and
    /// rewrite the stamp. A missing stamp counts as a change.
    pub fn version_changed(&self, app_version: &str) -> bool {
        let stamp = self.internals_dir.join("app_version");
        let previous = std::fs::read_to_string(&stamp).ok();
        let changed = previous.as_deref().map(str::trim) != Some(app_version);
        if changed {
            let written = std::fs::create_dir_all(&self.internals_dir)
                .and_then(|()| std::fs::write(&stamp, app_version));
            if let Err(e) = written {
                warn!(path = %stamp.display(), error = %e, "failed to write version stamp");
            }
        }
        changed
    }

    /// Package identities on disk with the newest extracted plugin version.
    pub fn installed_on_disk(&self) -> Vec<(Uuid, Option<PluginVersion>)> {
        let Ok(read) = std::fs::read_dir(&self.plugins_dir) else {
            return Vec::new();
        };
        let mut found: Vec<(Uuid, Option<PluginVersion>)> = read
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| Uuid::parse_str(s).ok()))
            .map(|id| (id, self.newest_version(&self.dlls_root(id))))
            .collect();
        found.sort();
        found
    }

    fn newest_version(&self, dir: &Path) -> Option<PluginVersion> {
        std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<PluginVersion>().ok())
            .max()
    }

    fn bundled_archive(&self, id: Uuid) -> Option<PathBuf> {
        let id = id.to_string();
        std::fs::read_dir(&self.packages_dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| {
                let name = path.file_name().and_then(OsStr::to_str).unwrap_or_default();
                name.contains(&id) && name.ends_with(".zip")
            })
    }
}

/// Whether `path` has the platform's loadable-module extension.
pub fn is_loader_unit(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(std::env::consts::DLL_EXTENSION))
}

/// Remove `path` recursively and recreate it empty.
pub fn reset_dir(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(path, e)),
    }
    std::fs::create_dir_all(path).map_err(|e| StoreError::io(path, e))
}

pub fn remove_dir_logged(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %path.display(), error = %e, "failed to remove directory"),
    }
}

pub fn remove_file_logged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn version_stamp_detects_change() {
        let dir = TempDir::new().unwrap();
        let store = PackageStore::under(dir.path());
        assert!(store.version_changed("1.0"));
        assert!(!store.version_changed("1.0"));
        assert!(store.version_changed("1.1"));
    }

    #[test]
    fn keeps_three_newest() {
        let dir = TempDir::new().unwrap();
        let store = PackageStore::under(dir.path());
        let id = Uuid::new_v4();
        for minor in 0..5 {
            std::fs::create_dir_all(store.bins_dir(id, PluginVersion::new(1, minor))).unwrap();
        }
        let report = store.retain_recent_versions(&store.bins_root(id), 3);
        assert_eq!(report.removed, vec![PluginVersion::new(1, 1), PluginVersion::new(1, 0)]);
        assert!(store.bins_dir(id, PluginVersion::new(1, 2)).exists());
    }

    #[test]
    fn promote_replaces_root_units() {
        let dir = TempDir::new().unwrap();
        let store = PackageStore::under(dir.path());
        let id = Uuid::new_v4();
        let ext = std::env::consts::DLL_EXTENSION;
        let root = store.package_root(id);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(format!("old.{ext}")), b"old").unwrap();

        let dlls = store.dlls_dir(id, PluginVersion::new(1, 0));
        std::fs::create_dir_all(&dlls).unwrap();
        let unit = dlls.join(format!("new.{ext}"));
        std::fs::write(&unit, b"new").unwrap();

        let dest = store.promote_loader_unit(id, &unit).unwrap();
        assert_eq!(store.root_loader_units(id), vec![dest]);
    }

    #[test]
    fn settings_files_are_copied_to_root() {
        let dir = TempDir::new().unwrap();
        let store = PackageStore::under(dir.path());
        let id = Uuid::new_v4();
        let (dlls, _) = store.prepare_version_dirs(id, PluginVersion::new(1, 0)).unwrap();
        std::fs::write(dlls.join("settings.json"), b"{}").unwrap();
        std::fs::write(dlls.join("readme.txt"), b"").unwrap();
        assert_eq!(store.copy_settings_files(&dlls, id), 1);
        assert!(store.package_root(id).join("settings.json").exists());
    }
}
