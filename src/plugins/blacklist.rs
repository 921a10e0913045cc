//! Packages the user removed and that must not come back on their own.

use dashmap::DashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Persisted set of user-removed package identities.
///
/// Blacklisted packages are reported as unsupported, which keeps the
/// scheduler from auto-installing them again.
#[derive(Debug, Default)]
pub struct Blacklist {
    ids: DashSet<Uuid>,
    path: Option<PathBuf>,
}

impl Blacklist {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or unreadable file yields an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = DashSet::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<Uuid>>(&content) {
                Ok(list) => {
                    for id in list {
                        ids.insert(id);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring corrupt blacklist"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read blacklist"),
        }
        Self { ids, path: Some(path) }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    pub fn add(&self, id: Uuid) {
        if self.ids.insert(id) {
            self.persist();
        }
    }

    pub fn remove(&self, id: &Uuid) {
        if self.ids.remove(id).is_some() {
            self.persist();
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.ids.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let result = serde_json::to_string_pretty(&self.ids())
            .map_err(std::io::Error::from)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)
            });
        match result {
            Ok(()) => debug!(path = %path.display(), "blacklist saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save blacklist"),
        }
    }
}
