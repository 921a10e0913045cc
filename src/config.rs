//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `MINERHUB_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MINERHUB_ROOT` | `.` | Base directory holding `plugins/` and `internals/` |
//! | `MINERHUB_APP_VERSION` | crate version | Application version stamped into `internals/` |
//! | `MINERHUB_AUTO_UPDATE` | true | Install newer plugin versions in the background |
//! | `MINERHUB_AUTO_INSTALL_DISCOVERED` | false | Also install compatible packages not yet installed |
//! | `MINERHUB_CATALOG_REFRESH_SECS` | 1800 | Online catalog refresh interval (floor 10) |
//! | `MINERHUB_CATALOG_URL` | empty | Remote catalog endpoint for the fetch collaborator |
//! | `MINERHUB_MAX_CONCURRENT_INSTALLS` | CPU count | Parallel install workers (floor 1) |
//! | `MINERHUB_RETAIN_VERSIONS` | 3 | Binary versions kept per package (floor 1) |
//! | `MINERHUB_USE_PROFIT_CACHE` | true | Persist paying rates between runs |
//! | `MINERHUB_FORCE_PROFITABLE` | false | Report every algorithm as highly profitable |
//! | `MINERHUB_SHUTDOWN_TIMEOUT` | 30 | Seconds to wait for installs on shutdown (floor 1) |
//! | `MINERHUB_HOST_API_VERSION` | 3 | Plugin API version the host speaks |

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugins::{CatalogPolicy, ManagerConfig, SchedulerConfig, UpdatePolicy};
use crate::profitability::ProfitabilityConfig;

const MIN_REFRESH_SECS: u64 = 10;

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub root: String,
    pub app_version: String,
    pub auto_update: bool,
    pub auto_install_discovered: bool,
    pub catalog_refresh_secs: u64,
    pub catalog_url: String,
    pub max_concurrent_installs: usize,
    pub retain_versions: usize,
    pub use_profit_cache: bool,
    pub force_profitable: bool,
    pub shutdown_timeout_secs: u64,
    pub host_api_version: u32,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub base_path: PathBuf,
    pub app_version: String,
    pub auto_update: bool,
    pub auto_install_discovered: bool,
    pub catalog_refresh: Duration,
    pub catalog_url: String,
    pub max_concurrent_installs: usize,
    pub retain_versions: usize,
    pub use_profit_cache: bool,
    pub force_profitable: bool,
    pub shutdown_timeout: Duration,
    pub host_api_version: u32,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    let Ok(val) = std::env::var(key) else { return default };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let refresh_secs = parse_u64("MINERHUB_CATALOG_REFRESH_SECS", 1800).max(MIN_REFRESH_SECS);
    let workers = parse_usize("MINERHUB_MAX_CONCURRENT_INSTALLS", num_cpus::get()).max(1);
    let retain = parse_usize("MINERHUB_RETAIN_VERSIONS", 3).max(1);
    let shutdown_secs = parse_u64("MINERHUB_SHUTDOWN_TIMEOUT", 30).max(1);

    EnvConfig {
        base_path: PathBuf::from(parse_string("MINERHUB_ROOT", ".")),
        app_version: parse_string("MINERHUB_APP_VERSION", env!("CARGO_PKG_VERSION")),
        auto_update: parse_bool("MINERHUB_AUTO_UPDATE", true),
        auto_install_discovered: parse_bool("MINERHUB_AUTO_INSTALL_DISCOVERED", false),
        catalog_refresh: Duration::from_secs(refresh_secs),
        catalog_url: parse_string("MINERHUB_CATALOG_URL", ""),
        max_concurrent_installs: workers,
        retain_versions: retain,
        use_profit_cache: parse_bool("MINERHUB_USE_PROFIT_CACHE", true),
        force_profitable: parse_bool("MINERHUB_FORCE_PROFITABLE", false),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        host_api_version: parse_u32("MINERHUB_HOST_API_VERSION", 3),
    }
}

impl EnvConfig {
    pub fn plugins_dir(&self) -> PathBuf {
        self.base_path.join("plugins")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.base_path.join("plugins_packages")
    }

    pub fn internals_dir(&self) -> PathBuf {
        self.base_path.join("internals")
    }

    /// Local fallback catalog shipped with the application.
    pub fn bootstrap_catalog_path(&self) -> PathBuf {
        self.packages_dir().join("update.json")
    }

    pub fn profit_cache_path(&self) -> PathBuf {
        self.internals_dir().join("cached_profitability.json")
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.internals_dir().join("blacklisted_plugins.json")
    }

    pub fn root(&self) -> &Path {
        &self.base_path
    }

    pub fn catalog_policy(&self) -> CatalogPolicy {
        CatalogPolicy { host_api_version: self.host_api_version, auto_update_default: true }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig { retain_versions: self.retain_versions }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: self.catalog_refresh,
            auto_update: self.auto_update,
            policy: UpdatePolicy { install_discovered: self.auto_install_discovered },
            max_concurrent_installs: self.max_concurrent_installs,
            shutdown_timeout: self.shutdown_timeout,
            ..SchedulerConfig::default()
        }
    }

    pub fn profitability_config(&self) -> ProfitabilityConfig {
        ProfitabilityConfig {
            cache_path: Some(self.profit_cache_path()),
            use_cache: self.use_profit_cache,
            force_override: self.force_profitable,
            ..ProfitabilityConfig::default()
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            root: self.base_path.display().to_string(),
            app_version: self.app_version.clone(),
            auto_update: self.auto_update,
            auto_install_discovered: self.auto_install_discovered,
            catalog_refresh_secs: self.catalog_refresh.as_secs(),
            catalog_url: self.catalog_url.clone(),
            max_concurrent_installs: self.max_concurrent_installs,
            retain_versions: self.retain_versions,
            use_profit_cache: self.use_profit_cache,
            force_profitable: self.force_profitable,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            host_api_version: self.host_api_version,
        }
    }

    /// Problems that make this configuration unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.base_path.exists() && !self.base_path.is_dir() {
            problems.push(format!("MINERHUB_ROOT {} is not a directory", self.base_path.display()));
        }
        if self.app_version.trim().is_empty() {
            problems.push("MINERHUB_APP_VERSION is empty".to_string());
        }
        if self.host_api_version == 0 {
            problems.push("MINERHUB_HOST_API_VERSION must be greater than 0".to_string());
        }
        problems
    }
}
