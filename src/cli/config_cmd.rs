// Copyright 2024-2026 MinerHub CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, validate.

use crate::config::{self, EffectiveConfig};

/// Print effective config as key-value pairs, or JSON with `json = true`.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Validate configuration. Returns 0 if valid, 2 on configuration errors.
pub fn run_validate() -> i32 {
    let env = config::load();
    let problems = env.validate();
    if problems.is_empty() {
        println!("Configuration is valid.");
        return 0;
    }
    for problem in &problems {
        eprintln!("ERROR: {problem}");
    }
    2
}

fn print_config(cfg: &EffectiveConfig) {
    println!("MINERHUB_ROOT={}", cfg.root);
    println!("MINERHUB_APP_VERSION={}", cfg.app_version);
    println!("MINERHUB_AUTO_UPDATE={}", cfg.auto_update);
    println!("MINERHUB_AUTO_INSTALL_DISCOVERED={}", cfg.auto_install_discovered);
    println!("MINERHUB_CATALOG_REFRESH_SECS={}", cfg.catalog_refresh_secs);
    println!("MINERHUB_CATALOG_URL={}", cfg.catalog_url);
    println!("MINERHUB_MAX_CONCURRENT_INSTALLS={}", cfg.max_concurrent_installs);
    println!("MINERHUB_RETAIN_VERSIONS={}", cfg.retain_versions);
    println!("MINERHUB_USE_PROFIT_CACHE={}", cfg.use_profit_cache);
    println!("MINERHUB_FORCE_PROFITABLE={}", cfg.force_profitable);
    println!("MINERHUB_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("MINERHUB_HOST_API_VERSION={}", cfg.host_api_version);
}
