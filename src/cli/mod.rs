// Copyright 2024-2026 MinerHub CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for offline maintenance commands.
//!
//! Every command works directly on the configured root directory; none of
//! them needs a running scheduler.
//!
//! ## Usage
//!
//! ```bash
//! minerhub-core-cli catalog          # Installed packages vs. the bundled catalog
//! minerhub-core-cli retain           # Prune old binary versions
//! minerhub-core-cli profits --stable # Cached paying rates of stable algorithms
//! ```

pub mod catalog_cmd;
pub mod config_cmd;
pub mod profits_cmd;

/// True when `flag` appears anywhere in `args`.
pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Value following `flag`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
