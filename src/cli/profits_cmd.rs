// Copyright 2024-2026 MinerHub CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Profitability CLI subcommand.

use crate::config;
use crate::profitability::{AlgorithmId, ProfitabilityRegistry};

/// Print the paying rates known from the bootstrap snapshot and the cache.
///
/// `stable` restricts output to stable (`Some(true)`) or unstable algorithms.
pub fn run_show(stable: Option<bool>, json: bool) -> i32 {
    let env = config::load();
    let registry = ProfitabilityRegistry::new(env.profitability_config());
    let rates = match stable {
        Some(stable) => registry.filtered_by_stability(stable),
        None => registry.snapshot(),
    };
    let mut rows: Vec<(AlgorithmId, f64)> = rates.into_iter().collect();
    rows.sort_by_key(|(id, _)| *id);

    if json {
        let map: serde_json::Map<String, serde_json::Value> = rows
            .iter()
            .map(|(id, rate)| (id.to_string(), serde_json::json!(rate)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
        return 0;
    }

    println!("{:>5}  {:>20}  STABLE", "ALGO", "PAYING");
    for (id, rate) in rows {
        let stable = if registry.is_stable(id) { "yes" } else { "no" };
        println!("{:>5}  {:>20.10}  {}", id.0, rate, stable);
    }
    if !registry.has_data() {
        eprintln!("No cached rates; showing bootstrap snapshot.");
    }
    0
}
