//! Metric names and recording helpers.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::plugins::PipelineStage;

const INSTALLS_TOTAL: &str = "minerhub_plugin_installs_total";
const REMOVALS_TOTAL: &str = "minerhub_plugin_removals_total";
const ACTIVE_INSTALLS: &str = "minerhub_plugin_active_installs";
const CATALOG_REFRESH_TOTAL: &str = "minerhub_catalog_refresh_total";
const PROFITABILITY_UPDATES_TOTAL: &str = "minerhub_profitability_updates_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(INSTALLS_TOTAL, "Finished plugin installs by terminal stage");
    describe_counter!(REMOVALS_TOTAL, "Plugin removals by outcome");
    describe_gauge!(ACTIVE_INSTALLS, "Install tasks currently running");
    describe_counter!(CATALOG_REFRESH_TOTAL, "Online catalog refresh attempts by outcome");
    describe_counter!(PROFITABILITY_UPDATES_TOTAL, "Profitability updates by kind");
}

pub fn record_install_outcome(stage: PipelineStage) {
    counter!(INSTALLS_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_remove_outcome(success: bool) {
    let outcome = if success { "success" } else { "failed" };
    counter!(REMOVALS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_active_installs(count: usize) {
    gauge!(ACTIVE_INSTALLS).set(count as f64);
}

pub fn record_catalog_refresh(success: bool) {
    let outcome = if success { "success" } else { "failed" };
    counter!(CATALOG_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_profitability_update(kind: &'static str) {
    counter!(PROFITABILITY_UPDATES_TOTAL, "kind" => kind).increment(1);
}
