//! Span utilities for install and maintenance operations.

use tracing::{info_span, Span};
use uuid::Uuid;

use crate::plugins::PipelineStage;

/// Extension trait for recording outcomes into spans.
pub trait SpanExt {
    /// Record the terminal pipeline stage into the span.
    fn record_stage(&self, stage: PipelineStage);

    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_stage(&self, stage: PipelineStage) {
        let status = if stage == PipelineStage::Success { "ok" } else { "error" };
        self.record("status", status);
        self.record("stage", stage.as_str());
    }

    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for install spans.
pub struct InstallSpan;

impl InstallSpan {
    /// Fields:
    /// - `plugin_id`, `plugin_name`: package being installed
    /// - `status`, `stage`: filled in by `SpanExt::record_stage`
    /// - `error.message`: filled in on error
    pub fn new(plugin_id: &Uuid, plugin_name: &str) -> Span {
        info_span!(
            "plugin_install",
            plugin_id = %plugin_id,
            plugin_name = %plugin_name,
            status = tracing::field::Empty,
            stage = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }

    pub fn removal(plugin_id: &Uuid) -> Span {
        info_span!(
            "plugin_remove",
            plugin_id = %plugin_id,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
