//! Install pipeline stages and progress reporting.

use serde::Serialize;
use std::fmt;

/// Position of an install within the download/extract/load pipeline.
///
/// `Pending*` stages precede the blocking step they name; the non-pending
/// variant is reported with a percentage while that step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineStage {
    Pending,
    PendingDownloadingPlugin,
    DownloadingPlugin,
    PendingExtractingPlugin,
    ExtractingPlugin,
    PendingDownloadingMiner,
    DownloadingMiner,
    PendingExtractingMiner,
    ExtractingMiner,
    Success,
    Canceled,
    FailedDownloadingPlugin,
    FailedExtractingPlugin,
    FailedDownloadingMiner,
    FailedExtractingMiner,
    FailedPluginLoad,
    FailedPluginInit,
    FailedUnknown,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Canceled) || self.is_failure()
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailedDownloadingPlugin
                | Self::FailedExtractingPlugin
                | Self::FailedDownloadingMiner
                | Self::FailedExtractingMiner
                | Self::FailedPluginLoad
                | Self::FailedPluginInit
                | Self::FailedUnknown
        )
    }

    /// Short label used for log fields and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingDownloadingPlugin => "pending_downloading_plugin",
            Self::DownloadingPlugin => "downloading_plugin",
            Self::PendingExtractingPlugin => "pending_extracting_plugin",
            Self::ExtractingPlugin => "extracting_plugin",
            Self::PendingDownloadingMiner => "pending_downloading_miner",
            Self::DownloadingMiner => "downloading_miner",
            Self::PendingExtractingMiner => "pending_extracting_miner",
            Self::ExtractingMiner => "extracting_miner",
            Self::Success => "success",
            Self::Canceled => "canceled",
            Self::FailedDownloadingPlugin => "failed_downloading_plugin",
            Self::FailedExtractingPlugin => "failed_extracting_plugin",
            Self::FailedDownloadingMiner => "failed_downloading_miner",
            Self::FailedExtractingMiner => "failed_extracting_miner",
            Self::FailedPluginLoad => "failed_plugin_load",
            Self::FailedPluginInit => "failed_plugin_init",
            Self::FailedUnknown => "failed_unknown",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of `(stage, percent)` progress updates.
///
/// Implementations are called from install workers and must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: PipelineStage, percent: u8);
}

/// Sink that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _stage: PipelineStage, _percent: u8) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnProgress<F>(pub F);

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(PipelineStage, u8) + Send + Sync,
{
    fn report(&self, stage: PipelineStage, percent: u8) {
        (self.0)(stage, percent)
    }
}
