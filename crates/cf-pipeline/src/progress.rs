//! Progress events emitted while a pipeline runs.

use cf_core::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Started,
    Ready,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn label(self) -> &'static str {
        match self {
            StageStatus::Started => "started",
            StageStatus::Ready => "ready",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub stage: StageKind,
    pub status: StageStatus,
    /// Wall time since the run started.
    pub elapsed_s: f64,
    pub message: Option<String>,
}
