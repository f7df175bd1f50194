//! Lightweight wall-clock timing for stage runs.
//!
//! Stage timers are always measured; whether they are reported is left to
//! the caller (the pipeline attaches them to progress events and the run
//! summary).

use std::time::Instant;

use crate::StageKind;

/// A simple timer that measures elapsed time.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since `start`, without stopping.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Stop the timer and return elapsed time in seconds.
    pub fn stop(self) -> f64 {
        self.elapsed_s()
    }
}

/// Per-stage wall-clock durations of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    entries: Vec<(StageKind, f64)>,
}

impl StageTimings {
    pub fn record(&mut self, stage: StageKind, seconds: f64) {
        self.entries.push((stage, seconds));
    }

    pub fn get(&self, stage: StageKind) -> Option<f64> {
        self.entries
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, t)| *t)
    }

    pub fn total_s(&self) -> f64 {
        self.entries.iter().map(|(_, t)| t).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKind, f64)> + '_ {
        self.entries.iter().copied()
    }
}
