//! Stage orchestration and query layer for cosmoflow.
//!
//! This crate provides:
//! - The pipeline driver (`run`, `run_with_progress`) that builds each
//!   requested stage in order and tears everything down on failure
//! - The run plan derived from the parameter set
//! - Read-only queries on a finished run (P(k, z), C_l, sigma, derived scalars)
//! - File output (`.dat` tables, `parameters.ini`, `summary.json`)

pub mod error;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod query;

// Re-export key types for convenience
pub use error::{PipelineError, PipelineResult};
pub use output::{RunSummary, StageReport, write_outputs};
pub use pipeline::{Cosmology, run, run_with_progress};
pub use plan::{OutputOptions, RunPlan};
pub use progress::{PipelineEvent, StageStatus};
pub use query::DerivedParameters;
