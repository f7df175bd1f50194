//! cf-core: stable foundation for cosmoflow.
//!
//! Contains:
//! - numeric (Real + grids + quadrature helpers)
//! - stage (stage kinds in dependency order, lifecycle states)
//! - units (uom SI types + cosmological constants)
//! - timing (wall-clock timers for stage runs)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod stage;
pub mod timing;
pub mod units;

pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use stage::{Lifecycle, StageKind};
pub use timing::{StageTimings, Timer};
pub use units::*;
