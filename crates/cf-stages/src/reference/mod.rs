//! Closed-form reference kernels.
//!
//! These fill every stage table with smooth, physically shaped numbers so
//! the pipeline can run end to end. They are fitting formulas and simple
//! quadratures, not a Boltzmann solver.

pub(crate) mod background;
pub(crate) mod bessel;
pub(crate) mod distortions;
pub(crate) mod lensing;
pub(crate) mod nonlinear;
pub(crate) mod perturbations;
pub(crate) mod primordial;
pub(crate) mod spectra;
pub(crate) mod thermodynamics;
pub(crate) mod transfer;

use cf_core::StageKind;
use cf_table::ColumnMap;

use crate::error::{InStage, StageResult};

/// Offset of a column the kernel must fill.
pub(crate) fn offset(cols: &ColumnMap, name: &str, stage: StageKind) -> StageResult<usize> {
    cols.require(name).map(|c| c.offset()).in_stage(stage)
}

/// Offset of a column that may be disabled.
pub(crate) fn optional(cols: &ColumnMap, name: &str) -> Option<usize> {
    cols.index(name).map(|c| c.offset())
}
