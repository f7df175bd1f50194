//! The seam between stage bookkeeping and the numbers that fill tables.
//!
//! Each stage builds its column map or grid layout, hands it to the matching
//! [`Kernels`] method, then validates and freezes what comes back. Every
//! method defaults to the closed-form reference implementation, so an
//! override only needs to replace the stages it cares about.

use cf_table::TableBuilder;

use crate::background::{Background, BackgroundConfig};
use crate::distortions::DistortionsConfig;
use crate::error::StageResult;
use crate::lensing::LensingConfig;
use crate::nonlinear::{NonlinearConfig, NonlinearLayout, NonlinearOutput};
use crate::perturbations::{Perturbations, PerturbationsConfig, SourceLayout};
use crate::primordial::{Primordial, PrimordialConfig};
use crate::reference;
use crate::spectra::Spectra;
use crate::thermodynamics::{Thermodynamics, ThermodynamicsConfig};
use crate::transfer::{Transfer, TransferConfig, TransferLayout};

pub trait Kernels: Sync {
    /// Append background rows in increasing conformal time.
    fn background(&self, cfg: &BackgroundConfig, out: &mut TableBuilder) -> StageResult<()> {
        reference::background::solve(cfg, out)
    }

    /// Append thermodynamics rows in increasing conformal time.
    fn thermodynamics(
        &self,
        bg: &Background,
        cfg: &ThermodynamicsConfig,
        out: &mut TableBuilder,
    ) -> StageResult<()> {
        reference::thermodynamics::solve(bg, cfg, out)
    }

    /// One value plane per (initial condition, source type), indexed
    /// `ic * types + type`, each laid out `[itau * nk + ik]`.
    fn perturbations(
        &self,
        bg: &Background,
        th: &Thermodynamics,
        cfg: &PerturbationsConfig,
        layout: &SourceLayout,
    ) -> StageResult<Vec<Vec<f64>>> {
        reference::perturbations::solve(bg, th, cfg, layout)
    }

    /// Append primordial rows, one per entry of `ln_k`.
    fn primordial(
        &self,
        cfg: &PrimordialConfig,
        ln_k: &[f64],
        out: &mut TableBuilder,
    ) -> StageResult<()> {
        reference::primordial::solve(cfg, ln_k, out)
    }

    fn nonlinear(
        &self,
        bg: &Background,
        pt: &Perturbations,
        pm: &Primordial,
        cfg: &NonlinearConfig,
        layout: &NonlinearLayout,
    ) -> StageResult<NonlinearOutput> {
        reference::nonlinear::solve(bg, pt, pm, cfg, layout)
    }

    /// One plane per (initial condition, transfer type), laid out
    /// `[il * nk + ik]`.
    fn transfer(
        &self,
        bg: &Background,
        th: &Thermodynamics,
        pt: &Perturbations,
        cfg: &TransferConfig,
        layout: &TransferLayout,
    ) -> StageResult<Vec<Vec<f64>>> {
        reference::transfer::solve(bg, th, pt, cfg, layout)
    }

    /// Append unlensed C_l rows for one initial condition at the sampled l.
    fn spectra(
        &self,
        pm: &Primordial,
        tr: &Transfer,
        ic: usize,
        out: &mut TableBuilder,
    ) -> StageResult<()> {
        reference::spectra::solve(pm, tr, ic, out)
    }

    /// Append lensed C_l rows for every integer l up to the lensed maximum.
    fn lensing(&self, sp: &Spectra, cfg: &LensingConfig, out: &mut TableBuilder) -> StageResult<()> {
        reference::lensing::solve(sp, cfg, out)
    }

    /// Append heating-history rows in increasing conformal time.
    fn distortions(
        &self,
        bg: &Background,
        th: &Thermodynamics,
        cfg: &DistortionsConfig,
        out: &mut TableBuilder,
    ) -> StageResult<()> {
        reference::distortions::solve(bg, th, cfg, out)
    }
}

/// The shipped kernels, with no overrides.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceKernels;

impl Kernels for ReferenceKernels {}
