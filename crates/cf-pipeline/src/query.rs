//! Read-only queries against a finished run.
//!
//! Every query takes `&self`, so a [`Cosmology`] can be shared across
//! threads and queried concurrently. Asking for something a stage did not
//! build is a dependency failure naming that stage.

use cf_core::{StageKind, gyr_of, kelvin_of};
use cf_stages::{ClValue, PkMode, PkValue, StageResult, Tracer};
use cf_table::OutputFormat;
use serde::Serialize;

use crate::pipeline::Cosmology;

/// Scalars derived from the stages that ran; absent stages leave `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedParameters {
    pub h: f64,
    pub age_gyr: f64,
    pub conformal_age_mpc: f64,
    pub t_cmb_k: f64,
    pub omega0_m: f64,
    pub omega0_r: f64,
    pub omega0_lambda: f64,
    pub z_eq: f64,
    pub z_rec: f64,
    pub tau_rec: f64,
    pub rs_rec: f64,
    pub da_rec: f64,
    pub z_d: f64,
    pub rs_d: f64,
    pub z_reio: f64,
    pub tau_reio: f64,
    pub sigma8: Option<f64>,
    pub sigma8_cb: Option<f64>,
    pub mu: Option<f64>,
    pub y: Option<f64>,
}

impl Cosmology {
    pub fn tau_of_z(&self, z: f64) -> StageResult<f64> {
        self.background.require(StageKind::Background)?.tau_of_z(z)
    }

    pub fn z_of_tau(&self, tau: f64) -> StageResult<f64> {
        self.background.require(StageKind::Background)?.z_of_tau(tau)
    }

    /// Background titles and one row at redshift `z`.
    pub fn background_at_z(
        &self,
        z: f64,
        format: OutputFormat,
    ) -> StageResult<(Vec<String>, Vec<f64>)> {
        let bg = self.background.require(StageKind::Background)?;
        Ok((bg.titles(format), bg.data_at_z(z, format)?))
    }

    pub fn thermodynamics_at_z(
        &self,
        z: f64,
        format: OutputFormat,
    ) -> StageResult<(Vec<String>, Vec<f64>)> {
        let th = self.thermodynamics.require(StageKind::Thermodynamics)?;
        Ok((th.titles(format), th.data_at_z(z, format)?))
    }

    /// Matter power at `k` [1/Mpc] and redshift `z`.
    pub fn pk_at_k_and_z(&self, k: f64, z: f64, mode: PkMode) -> StageResult<PkValue> {
        let bg = self.background.require(StageKind::Spectra)?;
        let sp = self.spectra.require(StageKind::Spectra)?;
        sp.pk_at_k_and_z(bg, self.nonlinear.get(), k, z, mode)
    }

    /// Matter power at many `(k, z)` points, evaluated in parallel.
    pub fn pk_at_kz_batch(
        &self,
        points: &[(f64, f64)],
        mode: PkMode,
    ) -> StageResult<Vec<PkValue>> {
        let bg = self.background.require(StageKind::Spectra)?;
        let sp = self.spectra.require(StageKind::Spectra)?;
        sp.pk_at_kz_batch(bg, self.nonlinear.get(), points, mode)
    }

    /// Unlensed C_l at multipole `l`, in the column order of `Spectra::cl_types`.
    pub fn cl_at_l(&self, l: f64) -> StageResult<ClValue> {
        self.transfer.require(StageKind::Spectra)?;
        self.spectra.require(StageKind::Spectra)?.cl_at_l(l)
    }

    pub fn lensed_cl_at_l(&self, l: f64) -> StageResult<Vec<f64>> {
        self.lensing.require(StageKind::Lensing)?.lensed_cl_at_l(l)
    }

    /// Rms fluctuation in spheres of radius `r` [Mpc] at redshift `z`.
    pub fn sigma(&self, r: f64, z: f64, tracer: Tracer, mode: PkMode) -> StageResult<f64> {
        let bg = self.background.require(StageKind::Spectra)?;
        let sp = self.spectra.require(StageKind::Spectra)?;
        sp.sigma(bg, self.nonlinear.get(), r, z, tracer, mode)
    }

    /// sigma_8 today, as `sigma(8/h, 0)` on the linear spectrum.
    pub fn sigma8(&self, tracer: Tracer) -> StageResult<f64> {
        let h = self.background.require(StageKind::Spectra)?.h();
        self.sigma(8.0 / h, 0.0, tracer, PkMode::Linear)
    }

    pub fn derived(&self) -> StageResult<DerivedParameters> {
        let bg = self.background.require(StageKind::Background)?;
        let th = self.thermodynamics.require(StageKind::Thermodynamics)?.derived();
        let sp = self.spectra.get().map(|s| *s.derived());
        let sd = self.distortions.get().map(|d| d.derived());
        Ok(DerivedParameters {
            h: bg.h(),
            age_gyr: gyr_of(bg.age()),
            conformal_age_mpc: bg.conformal_age(),
            t_cmb_k: kelvin_of(bg.t_cmb()),
            omega0_m: bg.omega0_m(),
            omega0_r: bg.omega0_r(),
            omega0_lambda: bg.omega0_lambda(),
            z_eq: bg.z_eq(),
            z_rec: th.z_rec,
            tau_rec: th.tau_rec,
            rs_rec: th.rs_rec,
            da_rec: th.da_rec,
            z_d: th.z_d,
            rs_d: th.rs_d,
            z_reio: th.z_reio,
            tau_reio: th.tau_reio,
            sigma8: sp.and_then(|s| s.sigma8),
            sigma8_cb: sp.and_then(|s| s.sigma8_cb),
            mu: sd.map(|d| d.mu),
            y: sd.map(|d| d.y),
        })
    }
}
