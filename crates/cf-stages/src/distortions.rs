//! Spectral distortions stage.
//!
//! The kernel tabulates the heating history and the branching ratios into
//! temperature shift, `y` and `mu` distortions. The stage integrates them
//! into the distortion amplitudes and builds the observable spectrum
//! `Delta I(x)` over `x = h nu / k T_cmb`.

use cf_core::units::constants;
use cf_core::{StageKind, kelvin_of, logspace, trapezoid};
use cf_params::ParameterSet;
use cf_table::{ColumnMap, Cursor, InterpMode, OutputFormat, Table, TableBuilder, TableError};
use tracing::{debug, info};

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::thermodynamics::Thermodynamics;

const STAGE: StageKind = StageKind::Distortions;

pub mod col {
    pub const Z: &str = "z";
    pub const TAU: &str = "conf. time [Mpc]";
    pub const HEAT: &str = "dQ/dz";
    pub const J_T: &str = "J_T";
    pub const J_Y: &str = "J_y";
    pub const J_MU: &str = "J_mu";
}

/// `mu` distortion normalisation, `1 / beta` for a Bose-Einstein spectrum.
const MU_NORM: f64 = 1.401;
const BETA_MU: f64 = 2.1923;
/// `2 (k T)^3 / (h c)^2` at the reference temperature, in Jy/sr.
const I0_REF_JY: f64 = 2.7033e8;
const X_MIN: f64 = 0.1;
const X_MAX: f64 = 30.0;
const X_POINTS: usize = 300;

/// How the heating is split between `mu`, `y` and temperature shift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BranchingApprox {
    /// Smooth fits renormalised so the three ratios sum to one.
    #[default]
    Exact,
    SharpSharp,
    SharpSoft,
    SoftSoft,
}

impl BranchingApprox {
    pub fn name(self) -> &'static str {
        match self {
            BranchingApprox::Exact => "exact",
            BranchingApprox::SharpSharp => "sharp_sharp",
            BranchingApprox::SharpSoft => "sharp_soft",
            BranchingApprox::SoftSoft => "soft_soft",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistortionsConfig {
    pub z_min: f64,
    pub z_max: f64,
    pub table_size: usize,
    pub branching: BranchingApprox,
}

impl Default for DistortionsConfig {
    fn default() -> Self {
        Self {
            z_min: 1.0e3,
            z_max: 5.0e6,
            table_size: 300,
            branching: BranchingApprox::Exact,
        }
    }
}

impl DistortionsConfig {
    pub fn from_params(params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let branching = match params
            .choice_or(
                "sd_branching_approx",
                &["exact", "sharp_sharp", "sharp_soft", "soft_soft"],
                "exact",
            )
            .in_stage(STAGE)?
        {
            "sharp_sharp" => BranchingApprox::SharpSharp,
            "sharp_soft" => BranchingApprox::SharpSoft,
            "soft_soft" => BranchingApprox::SoftSoft,
            _ => BranchingApprox::Exact,
        };
        let cfg = Self {
            z_min: params.f64_or("sd_z_min", d.z_min).in_stage(STAGE)?,
            z_max: params.f64_or("sd_z_max", d.z_max).in_stage(STAGE)?,
            table_size: params.usize_or("sd_table_size", d.table_size).in_stage(STAGE)?,
            branching,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        if !(self.z_min > 0.0 && self.z_max > self.z_min) {
            return Err(StageError::config(
                STAGE,
                format!("need 0 < sd_z_min < sd_z_max, got {} and {}", self.z_min, self.z_max),
            ));
        }
        if self.table_size < 2 {
            return Err(StageError::config(STAGE, "sd_table_size must be at least 2"));
        }
        Ok(())
    }

    /// Table redshifts, in increasing conformal time.
    pub fn z_samples(&self) -> StageResult<Vec<f64>> {
        let mut z = logspace(self.z_min, self.z_max, self.table_size).in_stage(STAGE)?;
        z.reverse();
        Ok(z)
    }
}

/// Integrated distortion amplitudes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DistortionsDerived {
    pub mu: f64,
    pub y: f64,
    /// Fractional temperature shift.
    pub g: f64,
}

fn planck_g(x: f64) -> f64 {
    let ex = x.exp();
    x.powi(4) * ex / ((ex - 1.0) * (ex - 1.0))
}

fn shape_y(x: f64) -> f64 {
    planck_g(x) * (x / (0.5 * x).tanh() - 4.0)
}

fn shape_mu(x: f64) -> f64 {
    planck_g(x) * (1.0 / BETA_MU - 1.0 / x)
}

#[derive(Debug, Clone)]
pub struct Distortions {
    config: DistortionsConfig,
    table: Table,
    derived: DistortionsDerived,
    t_cmb: f64,
}

impl Distortions {
    pub fn init(
        bg: &Background,
        th: &Thermodynamics,
        params: &mut ParameterSet,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        let config = DistortionsConfig::from_params(params)?;
        Self::from_config(bg, th, config, kernels)
    }

    pub fn from_config(
        bg: &Background,
        th: &Thermodynamics,
        config: DistortionsConfig,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        config.validate()?;
        if config.z_max > bg.z_max() {
            return Err(StageError::config(
                STAGE,
                format!("sd_z_max = {} is beyond the background table ({})", config.z_max, bg.z_max()),
            ));
        }
        let columns = ColumnMap::builder()
            .push(col::Z)
            .push(col::TAU)
            .push(col::HEAT)
            .push(col::J_T)
            .push(col::J_Y)
            .push(col::J_MU)
            .build()
            .in_stage(STAGE)?;
        let mut out = TableBuilder::new(columns)
            .axis(col::TAU)
            .in_stage(STAGE)?
            .axis(col::Z)
            .in_stage(STAGE)?;
        out.reserve(config.table_size);
        kernels.distortions(bg, th, &config, &mut out)?;
        let table = out.finish().in_stage(STAGE)?;
        if table.rows() < 2 {
            return Err(StageError::numerical(STAGE, "heating table has fewer than two rows"));
        }
        let derived = Self::integrate(&table)?;
        debug!(rows = table.rows(), "distortions table");
        info!(mu = derived.mu, y = derived.y, "distortions ready");
        Ok(Self {
            config,
            table,
            derived,
            t_cmb: kelvin_of(bg.t_cmb()),
        })
    }

    fn integrate(table: &Table) -> StageResult<DistortionsDerived> {
        let get = |name: &str| table.require(name).map(|c| table.column_vec(c)).in_stage(STAGE);
        let mut z = get(col::Z)?;
        let mut heat = get(col::HEAT)?;
        let mut j = [get(col::J_T)?, get(col::J_Y)?, get(col::J_MU)?];
        // integrate in increasing z
        z.reverse();
        heat.reverse();
        let mut amp = [0.0; 3];
        for (a, branch) in amp.iter_mut().zip(j.iter_mut()) {
            branch.reverse();
            let integrand: Vec<f64> = branch.iter().zip(&heat).map(|(b, q)| b * q).collect();
            *a = trapezoid(&z, &integrand);
        }
        Ok(DistortionsDerived {
            g: 0.25 * amp[0],
            y: 0.25 * amp[1],
            mu: MU_NORM * amp[2],
        })
    }

    pub fn config(&self) -> &DistortionsConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn derived(&self) -> DistortionsDerived {
        self.derived
    }

    pub fn at_z(&self, z: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<Vec<f64>> {
        let axis = self.table.require(col::Z).map_err(StageError::query(STAGE))?;
        self.table
            .interpolate_all(axis, z, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn titles(&self, _format: OutputFormat) -> Vec<String> {
        self.table.columns().names().map(str::to_string).collect()
    }

    pub fn data_at_z(&self, z: f64, _format: OutputFormat) -> StageResult<Vec<f64>> {
        self.at_z(z, InterpMode::Normal, &mut Cursor::default())
    }

    pub fn export_rows(&self, _format: OutputFormat) -> Vec<Vec<f64>> {
        (0..self.table.rows()).map(|i| self.table.row(i).to_vec()).collect()
    }

    pub fn spectrum_titles(&self) -> Vec<String> {
        ["x", "nu [GHz]", "DI_tot", "DI_T", "DI_y", "DI_mu"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Distorted intensity at `x = h nu / k T_cmb`, in Jy/sr.
    pub fn spectrum_data(&self, x: f64) -> StageResult<Vec<f64>> {
        if !(X_MIN..=X_MAX).contains(&x) {
            return Err(StageError::query(STAGE)(TableError::OutOfRange {
                axis: "x".to_string(),
                value: x,
                min: X_MIN,
                max: X_MAX,
            }));
        }
        let i0 = I0_REF_JY * (self.t_cmb / constants::T_CMB_REF).powi(3);
        let nu_ghz = x * constants::K_B * self.t_cmb / constants::H_PLANCK / 1.0e9;
        let d = self.derived;
        let di_t = i0 * d.g * planck_g(x);
        let di_y = i0 * d.y * shape_y(x);
        let di_mu = i0 * d.mu * shape_mu(x);
        Ok(vec![x, nu_ghz, di_t + di_y + di_mu, di_t, di_y, di_mu])
    }

    pub fn spectrum_x(&self) -> StageResult<Vec<f64>> {
        logspace(X_MIN, X_MAX, X_POINTS).in_stage(STAGE)
    }

    pub fn spectrum_rows(&self) -> StageResult<Vec<Vec<f64>>> {
        self.spectrum_x()?.into_iter().map(|x| self.spectrum_data(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn y_shape_changes_sign_near_217_ghz() {
        // x = 3.83 is the thermal SZ null
        assert!(shape_y(3.0) < 0.0);
        assert!(shape_y(4.5) > 0.0);
    }

    #[test]
    fn mu_shape_crosses_zero_at_beta() {
        assert!(shape_mu(BETA_MU - 0.1) < 0.0);
        assert!(shape_mu(BETA_MU + 0.1) > 0.0);
    }

    #[test]
    fn branching_choice_is_read() {
        let mut p = ParameterSet::from_pairs("t", [("sd_branching_approx", "soft_soft")]).unwrap();
        assert_eq!(
            DistortionsConfig::from_params(&mut p).unwrap().branching,
            BranchingApprox::SoftSoft
        );
        let mut p = ParameterSet::from_pairs("t", [("sd_z_min", "1e7")]).unwrap();
        assert!(DistortionsConfig::from_params(&mut p).is_err());
    }

    #[test]
    fn samples_run_backwards_in_redshift() {
        let z = DistortionsConfig::default().z_samples().unwrap();
        assert_eq!(z.len(), 300);
        assert!(z.windows(2).all(|w| w[1] < w[0]));
    }
}
