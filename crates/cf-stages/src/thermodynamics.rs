//! Thermodynamics stage: ionization history and optical depths.

use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_table::{Column, ColumnMap, Cursor, InterpMode, OutputFormat, Table, TableBuilder};
use tracing::{debug, info};

use crate::background::{self, Background};
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;

const STAGE: StageKind = StageKind::Thermodynamics;

pub mod col {
    pub const Z: &str = "z";
    pub const TAU: &str = "conf. time [Mpc]";
    pub const XE: &str = "x_e";
    pub const DKAPPA: &str = "kappa' [Mpc^-1]";
    pub const EXPMKAPPA: &str = "exp(-kappa)";
    pub const G: &str = "g [Mpc^-1]";
    pub const TB: &str = "Tb [K]";
    pub const WB: &str = "w_b";
    pub const CB2: &str = "c_b^2";
    pub const TAU_D: &str = "tau_d";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reionization {
    None,
    /// Smooth step in `(1+z)^{3/2}`, plus a late second helium step.
    Camb,
}

/// How the reionization redshift is fixed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReioTarget {
    Redshift(f64),
    /// Solve for the redshift that yields this optical depth.
    OpticalDepth(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermodynamicsConfig {
    pub yhe: f64,
    pub reionization: Reionization,
    pub z_reio: f64,
    pub reio_width: f64,
    pub helium_reio_z: f64,
    pub helium_reio_width: f64,
    pub z_max: f64,
    pub table_size: usize,
    target: ReioTarget,
}

impl Default for ThermodynamicsConfig {
    fn default() -> Self {
        Self {
            yhe: 0.2454,
            reionization: Reionization::Camb,
            z_reio: 7.67,
            reio_width: 0.5,
            helium_reio_z: 3.5,
            helium_reio_width: 0.5,
            z_max: 8000.0,
            table_size: 4000,
            target: ReioTarget::Redshift(7.67),
        }
    }
}

impl ThermodynamicsConfig {
    pub fn from_params(params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let reionization = match params
            .choice_or("reio_parametrization", &["reio_camb", "reio_none"], "reio_camb")
            .in_stage(STAGE)?
        {
            "reio_none" => Reionization::None,
            _ => Reionization::Camb,
        };
        let z_reio = params.read_f64("z_reio").in_stage(STAGE)?;
        let tau_reio = params.read_f64("tau_reio").in_stage(STAGE)?;
        let target = match (z_reio, tau_reio) {
            (Some(_), Some(_)) => {
                return Err(StageError::config(STAGE, "give either z_reio or tau_reio, not both"));
            }
            (None, Some(t)) => ReioTarget::OpticalDepth(t),
            (Some(z), None) => ReioTarget::Redshift(z),
            (None, None) => ReioTarget::Redshift(d.z_reio),
        };
        let cfg = Self {
            yhe: params.f64_or("YHe", d.yhe).in_stage(STAGE)?,
            reionization,
            z_reio: match target {
                ReioTarget::Redshift(z) => z,
                ReioTarget::OpticalDepth(_) => d.z_reio,
            },
            reio_width: params.f64_or("reionization_width", d.reio_width).in_stage(STAGE)?,
            helium_reio_z: params
                .f64_or("helium_fullreio_redshift", d.helium_reio_z)
                .in_stage(STAGE)?,
            helium_reio_width: params
                .f64_or("helium_fullreio_width", d.helium_reio_width)
                .in_stage(STAGE)?,
            z_max: params.f64_or("thermo_z_max", d.z_max).in_stage(STAGE)?,
            table_size: params.usize_or("thermo_table_size", d.table_size).in_stage(STAGE)?,
            target,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        if !(0.0..1.0).contains(&self.yhe) {
            return Err(StageError::config(STAGE, format!("YHe must lie in [0, 1), got {}", self.yhe)));
        }
        if !(self.z_reio >= 0.0) {
            return Err(StageError::config(STAGE, format!("z_reio must be non-negative, got {}", self.z_reio)));
        }
        if let ReioTarget::OpticalDepth(t) = self.target {
            if !(t > 0.0) {
                return Err(StageError::config(STAGE, format!("tau_reio must be positive, got {t}")));
            }
            if self.reionization == Reionization::None {
                return Err(StageError::config(STAGE, "tau_reio needs a reionization model"));
            }
        }
        if !(self.reio_width > 0.0) || !(self.helium_reio_width > 0.0) {
            return Err(StageError::config(STAGE, "reionization widths must be positive"));
        }
        if self.table_size < 10 {
            return Err(StageError::config(
                STAGE,
                format!("thermo_table_size must be at least 10, got {}", self.table_size),
            ));
        }
        if self.reionization == Reionization::Camb && self.reio_start_z() >= self.z_max {
            return Err(StageError::config(
                STAGE,
                format!("reionization starts above thermo_z_max = {}", self.z_max),
            ));
        }
        Ok(())
    }

    pub fn target(&self) -> ReioTarget {
        self.target
    }

    /// Helium-to-hydrogen number ratio.
    pub fn f_he(&self) -> f64 {
        self.yhe / (cf_core::units::constants::NOT4 * (1.0 - self.yhe))
    }

    /// Step variable and width of the hydrogen reionization step.
    pub fn reio_step(&self) -> (f64, f64) {
        let y_re = (1.0 + self.z_reio).powf(1.5);
        let dy = 1.5 * (1.0 + self.z_reio).sqrt() * self.reio_width;
        (y_re, dy)
    }

    /// Redshift above which reionization is negligible.
    pub fn reio_start_z(&self) -> f64 {
        let (y_re, dy) = self.reio_step();
        (y_re + 7.0 * dy).powf(2.0 / 3.0) - 1.0
    }
}

/// Scalars derived from the ionization history.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThermoDerived {
    pub z_rec: f64,
    pub tau_rec: f64,
    pub rs_rec: f64,
    pub da_rec: f64,
    pub z_d: f64,
    pub tau_d: f64,
    pub rs_d: f64,
    pub z_reio: f64,
    pub tau_reio: f64,
}

#[derive(Debug, Clone)]
pub struct Thermodynamics {
    config: ThermodynamicsConfig,
    table: Table,
    tau: Column,
    z: Column,
    derived: ThermoDerived,
}

impl Thermodynamics {
    pub fn init(bg: &Background, params: &mut ParameterSet, kernels: &dyn Kernels) -> StageResult<Self> {
        let config = ThermodynamicsConfig::from_params(params)?;
        Self::from_config(bg, config, kernels)
    }

    pub fn from_config(
        bg: &Background,
        mut config: ThermodynamicsConfig,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        config.validate()?;
        if config.z_max > bg.z_max() {
            return Err(StageError::config(
                STAGE,
                format!(
                    "thermo_z_max = {} exceeds the background range (z <= {})",
                    config.z_max,
                    bg.z_max()
                ),
            ));
        }
        let state = match config.target {
            ReioTarget::Redshift(_) => Self::build(bg, config, kernels)?,
            ReioTarget::OpticalDepth(target) => {
                // optical depth grows with z_reio
                let (mut lo, mut hi) = (0.0_f64, 0.5 * config.z_max.min(100.0));
                for _ in 0..40 {
                    config.z_reio = 0.5 * (lo + hi);
                    let trial = Self::build(bg, config.clone(), kernels)?;
                    if trial.derived.tau_reio > target {
                        hi = config.z_reio;
                    } else {
                        lo = config.z_reio;
                    }
                    if hi - lo < 1e-4 {
                        break;
                    }
                }
                config.z_reio = 0.5 * (lo + hi);
                Self::build(bg, config, kernels)?
            }
        };
        let d = &state.derived;
        info!(
            z_rec = d.z_rec,
            rs_rec = d.rs_rec,
            z_d = d.z_d,
            z_reio = d.z_reio,
            tau_reio = d.tau_reio,
            "thermodynamics ready"
        );
        Ok(state)
    }

    fn build(bg: &Background, config: ThermodynamicsConfig, kernels: &dyn Kernels) -> StageResult<Self> {
        let columns = ColumnMap::builder()
            .push(col::Z)
            .push(col::TAU)
            .push(col::XE)
            .push(col::DKAPPA)
            .push(col::EXPMKAPPA)
            .push(col::G)
            .push(col::TB)
            .push(col::WB)
            .push(col::CB2)
            .push(col::TAU_D)
            .build()
            .in_stage(STAGE)?;
        let mut out = TableBuilder::new(columns)
            .axis(col::TAU)
            .and_then(|b| b.axis(col::Z))
            .in_stage(STAGE)?;
        out.reserve(config.table_size);
        kernels.thermodynamics(bg, &config, &mut out)?;
        let table = out.finish().in_stage(STAGE)?;
        debug!(rows = table.rows(), cols = table.cols(), "thermodynamics table");
        if table.rows() < 3 {
            return Err(StageError::numerical(STAGE, "kernel produced fewer than three rows"));
        }
        let tau = table.require(col::TAU).in_stage(STAGE)?;
        let z = table.require(col::Z).in_stage(STAGE)?;
        let mut state = Self {
            config,
            table,
            tau,
            z,
            derived: ThermoDerived::default(),
        };
        state.derived = state.derive(bg)?;
        Ok(state)
    }

    fn derive(&self, bg: &Background) -> StageResult<ThermoDerived> {
        let t = &self.table;
        let g = t.require(col::G).in_stage(STAGE)?;
        let taud = t.require(col::TAU_D).in_stage(STAGE)?;
        let expmk = t.require(col::EXPMKAPPA).in_stage(STAGE)?;
        let n = t.rows();

        // visibility peak, refined by a parabola through its neighbours
        let (mut imax, mut gmax) = (0, f64::NEG_INFINITY);
        let last_reio_row = if self.config.reionization == Reionization::Camb {
            // skip the reionization bump when looking for recombination
            (0..n)
                .find(|&i| t.value(i, self.z) < self.config.reio_start_z())
                .unwrap_or(n)
        } else {
            n
        };
        for i in 0..last_reio_row {
            let v = t.value(i, g);
            if v > gmax {
                gmax = v;
                imax = i;
            }
        }
        let mut tau_rec = t.value(imax, self.tau);
        if imax > 0 && imax + 1 < n {
            let (x0, x1, x2) = (
                t.value(imax - 1, self.tau),
                t.value(imax, self.tau),
                t.value(imax + 1, self.tau),
            );
            let (y0, y1, y2) = (t.value(imax - 1, g), t.value(imax, g), t.value(imax + 1, g));
            let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
            let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
            let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;
            if a < 0.0 {
                tau_rec = (-b / (2.0 * a)).clamp(x0, x2);
            }
        }

        // drag epoch: baryon optical depth crosses one
        let mut tau_drag = None;
        for i in (1..n).rev() {
            let (d0, d1) = (t.value(i - 1, taud), t.value(i, taud));
            if d0 >= 1.0 && d1 < 1.0 {
                let (x0, x1) = (t.value(i - 1, self.tau), t.value(i, self.tau));
                tau_drag = Some(x0 + (1.0 - d0) * (x1 - x0) / (d1 - d0));
                break;
            }
        }
        let tau_drag = tau_drag.ok_or_else(|| {
            StageError::numerical(STAGE, "baryon optical depth never reaches one")
        })?;

        let rs = bg.column(background::col::RS)?;
        let da = bg.column(background::col::ANG_DIST)?;
        let mut c = Cursor::default();
        let mut at = |tau: f64, col: Column| -> StageResult<f64> {
            let mut out = [0.0];
            bg.values_at_tau(tau, &[col], InterpMode::Normal, &mut c, &mut out)?;
            Ok(out[0])
        };
        let rs_rec = at(tau_rec, rs)?;
        let da_rec = at(tau_rec, da)?;
        let rs_d = at(tau_drag, rs)?;

        let tau_reio = match self.config.reionization {
            Reionization::None => 0.0,
            Reionization::Camb => {
                let z_start = self.config.reio_start_z();
                let e = t
                    .interpolate_one(self.z, z_start, expmk, InterpMode::Normal, &mut Cursor::default())
                    .in_stage(STAGE)?;
                -e.ln()
            }
        };

        Ok(ThermoDerived {
            z_rec: bg.z_of_tau(tau_rec)?,
            tau_rec,
            rs_rec,
            da_rec,
            z_d: bg.z_of_tau(tau_drag)?,
            tau_d: tau_drag,
            rs_d,
            z_reio: self.config.z_reio,
            tau_reio,
        })
    }

    pub fn config(&self) -> &ThermodynamicsConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn derived(&self) -> &ThermoDerived {
        &self.derived
    }

    pub fn has_reionization(&self) -> bool {
        self.config.reionization != Reionization::None
    }

    pub fn column(&self, name: &str) -> StageResult<Column> {
        self.table.require(name).map_err(StageError::query(STAGE))
    }

    /// Conformal-time range covered by the table.
    pub fn tau_range(&self) -> (f64, f64) {
        let n = self.table.rows();
        (self.table.value(0, self.tau), self.table.value(n - 1, self.tau))
    }

    pub fn z_max(&self) -> f64 {
        self.table.value(0, self.z)
    }

    pub fn at_z(&self, z: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<Vec<f64>> {
        self.table
            .interpolate_all(self.z, z, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn at_tau(&self, tau: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<Vec<f64>> {
        self.table
            .interpolate_all(self.tau, tau, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn values_at_tau(
        &self,
        tau: f64,
        cols: &[Column],
        mode: InterpMode,
        cursor: &mut Cursor,
        out: &mut [f64],
    ) -> StageResult<()> {
        self.table
            .interpolate(self.tau, tau, mode, cursor, cols, out)
            .map_err(StageError::query(STAGE))
    }

    pub fn values_at_z(
        &self,
        z: f64,
        cols: &[Column],
        mode: InterpMode,
        cursor: &mut Cursor,
        out: &mut [f64],
    ) -> StageResult<()> {
        self.table
            .interpolate(self.z, z, mode, cursor, cols, out)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundConfig;
    use crate::kernels::ReferenceKernels;

    fn bg() -> Background {
        let cfg = BackgroundConfig {
            z_max: 1e6,
            table_size: 1000,
            ..BackgroundConfig::default()
        };
        Background::from_config(cfg, &ReferenceKernels).unwrap()
    }

    fn small() -> ThermodynamicsConfig {
        ThermodynamicsConfig {
            table_size: 1600,
            ..ThermodynamicsConfig::default()
        }
    }

    #[test]
    fn recombination_lands_near_z_1100() {
        let bg = bg();
        let th = Thermodynamics::from_config(&bg, small(), &ReferenceKernels).unwrap();
        let d = th.derived();
        assert!(d.z_rec > 1000.0 && d.z_rec < 1200.0, "z_rec {}", d.z_rec);
        assert!(d.z_d > 900.0 && d.z_d < 1200.0, "z_d {}", d.z_d);
        assert!(d.rs_rec > 100.0 && d.rs_rec < 200.0, "rs_rec {}", d.rs_rec);
        assert!(d.tau_reio > 0.02 && d.tau_reio < 0.12, "tau_reio {}", d.tau_reio);
    }

    #[test]
    fn optical_depth_is_monotonic() {
        let bg = bg();
        let th = Thermodynamics::from_config(&bg, small(), &ReferenceKernels).unwrap();
        let e = th.column(col::EXPMKAPPA).unwrap();
        let values = th.table().column_vec(e);
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
        assert!((values[values.len() - 1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_ionization_inputs_rejected() {
        for cfg in [
            ThermodynamicsConfig { yhe: 1.0, ..small() },
            ThermodynamicsConfig { z_reio: -1.0, ..small() },
            ThermodynamicsConfig { reio_width: 0.0, ..small() },
        ] {
            let err = cfg.validate().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        }
    }

    #[test]
    fn optical_depth_target_is_met() {
        let bg = bg();
        let mut p = ParameterSet::from_pairs("t", [("tau_reio", "0.06"), ("thermo_table_size", "1600")])
            .unwrap();
        let th = Thermodynamics::init(&bg, &mut p, &ReferenceKernels).unwrap();
        assert!((th.derived().tau_reio - 0.06).abs() < 1e-3);
    }

    #[test]
    fn table_above_background_range_rejected() {
        let bg = bg();
        let cfg = ThermodynamicsConfig { z_max: 2e6, ..small() };
        let err = Thermodynamics::from_config(&bg, cfg, &ReferenceKernels).unwrap_err();
        assert!(matches!(err, StageError::Configuration { .. }));
    }

    #[test]
    fn titles_pair_with_rows() {
        let bg = bg();
        let th = Thermodynamics::from_config(&bg, small(), &ReferenceKernels).unwrap();
        let titles = th.titles(OutputFormat::Class);
        assert_eq!(titles[6], col::TB);
        assert_eq!(titles.len(), th.data_at_z(1100.0, OutputFormat::Class).unwrap().len());
    }
}
