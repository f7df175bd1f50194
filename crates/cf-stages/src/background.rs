//! Background stage: expansion history on a conformal-time grid.

use cf_core::units::{self, Temperature, Time, constants};
use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_table::{Column, ColumnMap, Cursor, InterpMode, OutputFormat, Table, TableBuilder};
use tracing::{debug, info};

use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;

const STAGE: StageKind = StageKind::Background;

/// Column names of the background table.
pub mod col {
    pub const Z: &str = "z";
    pub const T: &str = "proper time [Gyr]";
    pub const TAU: &str = "conf. time [Mpc]";
    pub const H: &str = "H [1/Mpc]";
    pub const COMOV_DIST: &str = "comov. dist.";
    pub const ANG_DIST: &str = "ang.diam.dist.";
    pub const LUM_DIST: &str = "lum. dist.";
    pub const RS: &str = "comov.snd.hrz.";
    pub const RHO_G: &str = "(.)rho_g";
    pub const RHO_B: &str = "(.)rho_b";
    pub const RHO_CDM: &str = "(.)rho_cdm";
    pub const RHO_NCDM: &str = "(.)rho_ncdm";
    pub const RHO_LAMBDA: &str = "(.)rho_lambda";
    pub const RHO_UR: &str = "(.)rho_ur";
    pub const RHO_CRIT: &str = "(.)rho_crit";
    pub const GROWTH_D: &str = "gr.fac. D";
    pub const GROWTH_F: &str = "gr.fac. f";
}

/// Cosmological parameters read by the background stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundConfig {
    pub h: f64,
    pub t_cmb: f64,
    pub omega_b: f64,
    pub omega_cdm: f64,
    pub n_ur: f64,
    /// Summed neutrino mass in eV, treated as non-relativistic today.
    pub m_ncdm: f64,
    pub omega_k: f64,
    pub z_max: f64,
    pub table_size: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            h: 0.67556,
            t_cmb: 2.7255,
            omega_b: 0.022032,
            omega_cdm: 0.12038,
            n_ur: 3.046,
            m_ncdm: 0.0,
            omega_k: 0.0,
            z_max: 1e9,
            table_size: 3000,
        }
    }
}

impl BackgroundConfig {
    pub fn from_params(params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let h = match (params.read_f64("h").in_stage(STAGE)?, params.read_f64("H0").in_stage(STAGE)?) {
            (Some(_), Some(_)) => {
                return Err(StageError::config(STAGE, "give either h or H0, not both"));
            }
            (Some(h), None) => h,
            (None, Some(h0)) => h0 / 100.0,
            (None, None) => d.h,
        };
        let cfg = Self {
            h,
            t_cmb: params.f64_or("T_cmb", d.t_cmb).in_stage(STAGE)?,
            omega_b: params.f64_or("omega_b", d.omega_b).in_stage(STAGE)?,
            omega_cdm: params.f64_or("omega_cdm", d.omega_cdm).in_stage(STAGE)?,
            n_ur: params.f64_or("N_ur", d.n_ur).in_stage(STAGE)?,
            m_ncdm: params.f64_or("m_ncdm", d.m_ncdm).in_stage(STAGE)?,
            omega_k: params.f64_or("Omega_k", d.omega_k).in_stage(STAGE)?,
            z_max: params.f64_or("background_z_max", d.z_max).in_stage(STAGE)?,
            table_size: params
                .usize_or("background_table_size", d.table_size)
                .in_stage(STAGE)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        let positive = [("h", self.h), ("T_cmb", self.t_cmb), ("omega_b", self.omega_b)];
        for (name, v) in positive {
            if !(v > 0.0) {
                return Err(StageError::config(STAGE, format!("{name} must be positive, got {v}")));
            }
        }
        let non_negative = [
            ("omega_cdm", self.omega_cdm),
            ("N_ur", self.n_ur),
            ("m_ncdm", self.m_ncdm),
        ];
        for (name, v) in non_negative {
            if !(v >= 0.0) {
                return Err(StageError::config(STAGE, format!("{name} must be non-negative, got {v}")));
            }
        }
        if !(self.z_max > 10.0) {
            return Err(StageError::config(
                STAGE,
                format!("background_z_max must exceed 10, got {}", self.z_max),
            ));
        }
        if self.table_size < 10 {
            return Err(StageError::config(
                STAGE,
                format!("background_table_size must be at least 10, got {}", self.table_size),
            ));
        }
        let lambda = self.omega0_lambda();
        if lambda < 0.0 {
            return Err(StageError::config(
                STAGE,
                format!("implied Omega_Lambda = {lambda:.6} is negative"),
            ));
        }
        Ok(())
    }

    /// Hubble rate today in 1/Mpc.
    pub fn h0(&self) -> f64 {
        self.h * 100.0 / constants::C_KM_S
    }

    pub fn omega0_g(&self) -> f64 {
        constants::OMEGA_G_H2_REF * (self.t_cmb / constants::T_CMB_REF).powi(4) / (self.h * self.h)
    }

    pub fn omega0_ur(&self) -> f64 {
        self.n_ur * 7.0 / 8.0 * (4.0_f64 / 11.0).powf(4.0 / 3.0) * self.omega0_g()
    }

    pub fn omega0_b(&self) -> f64 {
        self.omega_b / (self.h * self.h)
    }

    pub fn omega0_cdm(&self) -> f64 {
        self.omega_cdm / (self.h * self.h)
    }

    pub fn omega0_ncdm(&self) -> f64 {
        self.m_ncdm / (constants::NCDM_EV_PER_OMEGA * self.h * self.h)
    }

    pub fn omega0_m(&self) -> f64 {
        self.omega0_b() + self.omega0_cdm() + self.omega0_ncdm()
    }

    pub fn omega0_r(&self) -> f64 {
        self.omega0_g() + self.omega0_ur()
    }

    /// Closure density, whatever the other components leave over.
    pub fn omega0_lambda(&self) -> f64 {
        1.0 - self.omega0_m() - self.omega0_r() - self.omega_k
    }

    /// `H^2(a)` in 1/Mpc^2.
    pub fn hubble_squared(&self, a: f64) -> f64 {
        let h0 = self.h0();
        h0 * h0
            * (self.omega0_m() / a.powi(3)
                + self.omega0_r() / a.powi(4)
                + self.omega_k / (a * a)
                + self.omega0_lambda())
    }

    /// `d ln H / d ln a`.
    pub fn dlnh_dlna(&self, a: f64) -> f64 {
        let h0 = self.h0();
        let dh2 = h0
            * h0
            * (-3.0 * self.omega0_m() / a.powi(3)
                - 4.0 * self.omega0_r() / a.powi(4)
                - 2.0 * self.omega_k / (a * a));
        0.5 * dh2 / self.hubble_squared(a)
    }

    /// Baryon-to-photon momentum ratio `R = 3 rho_b / (4 rho_g)`.
    pub fn baryon_photon_ratio(&self, a: f64) -> f64 {
        0.75 * self.omega0_b() / self.omega0_g() * a
    }

    pub fn has_ncdm(&self) -> bool {
        self.m_ncdm > 0.0
    }

    pub fn has_ur(&self) -> bool {
        self.n_ur > 0.0
    }

    pub fn has_lambda(&self) -> bool {
        self.omega0_lambda() > 0.0
    }

    fn column_map(&self) -> StageResult<ColumnMap> {
        ColumnMap::builder()
            .push(col::Z)
            .push(col::T)
            .push(col::TAU)
            .push(col::H)
            .push(col::COMOV_DIST)
            .push(col::ANG_DIST)
            .push(col::LUM_DIST)
            .push(col::RS)
            .push(col::RHO_G)
            .push(col::RHO_B)
            .push(col::RHO_CDM)
            .push_if(self.has_ncdm(), col::RHO_NCDM)
            .push_if(self.has_lambda(), col::RHO_LAMBDA)
            .push_if(self.has_ur(), col::RHO_UR)
            .push(col::RHO_CRIT)
            .push(col::GROWTH_D)
            .push(col::GROWTH_F)
            .build()
            .in_stage(STAGE)
    }
}

/// Ready background state.
#[derive(Debug, Clone)]
pub struct Background {
    config: BackgroundConfig,
    table: Table,
    tau: Column,
    z: Column,
    t: Column,
    conformal_age: f64,
    age_gyr: f64,
}

impl Background {
    pub fn init(params: &mut ParameterSet, kernels: &dyn Kernels) -> StageResult<Self> {
        let config = BackgroundConfig::from_params(params)?;
        Self::from_config(config, kernels)
    }

    pub fn from_config(config: BackgroundConfig, kernels: &dyn Kernels) -> StageResult<Self> {
        config.validate()?;
        let mut out = TableBuilder::new(config.column_map()?)
            .axis(col::TAU)
            .and_then(|b| b.axis(col::Z))
            .and_then(|b| b.axis(col::T))
            .in_stage(STAGE)?;
        out.reserve(config.table_size);
        kernels.background(&config, &mut out)?;
        let table = out.finish().in_stage(STAGE)?;
        debug!(rows = table.rows(), cols = table.cols(), "background table");

        let tau = table.require(col::TAU).in_stage(STAGE)?;
        let z = table.require(col::Z).in_stage(STAGE)?;
        let t = table.require(col::T).in_stage(STAGE)?;
        let last = table.rows().checked_sub(1).ok_or_else(|| {
            StageError::numerical(STAGE, "kernel produced an empty table")
        })?;
        if table.value(last, z).abs() > 1e-6 {
            return Err(StageError::numerical(
                STAGE,
                format!("table ends at z = {}, not today", table.value(last, z)),
            ));
        }
        let conformal_age = table.value(last, tau);
        let age_gyr = table.value(last, t);
        info!(
            h = config.h,
            age_gyr,
            conformal_age,
            omega_lambda = config.omega0_lambda(),
            "background ready"
        );
        Ok(Self {
            config,
            table,
            tau,
            z,
            t,
            conformal_age,
            age_gyr,
        })
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn has_ncdm(&self) -> bool {
        self.config.has_ncdm()
    }

    pub fn has_lambda(&self) -> bool {
        self.config.has_lambda()
    }

    pub fn has_ur(&self) -> bool {
        self.config.has_ur()
    }

    pub fn h(&self) -> f64 {
        self.config.h
    }

    /// Hubble rate today in 1/Mpc.
    pub fn h0(&self) -> f64 {
        self.config.h0()
    }

    pub fn t_cmb(&self) -> Temperature {
        units::k(self.config.t_cmb)
    }

    /// Conformal time today in Mpc.
    pub fn conformal_age(&self) -> f64 {
        self.conformal_age
    }

    pub fn age(&self) -> Time {
        units::gyr(self.age_gyr)
    }

    pub fn omega0_m(&self) -> f64 {
        self.config.omega0_m()
    }

    pub fn omega0_r(&self) -> f64 {
        self.config.omega0_r()
    }

    pub fn omega0_lambda(&self) -> f64 {
        self.config.omega0_lambda()
    }

    /// Matter-radiation equality.
    pub fn z_eq(&self) -> f64 {
        self.config.omega0_m() / self.config.omega0_r() - 1.0
    }

    /// Largest redshift covered by the table.
    pub fn z_max(&self) -> f64 {
        self.table.value(0, self.z)
    }

    /// Earliest conformal time in the table.
    pub fn tau_min(&self) -> f64 {
        self.table.value(0, self.tau)
    }

    pub fn column(&self, name: &str) -> StageResult<Column> {
        self.table.require(name).map_err(StageError::query(STAGE))
    }

    pub fn at_tau(&self, tau: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<Vec<f64>> {
        self.table
            .interpolate_all(self.tau, tau, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn at_z(&self, z: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<Vec<f64>> {
        self.table
            .interpolate_all(self.z, z, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    /// Selected columns at a conformal time.
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

    pub fn tau_of_z(&self, z: f64) -> StageResult<f64> {
        self.tau_of_z_with(z, InterpMode::Normal, &mut Cursor::default())
    }

    pub fn tau_of_z_with(&self, z: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<f64> {
        self.table
            .interpolate_one(self.z, z, self.tau, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn z_of_tau(&self, tau: f64) -> StageResult<f64> {
        self.z_of_tau_with(tau, InterpMode::Normal, &mut Cursor::default())
    }

    pub fn z_of_tau_with(&self, tau: f64, mode: InterpMode, cursor: &mut Cursor) -> StageResult<f64> {
        self.table
            .interpolate_one(self.tau, tau, self.z, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    /// Proper time at a redshift.
    pub fn time_at_z(&self, z: f64) -> StageResult<Time> {
        let t = self
            .table
            .interpolate_one(self.z, z, self.t, InterpMode::Normal, &mut Cursor::default())
            .map_err(StageError::query(STAGE))?;
        Ok(units::gyr(t))
    }

    /// Export titles; both formats share the native layout.
    pub fn titles(&self, _format: OutputFormat) -> Vec<String> {
        self.table.columns().names().map(str::to_string).collect()
    }

    pub fn data_at_z(&self, z: f64, _format: OutputFormat) -> StageResult<Vec<f64>> {
        self.at_z(z, InterpMode::Normal, &mut Cursor::default())
    }

    /// Every table row, in export layout.
    pub fn export_rows(&self, _format: OutputFormat) -> Vec<Vec<f64>> {
        (0..self.table.rows()).map(|i| self.table.row(i).to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ReferenceKernels;

    fn small() -> BackgroundConfig {
        BackgroundConfig {
            z_max: 1e7,
            table_size: 800,
            ..BackgroundConfig::default()
        }
    }

    #[test]
    fn densities_close_today() {
        let c = BackgroundConfig::default();
        let total = c.omega0_m() + c.omega0_r() + c.omega_k + c.omega0_lambda();
        assert!((total - 1.0).abs() < 1e-14);
        let h0 = c.h0();
        assert!((c.hubble_squared(1.0) - h0 * h0).abs() < 1e-12 * h0 * h0);
    }

    #[test]
    fn config_rejects_bad_values() {
        let bad = BackgroundConfig {
            h: -0.7,
            ..BackgroundConfig::default()
        };
        assert!(matches!(bad.validate(), Err(StageError::Configuration { .. })));
        let closed = BackgroundConfig {
            omega_cdm: 2.0,
            ..BackgroundConfig::default()
        };
        assert!(closed.validate().is_err());
    }

    #[test]
    fn h0_alias_and_conflict() {
        let mut p = ParameterSet::from_pairs("t", [("H0", "70")]).unwrap();
        let c = BackgroundConfig::from_params(&mut p).unwrap();
        assert!((c.h - 0.7).abs() < 1e-15);
        let mut p = ParameterSet::from_pairs("t", [("H0", "70"), ("h", "0.7")]).unwrap();
        assert!(BackgroundConfig::from_params(&mut p).is_err());
    }

    #[test]
    fn reference_table_is_sane() {
        let bg = Background::from_config(small(), &ReferenceKernels).unwrap();
        let age = units::gyr_of(bg.age());
        assert!(age > 12.0 && age < 15.5, "age {age}");
        assert!(bg.conformal_age() > 12_000.0 && bg.conformal_age() < 16_000.0);
        let d = bg.column(col::GROWTH_D).unwrap();
        let last = bg.table().rows() - 1;
        assert!((bg.table().value(last, d) - 1.0).abs() < 1e-12);
        assert!(!bg.has_ncdm());
        assert!(bg.column(col::RHO_NCDM).is_err());
    }

    #[test]
    fn redshift_round_trip() {
        let bg = Background::from_config(small(), &ReferenceKernels).unwrap();
        for z in [0.3, 2.0, 1089.0, 3.0e4] {
            let tau = bg.tau_of_z(z).unwrap();
            let back = bg.z_of_tau(tau).unwrap();
            assert!(((back - z) / z).abs() < 1e-5, "{z} -> {tau} -> {back}");
        }
    }

    #[test]
    fn titles_pair_with_rows() {
        let bg = Background::from_config(small(), &ReferenceKernels).unwrap();
        for format in [OutputFormat::Class, OutputFormat::Camb] {
            let titles = bg.titles(format);
            let row = bg.data_at_z(1.0, format).unwrap();
            assert_eq!(titles.len(), row.len());
            assert_eq!(titles[0], col::Z);
            assert_eq!(row[0], 1.0);
        }
    }

    #[test]
    fn redshift_beyond_table_is_out_of_range() {
        let bg = Background::from_config(small(), &ReferenceKernels).unwrap();
        let err = bg.tau_of_z(1e8).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfRange);
    }
}
