//! Primordial stage: curvature and isocurvature spectra over ln k.

use cf_core::StageKind;
use cf_core::numeric::linspace;
use cf_params::ParameterSet;
use cf_table::{Column, ColumnMap, Cursor, InterpMode, OutputFormat, Table, TableBuilder};
use tracing::info;

use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::perturbations::{InitialCondition, Perturbations};

const STAGE: StageKind = StageKind::Primordial;

pub mod col {
    pub const LN_K: &str = "ln k";
    pub const LN_P_AD: &str = "ln P_ad";
    pub const LN_P_CDI: &str = "ln P_cdi";
    pub const LN_P_T: &str = "ln P_t";
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimordialConfig {
    pub a_s: f64,
    pub n_s: f64,
    pub alpha_s: f64,
    pub k_pivot: f64,
    pub f_cdi: f64,
    pub n_cdi: f64,
    /// Tensor-to-scalar ratio; zero disables the tensor column.
    pub r: f64,
    pub n_t: f64,
    pub k_per_decade: usize,
    pub has_cdi: bool,
}

impl Default for PrimordialConfig {
    fn default() -> Self {
        Self {
            a_s: 2.215e-9,
            n_s: 0.9619,
            alpha_s: 0.0,
            k_pivot: 0.05,
            f_cdi: 1.0,
            n_cdi: 1.0,
            r: 0.0,
            n_t: 0.0,
            k_per_decade: 10,
            has_cdi: false,
        }
    }
}

impl PrimordialConfig {
    pub fn from_params(has_cdi: bool, params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let a_s = match (
            params.read_f64("A_s").in_stage(STAGE)?,
            params.read_f64("ln10^{10}A_s").in_stage(STAGE)?,
        ) {
            (Some(_), Some(_)) => {
                return Err(StageError::config(STAGE, "give either A_s or ln10^{10}A_s, not both"));
            }
            (Some(a), None) => a,
            (None, Some(l)) => l.exp() * 1e-10,
            (None, None) => d.a_s,
        };
        let r = params.f64_or("r", d.r).in_stage(STAGE)?;
        let cfg = Self {
            a_s,
            n_s: params.f64_or("n_s", d.n_s).in_stage(STAGE)?,
            alpha_s: params.f64_or("alpha_s", d.alpha_s).in_stage(STAGE)?,
            k_pivot: params.f64_or("k_pivot", d.k_pivot).in_stage(STAGE)?,
            f_cdi: if has_cdi {
                params.f64_or("f_cdi", d.f_cdi).in_stage(STAGE)?
            } else {
                d.f_cdi
            },
            n_cdi: if has_cdi {
                params.f64_or("n_cdi", d.n_cdi).in_stage(STAGE)?
            } else {
                d.n_cdi
            },
            r,
            // consistency relation unless given
            n_t: params.f64_or("n_t", -r / 8.0).in_stage(STAGE)?,
            k_per_decade: params
                .usize_or("k_per_decade_primordial", d.k_per_decade)
                .in_stage(STAGE)?,
            has_cdi,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        if !(self.a_s > 0.0) || !(self.k_pivot > 0.0) {
            return Err(StageError::config(STAGE, "A_s and k_pivot must be positive"));
        }
        if !(self.f_cdi >= 0.0) || !(self.r >= 0.0) {
            return Err(StageError::config(STAGE, "f_cdi and r must be non-negative"));
        }
        if self.k_per_decade < 2 {
            return Err(StageError::config(STAGE, "k_per_decade_primordial must be at least 2"));
        }
        Ok(())
    }

    pub fn has_tensors(&self) -> bool {
        self.r > 0.0
    }

    /// Analytic `ln P_R(k)` for the adiabatic mode.
    pub fn ln_p_ad(&self, ln_k: f64) -> f64 {
        let x = ln_k - self.k_pivot.ln();
        self.a_s.ln() + (self.n_s - 1.0) * x + 0.5 * self.alpha_s * x * x
    }

    pub fn ln_p_cdi(&self, ln_k: f64) -> f64 {
        let x = ln_k - self.k_pivot.ln();
        (self.f_cdi * self.f_cdi * self.a_s).max(f64::MIN_POSITIVE).ln() + (self.n_cdi - 1.0) * x
    }

    pub fn ln_p_t(&self, ln_k: f64) -> f64 {
        let x = ln_k - self.k_pivot.ln();
        (self.r * self.a_s).ln() + self.n_t * x
    }
}

#[derive(Debug, Clone)]
pub struct Primordial {
    config: PrimordialConfig,
    table: Table,
    ln_k: Column,
    /// Spectrum column for each initial condition, in perturbation order.
    ic_cols: Vec<Column>,
    tensors: Option<Column>,
}

impl Primordial {
    pub fn init(pt: &Perturbations, params: &mut ParameterSet, kernels: &dyn Kernels) -> StageResult<Self> {
        let config = PrimordialConfig::from_params(pt.has_cdi(), params)?;
        Self::from_config(pt, config, kernels)
    }

    pub fn from_config(pt: &Perturbations, config: PrimordialConfig, kernels: &dyn Kernels) -> StageResult<Self> {
        config.validate()?;
        let columns = ColumnMap::builder()
            .push(col::LN_K)
            .push(col::LN_P_AD)
            .push_if(config.has_cdi, col::LN_P_CDI)
            .push_if(config.has_tensors(), col::LN_P_T)
            .build()
            .in_stage(STAGE)?;

        let (k_min, k_max) = pt.k_range();
        let (lo, hi) = (k_min.ln(), k_max.ln());
        let n = (((hi - lo) / std::f64::consts::LN_10 * config.k_per_decade as f64).ceil() as usize + 1).max(4);
        let ln_k = linspace(lo, hi, n);

        let mut out = TableBuilder::new(columns).axis(col::LN_K).in_stage(STAGE)?;
        out.reserve(n);
        kernels.primordial(&config, &ln_k, &mut out)?;
        let table = out.finish().in_stage(STAGE)?;

        let mut ic_cols = Vec::new();
        for ic in pt.ics() {
            let name = match ic {
                InitialCondition::Adiabatic => col::LN_P_AD,
                InitialCondition::CdmIsocurvature => col::LN_P_CDI,
            };
            ic_cols.push(table.require(name).in_stage(STAGE)?);
        }
        let tensors = table.columns().index(col::LN_P_T);
        let ln_k = table.require(col::LN_K).in_stage(STAGE)?;
        info!(a_s = config.a_s, n_s = config.n_s, rows = table.rows(), "primordial ready");
        Ok(Self {
            config,
            table,
            ln_k,
            ic_cols,
            tensors,
        })
    }

    pub fn config(&self) -> &PrimordialConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn has_tensors(&self) -> bool {
        self.tensors.is_some()
    }

    pub fn ic_count(&self) -> usize {
        self.ic_cols.len()
    }

    /// Dimensionless spectrum of initial condition `ic` at `k`.
    pub fn spectrum_at(&self, k: f64, ic: usize) -> StageResult<f64> {
        self.spectrum_at_with(k, ic, InterpMode::Normal, &mut Cursor::default())
    }

    pub fn spectrum_at_with(&self, k: f64, ic: usize, mode: InterpMode, cursor: &mut Cursor) -> StageResult<f64> {
        self.spectrum_at_ln_k(k.ln(), ic, mode, cursor)
    }

    pub fn spectrum_at_ln_k(&self, ln_k: f64, ic: usize, mode: InterpMode, cursor: &mut Cursor) -> StageResult<f64> {
        let col = *self.ic_cols.get(ic).ok_or_else(|| {
            StageError::config(STAGE, format!("initial condition index {ic} out of range"))
        })?;
        let ln_p = self
            .table
            .interpolate_one(self.ln_k, ln_k, col, mode, cursor)
            .map_err(StageError::query(STAGE))?;
        Ok(ln_p.exp())
    }

    pub fn titles(&self, _format: OutputFormat) -> Vec<String> {
        let mut titles = vec!["k [1/Mpc]".to_string(), "P_scalar(k)".to_string()];
        if self.config.has_cdi {
            titles.push("P_cdi(k)".to_string());
        }
        if self.has_tensors() {
            titles.push("P_tensor(k)".to_string());
        }
        titles
    }

    pub fn data_at_k(&self, k: f64, _format: OutputFormat) -> StageResult<Vec<f64>> {
        let values = self
            .table
            .interpolate_all(self.ln_k, k.ln(), InterpMode::Normal, &mut Cursor::default())
            .map_err(StageError::query(STAGE))?;
        let mut row = vec![k];
        // remaining columns are logarithms, in title order
        row.extend(values.iter().skip(1).map(|v| v.exp()));
        Ok(row)
    }

    pub fn export_rows(&self, format: OutputFormat) -> StageResult<Vec<Vec<f64>>> {
        (0..self.table.rows())
            .map(|i| self.data_at_k(self.table.value(i, self.ln_k).exp(), format))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_amplitude_and_tilt() {
        let c = PrimordialConfig::default();
        let lp = c.k_pivot.ln();
        assert!((c.ln_p_ad(lp) - c.a_s.ln()).abs() < 1e-12);
        let ratio = (c.ln_p_ad(lp + 1.0) - c.ln_p_ad(lp)).exp();
        assert!((ratio - (c.n_s - 1.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn log_amplitude_alias() {
        let mut p = ParameterSet::from_pairs("t", [("ln10^{10}A_s", "3.0")]).unwrap();
        let c = PrimordialConfig::from_params(false, &mut p).unwrap();
        assert!((c.a_s - 3.0_f64.exp() * 1e-10).abs() < 1e-20);
        assert!(!c.has_tensors());
    }

    #[test]
    fn cdi_parameters_only_read_with_cdi() {
        let mut p = ParameterSet::from_pairs("t", [("f_cdi", "0.5")]).unwrap();
        PrimordialConfig::from_params(false, &mut p).unwrap();
        assert_eq!(p.unused().len(), 1);
        let c = PrimordialConfig::from_params(true, &mut p).unwrap();
        assert_eq!(c.f_cdi, 0.5);
    }
}
