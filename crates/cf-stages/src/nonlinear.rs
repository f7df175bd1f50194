//! Nonlinear stage: correction factors `sqrt(P_nl / P_lin)` over (k, tau).

use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_table::{Cursor, Cursor2, Grid2, InterpMode, OutputFormat, interp_slice};
use tracing::info;

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::perturbations::Perturbations;
use crate::primordial::Primordial;

const STAGE: StageKind = StageKind::Nonlinear;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonlinearMethod {
    #[default]
    None,
    Halofit,
    Hmcode,
}

impl NonlinearMethod {
    pub fn name(self) -> &'static str {
        match self {
            NonlinearMethod::None => "none",
            NonlinearMethod::Halofit => "halofit",
            NonlinearMethod::Hmcode => "hmcode",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonlinearConfig {
    pub method: NonlinearMethod,
    /// Bracket for the nonlinear-scale search, in Mpc.
    pub r_min: f64,
    pub r_max: f64,
}

impl NonlinearConfig {
    pub fn from_params(method: NonlinearMethod, params: &mut ParameterSet) -> StageResult<Self> {
        let cfg = Self {
            method,
            r_min: params.f64_or("nonlinear_r_min", 1e-3).in_stage(STAGE)?,
            r_max: params.f64_or("nonlinear_r_max", 1e3).in_stage(STAGE)?,
        };
        if cfg.method == NonlinearMethod::None {
            return Err(StageError::config(STAGE, "non_linear = none does not need this stage"));
        }
        if !(cfg.r_min > 0.0 && cfg.r_max > cfg.r_min) {
            return Err(StageError::config(STAGE, "need 0 < nonlinear_r_min < nonlinear_r_max"));
        }
        Ok(cfg)
    }

    /// `(amplitude, slope)` of `P_nl / P_lin = 1 + A (k / k_nl)^n`.
    pub fn coefficients(&self) -> (f64, f64) {
        match self.method {
            NonlinearMethod::Hmcode => (0.7, 1.7),
            _ => (0.8, 1.6),
        }
    }
}

/// Sampling handed to the nonlinear kernel.
#[derive(Debug, Clone)]
pub struct NonlinearLayout {
    pub ln_k: Vec<f64>,
    /// Perturbation conformal-time indices, increasing.
    pub tau_index: Vec<usize>,
    pub tau: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NonlinearOutput {
    /// `[itau * nk + ik]`.
    pub ratio: Vec<f64>,
    pub k_nl: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Nonlinear {
    config: NonlinearConfig,
    ratio: Grid2,
    k_nl: Vec<f64>,
}

impl Nonlinear {
    pub fn init(
        bg: &Background,
        pt: &Perturbations,
        pm: &Primordial,
        method: NonlinearMethod,
        params: &mut ParameterSet,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        let config = NonlinearConfig::from_params(method, params)?;
        Self::from_config(bg, pt, pm, config, kernels)
    }

    pub fn from_config(
        bg: &Background,
        pt: &Perturbations,
        pm: &Primordial,
        config: NonlinearConfig,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        if !pt.has_pk_matter() {
            return Err(StageError::config(STAGE, "nonlinear corrections need mPk output"));
        }
        let tau_index: Vec<usize> = (pt.pk_first_tau()..pt.tau().len()).collect();
        let layout = NonlinearLayout {
            ln_k: pt.k().iter().map(|k| k.ln()).collect(),
            tau: tau_index.iter().map(|&i| pt.tau()[i]).collect(),
            tau_index,
        };
        let out = kernels.nonlinear(bg, pt, pm, &config, &layout)?;
        if out.k_nl.len() != layout.tau.len() {
            return Err(StageError::numerical(
                STAGE,
                format!("kernel returned {} k_nl values for {} times", out.k_nl.len(), layout.tau.len()),
            ));
        }
        if let Some(k) = out.k_nl.iter().find(|k| !(k.is_finite() && **k > 0.0)) {
            return Err(StageError::numerical(STAGE, format!("non-positive k_nl = {k}")));
        }
        let ratio = Grid2::new("ln k", layout.ln_k, "tau", layout.tau, out.ratio).in_stage(STAGE)?;
        info!(
            method = config.method.name(),
            k_nl_today = out.k_nl.last().copied().unwrap_or(f64::NAN),
            "nonlinear ready"
        );
        Ok(Self {
            config,
            ratio,
            k_nl: out.k_nl,
        })
    }

    pub fn config(&self) -> &NonlinearConfig {
        &self.config
    }

    pub fn method(&self) -> NonlinearMethod {
        self.config.method
    }

    /// Earliest conformal time with a correction.
    pub fn tau_min(&self) -> f64 {
        self.ratio.y()[0]
    }

    pub fn correction_at(&self, k: f64, tau: f64, mode: InterpMode, cursor: &mut Cursor2) -> StageResult<f64> {
        self.correction_at_ln_k(k.ln(), tau, mode, cursor)
    }

    /// `sqrt(P_nl / P_lin)` on the grid's own `ln k` axis.
    pub fn correction_at_ln_k(
        &self,
        ln_k: f64,
        tau: f64,
        mode: InterpMode,
        cursor: &mut Cursor2,
    ) -> StageResult<f64> {
        self.ratio
            .interpolate(ln_k, tau, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    pub fn k_nl_at(&self, tau: f64) -> StageResult<f64> {
        interp_slice("tau", self.ratio.y(), &self.k_nl, tau, InterpMode::Normal, &mut Cursor::default())
            .map_err(StageError::query(STAGE))
    }

    pub fn titles(&self, _format: OutputFormat) -> Vec<String> {
        ["k [1/Mpc]", "z", "sqrt(P_nl/P_lin)", "k_nl [1/Mpc]"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn data_at_k_z(&self, bg: &Background, k: f64, z: f64, _format: OutputFormat) -> StageResult<Vec<f64>> {
        let tau = bg.tau_of_z(z)?;
        let r = self.correction_at(k, tau, InterpMode::Normal, &mut Cursor2::default())?;
        Ok(vec![k, z, r, self.k_nl_at(tau)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_method_is_rejected() {
        let mut p = ParameterSet::new("t");
        let err = NonlinearConfig::from_params(NonlinearMethod::None, &mut p).unwrap_err();
        assert!(matches!(err, StageError::Configuration { .. }));
    }

    #[test]
    fn methods_differ_by_coefficients() {
        let mut p = ParameterSet::new("t");
        let a = NonlinearConfig::from_params(NonlinearMethod::Halofit, &mut p).unwrap();
        let b = NonlinearConfig::from_params(NonlinearMethod::Hmcode, &mut p).unwrap();
        assert_ne!(a.coefficients(), b.coefficients());
    }
}
