//! Transfer stage: line-of-sight projection of sources onto multipoles.

use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_table::{Column, ColumnMap, Cursor2, Grid2, InterpMode, OutputFormat};
use tracing::{debug, info};

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::perturbations::{Perturbations, source};
use crate::thermodynamics::Thermodynamics;

const STAGE: StageKind = StageKind::Transfer;

/// Transfer-type names and the source each one projects.
pub mod ttype {
    pub const T: &str = "t";
    pub const E: &str = "e";
    pub const LENS: &str = "lens";
}

pub(crate) fn source_of(ttype_name: &str) -> Option<&'static str> {
    match ttype_name {
        ttype::T => Some(source::T0),
        ttype::E => Some(source::P),
        ttype::LENS => Some(source::PHI_PLUS_PSI),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    pub l_max: usize,
    pub l_logstep: f64,
    pub l_linstep: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            l_max: 2500,
            l_logstep: 1.12,
            l_linstep: 40,
        }
    }
}

impl TransferConfig {
    pub fn from_params(params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let cfg = Self {
            l_max: params.usize_or("l_max_scalars", d.l_max).in_stage(STAGE)?,
            l_logstep: params.f64_or("l_logstep", d.l_logstep).in_stage(STAGE)?,
            l_linstep: params.usize_or("l_linstep", d.l_linstep).in_stage(STAGE)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        // two sampled multipoles at least, or C_l cannot be interpolated
        if self.l_max < 3 {
            return Err(StageError::config(STAGE, "l_max_scalars must be at least 3"));
        }
        if !(self.l_logstep > 1.0) || self.l_linstep == 0 {
            return Err(StageError::config(STAGE, "need l_logstep > 1 and l_linstep >= 1"));
        }
        Ok(())
    }

    /// Sampled multipoles: logarithmic steps until they exceed `l_linstep`,
    /// then linear steps, always ending on `l_max`.
    pub fn l_samples(&self) -> Vec<usize> {
        let mut ls = vec![2];
        let mut l = 2;
        loop {
            let log_next = (l as f64 * self.l_logstep) as usize;
            let next = log_next.min(l + self.l_linstep).max(l + 1);
            if next >= self.l_max {
                break;
            }
            ls.push(next);
            l = next;
        }
        if l < self.l_max {
            ls.push(self.l_max);
        }
        ls
    }
}

#[derive(Debug, Clone)]
pub struct TransferLayout {
    pub ln_k: Vec<f64>,
    pub l: Vec<usize>,
    pub types: ColumnMap,
    pub ics: usize,
}

impl TransferLayout {
    pub fn plane(&self, ic: usize, ty: Column) -> usize {
        ic * self.types.len() + ty.offset()
    }

    pub fn plane_count(&self) -> usize {
        self.ics * self.types.len()
    }
}

#[derive(Debug, Clone)]
pub struct Transfer {
    config: TransferConfig,
    l: Vec<usize>,
    types: ColumnMap,
    ics: usize,
    grids: Vec<Grid2>,
}

impl Transfer {
    pub fn init(
        bg: &Background,
        th: &Thermodynamics,
        pt: &Perturbations,
        params: &mut ParameterSet,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        let config = TransferConfig::from_params(params)?;
        Self::from_config(bg, th, pt, config, kernels)
    }

    pub fn from_config(
        bg: &Background,
        th: &Thermodynamics,
        pt: &Perturbations,
        config: TransferConfig,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        config.validate()?;
        if !pt.has_cls() {
            return Err(StageError::config(STAGE, "no angular spectrum was requested"));
        }
        let types = ColumnMap::builder()
            .push_if(pt.has_cl_cmb_temperature(), ttype::T)
            .push_if(pt.has_cl_cmb_polarization(), ttype::E)
            .push_if(pt.has_cl_cmb_lensing_potential(), ttype::LENS)
            .build()
            .in_stage(STAGE)?;
        let layout = TransferLayout {
            ln_k: pt.k().iter().map(|k| k.ln()).collect(),
            l: config.l_samples(),
            types,
            ics: pt.ics().len(),
        };
        let planes = kernels.transfer(bg, th, pt, &config, &layout)?;
        if planes.len() != layout.plane_count() {
            return Err(StageError::numerical(
                STAGE,
                format!("kernel returned {} planes, expected {}", planes.len(), layout.plane_count()),
            ));
        }
        let l_axis: Vec<f64> = layout.l.iter().map(|&l| l as f64).collect();
        let mut grids = Vec::with_capacity(planes.len());
        for values in planes {
            grids.push(Grid2::new("ln k", layout.ln_k.clone(), "l", l_axis.clone(), values).in_stage(STAGE)?);
        }
        debug!(nl = layout.l.len(), nk = layout.ln_k.len(), "transfer grids");
        info!(l_max = config.l_max, types = layout.types.len(), "transfer ready");
        Ok(Self {
            config,
            l: layout.l,
            types: layout.types,
            ics: layout.ics,
            grids,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn l_values(&self) -> &[usize] {
        &self.l
    }

    pub fn l_max(&self) -> usize {
        self.config.l_max
    }

    pub fn ics(&self) -> usize {
        self.ics
    }

    pub fn types(&self) -> &ColumnMap {
        &self.types
    }

    pub fn has_temperature(&self) -> bool {
        self.types.index(ttype::T).is_some()
    }

    pub fn has_polarization(&self) -> bool {
        self.types.index(ttype::E).is_some()
    }

    pub fn has_lensing_potential(&self) -> bool {
        self.types.index(ttype::LENS).is_some()
    }

    pub fn grid(&self, ic: usize, type_name: &str) -> StageResult<&Grid2> {
        let ty = self.types.require(type_name).map_err(StageError::query(STAGE))?;
        if ic >= self.ics {
            return Err(StageError::config(STAGE, format!("initial condition index {ic} out of range")));
        }
        Ok(&self.grids[ic * self.types.len() + ty.offset()])
    }

    /// Transfer function at an arbitrary `(k, l)` inside the sampled ranges.
    pub fn transfer_at(&self, ic: usize, type_name: &str, k: f64, l: f64) -> StageResult<f64> {
        self.grid(ic, type_name)?
            .interpolate(k.ln(), l, InterpMode::Normal, &mut Cursor2::default())
            .map_err(StageError::query(STAGE))
    }

    pub fn titles(&self, _format: OutputFormat) -> Vec<String> {
        let mut titles = vec!["k [1/Mpc]".to_string()];
        for ic in 0..self.ics {
            for name in self.types.names() {
                titles.push(if self.ics > 1 {
                    format!("Delta_{name}[{ic}]")
                } else {
                    format!("Delta_{name}")
                });
            }
        }
        titles
    }

    pub fn data_at(&self, l: f64, k: f64, format: OutputFormat) -> StageResult<Vec<f64>> {
        let mut row = vec![k];
        for ic in 0..self.ics {
            for name in self.types.names() {
                row.push(self.transfer_at(ic, name, k, l)?);
            }
        }
        debug_assert_eq!(row.len(), self.titles(format).len());
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn l_sampling_is_log_then_linear() {
        let ls = TransferConfig::default().l_samples();
        assert_eq!(ls[0], 2);
        assert_eq!(*ls.last().unwrap(), 2500);
        assert!(ls.windows(2).all(|w| w[1] > w[0]));
        assert!(ls.windows(2).all(|w| w[1] - w[0] <= 40));
        assert!(ls[..5].windows(2).all(|w| w[1] - w[0] == 1));
    }

    #[test]
    fn small_l_max_still_ends_on_it() {
        let cfg = TransferConfig {
            l_max: 3,
            ..TransferConfig::default()
        };
        assert_eq!(cfg.l_samples(), vec![2, 3]);
    }

    #[test]
    fn single_multipole_is_a_configuration_error() {
        let cfg = TransferConfig {
            l_max: 2,
            ..TransferConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);
        let mut p = ParameterSet::from_pairs("t", [("l_max_scalars", "2")]).unwrap();
        assert!(TransferConfig::from_params(&mut p).is_err());
    }
}
