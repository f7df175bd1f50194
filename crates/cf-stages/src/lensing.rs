//! Lensing stage: lensed angular power spectra at every integer multipole.

use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_table::{ColumnMap, Cursor, InterpMode, OutputFormat, Table, TableBuilder};
use tracing::info;

use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::spectra::{Spectra, camb_scale, cl};

const STAGE: StageKind = StageKind::Lensing;

#[derive(Debug, Clone, PartialEq)]
pub struct LensingConfig {
    /// Multipoles dropped at the top of the unlensed range.
    pub margin: usize,
}

impl Default for LensingConfig {
    fn default() -> Self {
        Self { margin: 250 }
    }
}

impl LensingConfig {
    pub fn from_params(params: &mut ParameterSet) -> StageResult<Self> {
        Ok(Self {
            margin: params.usize_or("lensing_margin", Self::default().margin).in_stage(STAGE)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Lensing {
    config: LensingConfig,
    table: Table,
    l_max: usize,
    t_cmb: f64,
}

impl Lensing {
    pub fn init(sp: &Spectra, params: &mut ParameterSet, kernels: &dyn Kernels) -> StageResult<Self> {
        let config = LensingConfig::from_params(params)?;
        Self::from_config(sp, config, kernels)
    }

    pub fn from_config(sp: &Spectra, config: LensingConfig, kernels: &dyn Kernels) -> StageResult<Self> {
        if !sp.has_cl(cl::PP) {
            return Err(StageError::config(STAGE, "lensed spectra need the lensing potential C_l"));
        }
        if !(sp.has_cl(cl::TT) || sp.has_cl(cl::EE)) {
            return Err(StageError::config(STAGE, "lensed spectra need temperature or polarization C_l"));
        }
        let l_max = sp.l_max().saturating_sub(config.margin);
        if l_max < 3 {
            return Err(StageError::config(
                STAGE,
                format!("lensing_margin {} leaves no multipoles below l_max {}", config.margin, sp.l_max()),
            ));
        }
        let t = sp.has_cl(cl::TT);
        let e = sp.has_cl(cl::EE);
        let columns = ColumnMap::builder()
            .push(cl::L)
            .push_if(t, cl::TT)
            .push_if(e, cl::EE)
            .push_if(t && e, cl::TE)
            .push_if(e, cl::BB)
            .push(cl::PP)
            .push_if(t, cl::TP)
            .build()
            .in_stage(STAGE)?;
        let mut out = TableBuilder::new(columns).axis(cl::L).in_stage(STAGE)?;
        out.reserve(l_max - 1);
        kernels.lensing(sp, &config, &mut out)?;
        let table = out.finish().in_stage(STAGE)?;
        let l_col = table.require(cl::L).in_stage(STAGE)?;
        if table.range(l_col) != Some((2.0, l_max as f64)) {
            return Err(StageError::numerical(
                STAGE,
                format!("lensed table must span l = 2..{l_max}"),
            ));
        }
        info!(l_max, "lensing ready");
        Ok(Self {
            config,
            table,
            l_max,
            t_cmb: sp.t_cmb(),
        })
    }

    pub fn config(&self) -> &LensingConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn l_max(&self) -> usize {
        self.l_max
    }

    pub fn has_cl(&self, name: &str) -> bool {
        self.table.columns().index(name).is_some()
    }

    /// Enabled lensed C_l types, without the multipole column.
    pub fn cl_types(&self) -> Vec<&str> {
        self.table.columns().names().skip(1).collect()
    }

    pub fn lensed_cl_at_l(&self, l: f64) -> StageResult<Vec<f64>> {
        let l_col = self.table.require(cl::L).map_err(StageError::query(STAGE))?;
        let mut row = self
            .table
            .interpolate_all(l_col, l, InterpMode::Normal, &mut Cursor::default())
            .map_err(StageError::query(STAGE))?;
        row.remove(0);
        Ok(row)
    }

    fn exported(&self, format: OutputFormat) -> Vec<&str> {
        match format {
            OutputFormat::Class => self.cl_types(),
            OutputFormat::Camb => [cl::TT, cl::EE, cl::BB, cl::TE]
                .into_iter()
                .filter(|name| self.has_cl(name))
                .collect(),
        }
    }

    pub fn titles(&self, format: OutputFormat) -> Vec<String> {
        let mut titles = vec![match format {
            OutputFormat::Class => "l".to_string(),
            OutputFormat::Camb => "L".to_string(),
        }];
        for name in self.exported(format) {
            titles.push(match (format, name) {
                (OutputFormat::Class, cl::PP) => "phiphi".to_string(),
                (OutputFormat::Class, cl::TP) => "TPhi".to_string(),
                _ => name.to_string(),
            });
        }
        titles
    }

    pub fn cl_data(&self, l: f64, format: OutputFormat) -> StageResult<Vec<f64>> {
        let values = self.lensed_cl_at_l(l)?;
        let types = self.cl_types();
        let mut row = vec![l];
        for name in self.exported(format) {
            let i = types.iter().position(|t| *t == name).ok_or_else(|| {
                StageError::numerical(STAGE, format!("lensed column '{name}' missing"))
            })?;
            row.push(match format {
                OutputFormat::Class => values[i],
                OutputFormat::Camb => camb_scale(name, l, self.t_cmb) * values[i],
            });
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_defaults_and_reads() {
        let mut p = ParameterSet::new("t");
        assert_eq!(LensingConfig::from_params(&mut p).unwrap().margin, 250);
        let mut p = ParameterSet::from_pairs("t", [("lensing_margin", "100")]).unwrap();
        assert_eq!(LensingConfig::from_params(&mut p).unwrap().margin, 100);
    }
}
