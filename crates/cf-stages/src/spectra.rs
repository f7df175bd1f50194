//! Spectra stage: angular power spectra and matter power spectra.
//!
//! C_l rows live at the multipoles the transfer stage sampled, one table per
//! initial condition plus their sum. Matter spectra are stored as `ln P`
//! grids over `(ln k, tau)` for the conformal times at or after the earliest
//! requested P(k) redshift.

use std::f64::consts::PI;

use cf_core::{StageKind, kelvin_of};
use cf_table::{ColumnMap, Cursor, Cursor2, Grid2, InterpMode, OutputFormat, Table, TableBuilder};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::matter::{Tracer, linear_pk_row, sigma_from_pk};
use crate::nonlinear::Nonlinear;
use crate::perturbations::Perturbations;
use crate::primordial::Primordial;
use crate::transfer::Transfer;

const STAGE: StageKind = StageKind::Spectra;

/// C_l column names.
pub mod cl {
    pub const L: &str = "l";
    pub const TT: &str = "TT";
    pub const EE: &str = "EE";
    pub const TE: &str = "TE";
    pub const BB: &str = "BB";
    pub const PP: &str = "PP";
    pub const TP: &str = "TP";
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PkMode {
    #[default]
    Linear,
    Nonlinear,
}

/// Matter power at one `(k, z)`, in Mpc^3.
#[derive(Clone, Debug, PartialEq)]
pub struct PkValue {
    pub total: f64,
    pub per_ic: Vec<f64>,
    pub cb: Option<f64>,
}

/// C_l at one multipole, in the order of [`Spectra::cl_types`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClValue {
    pub total: Vec<f64>,
    pub per_ic: Vec<Vec<f64>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpectraDerived {
    pub sigma8: Option<f64>,
    pub sigma8_cb: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Spectra {
    h: f64,
    t_cmb: f64,
    ic_names: Vec<&'static str>,
    cl_total: Option<Table>,
    cl_per_ic: Vec<Table>,
    l_max: usize,
    ln_k: Vec<f64>,
    pk: Vec<Grid2>,
    pk_cb: Vec<Grid2>,
    derived: SpectraDerived,
}

fn ln_pk_grid(
    pt: &Perturbations,
    pm: &Primordial,
    tracer: Tracer,
    ic: usize,
    ln_k: &[f64],
    tau: &[f64],
) -> StageResult<Grid2> {
    let mut values = Vec::with_capacity(ln_k.len() * tau.len());
    for itau in pt.pk_first_tau()..pt.tau().len() {
        values.extend(
            linear_pk_row(pt, pm, tracer, ic, itau)?
                .into_iter()
                .map(|p| p.max(f64::MIN_POSITIVE).ln()),
        );
    }
    Grid2::new("ln k", ln_k.to_vec(), "tau", tau.to_vec(), values).in_stage(STAGE)
}

impl Spectra {
    pub fn init(
        bg: &Background,
        pt: &Perturbations,
        pm: &Primordial,
        tr: Option<&Transfer>,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        let ic_names: Vec<&'static str> = pt.ics().iter().map(|ic| ic.name()).collect();
        let mut cl_per_ic = Vec::new();
        let mut cl_total = None;
        let mut l_max = 0;
        if pt.has_cls() {
            let tr = tr.ok_or(StageError::Dependency {
                stage: STAGE,
                needs: StageKind::Transfer,
            })?;
            let columns = Self::cl_columns(tr)?;
            for ic in 0..tr.ics() {
                let mut out = TableBuilder::new(columns.clone()).axis(cl::L).in_stage(STAGE)?;
                out.reserve(tr.l_values().len());
                kernels.spectra(pm, tr, ic, &mut out)?;
                let table = out.finish().in_stage(STAGE)?;
                if table.rows() != tr.l_values().len() {
                    return Err(StageError::numerical(
                        STAGE,
                        format!("kernel returned {} C_l rows for {} multipoles", table.rows(), tr.l_values().len()),
                    ));
                }
                cl_per_ic.push(table);
            }
            cl_total = Some(Self::sum_tables(&columns, &cl_per_ic)?);
            l_max = tr.l_max();
        }

        let mut ln_k = Vec::new();
        let mut pk = Vec::new();
        let mut pk_cb = Vec::new();
        if pt.has_pk_matter() {
            ln_k = pt.k().iter().map(|k| k.ln()).collect();
            let tau = &pt.tau()[pt.pk_first_tau()..];
            for ic in 0..pt.ics().len() {
                pk.push(ln_pk_grid(pt, pm, Tracer::Matter, ic, &ln_k, tau)?);
                if pt.has_pk_cb() {
                    pk_cb.push(ln_pk_grid(pt, pm, Tracer::Cb, ic, &ln_k, tau)?);
                }
            }
        }

        let mut spectra = Self {
            h: bg.h(),
            t_cmb: kelvin_of(bg.t_cmb()),
            ic_names,
            cl_total,
            cl_per_ic,
            l_max,
            ln_k,
            pk,
            pk_cb,
            derived: SpectraDerived::default(),
        };
        if spectra.has_pk_matter() {
            let r8 = 8.0 / spectra.h;
            let tau0 = pt.tau()[pt.tau().len() - 1];
            spectra.derived.sigma8 = Some(spectra.sigma_at_tau(None, r8, tau0, Tracer::Matter, PkMode::Linear)?);
            if spectra.has_pk_cb() {
                spectra.derived.sigma8_cb = Some(spectra.sigma_at_tau(None, r8, tau0, Tracer::Cb, PkMode::Linear)?);
            }
        }
        debug!(
            cl_rows = spectra.cl_total.as_ref().map_or(0, Table::rows),
            pk_grids = spectra.pk.len() + spectra.pk_cb.len(),
            "spectra tables"
        );
        info!(
            sigma8 = spectra.derived.sigma8.unwrap_or(f64::NAN),
            l_max = spectra.l_max,
            "spectra ready"
        );
        Ok(spectra)
    }

    fn cl_columns(tr: &Transfer) -> StageResult<ColumnMap> {
        let t = tr.has_temperature();
        let e = tr.has_polarization();
        let p = tr.has_lensing_potential();
        ColumnMap::builder()
            .push(cl::L)
            .push_if(t, cl::TT)
            .push_if(e, cl::EE)
            .push_if(t && e, cl::TE)
            .push_if(p, cl::PP)
            .push_if(t && p, cl::TP)
            .build()
            .in_stage(STAGE)
    }

    /// Uncorrelated initial conditions add.
    fn sum_tables(columns: &ColumnMap, tables: &[Table]) -> StageResult<Table> {
        let first = tables
            .first()
            .ok_or_else(|| StageError::numerical(STAGE, "no C_l tables to sum"))?;
        let mut out = TableBuilder::new(columns.clone()).axis(cl::L).in_stage(STAGE)?;
        for i in 0..first.rows() {
            let mut row = first.row(i).to_vec();
            for t in &tables[1..] {
                for (acc, v) in row.iter_mut().zip(t.row(i)).skip(1) {
                    *acc += v;
                }
            }
            out.push_row(&row).in_stage(STAGE)?;
        }
        out.finish().in_stage(STAGE)
    }

    pub fn derived(&self) -> &SpectraDerived {
        &self.derived
    }

    pub fn has_cls(&self) -> bool {
        self.cl_total.is_some()
    }

    pub fn has_pk_matter(&self) -> bool {
        !self.pk.is_empty()
    }

    pub fn has_pk_cb(&self) -> bool {
        !self.pk_cb.is_empty()
    }

    pub fn has_cl(&self, name: &str) -> bool {
        self.cl_total
            .as_ref()
            .is_some_and(|t| t.columns().index(name).is_some())
    }

    pub fn l_max(&self) -> usize {
        self.l_max
    }

    pub fn ic_count(&self) -> usize {
        self.ic_names.len()
    }

    pub fn t_cmb(&self) -> f64 {
        self.t_cmb
    }

    pub fn k_values(&self) -> Vec<f64> {
        self.ln_k.iter().map(|l| l.exp()).collect()
    }

    fn cl_table(&self) -> StageResult<&Table> {
        self.cl_total
            .as_ref()
            .ok_or_else(|| StageError::config(STAGE, "no angular spectrum was requested"))
    }

    /// Enabled C_l types, without the multipole column.
    pub fn cl_types(&self) -> Vec<&str> {
        self.cl_total
            .as_ref()
            .map(|t| t.columns().names().skip(1).collect())
            .unwrap_or_default()
    }

    /// Sampled multipoles.
    pub fn l_values(&self) -> Vec<f64> {
        self.cl_total
            .as_ref()
            .and_then(|t| t.require(cl::L).ok().map(|c| t.column_vec(c)))
            .unwrap_or_default()
    }

    pub fn cl_at_l(&self, l: f64) -> StageResult<ClValue> {
        let total = self.cl_row(self.cl_table()?, l)?;
        let per_ic = self
            .cl_per_ic
            .iter()
            .map(|t| self.cl_row(t, l))
            .collect::<StageResult<Vec<_>>>()?;
        Ok(ClValue { total, per_ic })
    }

    fn cl_row(&self, table: &Table, l: f64) -> StageResult<Vec<f64>> {
        let l_col = table.require(cl::L).map_err(StageError::query(STAGE))?;
        let mut row = table
            .interpolate_all(l_col, l, InterpMode::Normal, &mut Cursor::default())
            .map_err(StageError::query(STAGE))?;
        row.remove(0);
        Ok(row)
    }

    pub fn cl_titles(&self, format: OutputFormat) -> Vec<String> {
        let mut titles = vec![match format {
            OutputFormat::Class => "l".to_string(),
            OutputFormat::Camb => "L".to_string(),
        }];
        for name in self.cl_types() {
            titles.push(match (format, name) {
                (OutputFormat::Class, cl::PP) => "phiphi".to_string(),
                (OutputFormat::Class, cl::TP) => "TPhi".to_string(),
                _ => name.to_string(),
            });
        }
        titles
    }

    pub fn cl_data(&self, l: f64, format: OutputFormat) -> StageResult<Vec<f64>> {
        let values = self.cl_at_l(l)?.total;
        let mut row = vec![l];
        for (name, v) in self.cl_types().into_iter().zip(values) {
            row.push(match format {
                OutputFormat::Class => v,
                OutputFormat::Camb => camb_scale(name, l, self.t_cmb) * v,
            });
        }
        Ok(row)
    }

    fn grids(&self, tracer: Tracer) -> StageResult<&[Grid2]> {
        let grids = match tracer {
            Tracer::Matter => &self.pk,
            Tracer::Cb => &self.pk_cb,
        };
        if grids.is_empty() {
            return Err(StageError::config(
                STAGE,
                format!("no P(k) was computed for tracer '{}'", tracer.name()),
            ));
        }
        Ok(grids)
    }

    /// `P_nl / P_lin` at `(ln k, tau)`; 1 in linear mode.
    fn boost(&self, nl: Option<&Nonlinear>, ln_k: f64, tau: f64, mode: PkMode) -> StageResult<f64> {
        match mode {
            PkMode::Linear => Ok(1.0),
            PkMode::Nonlinear => {
                let nl = nl.ok_or(StageError::Dependency {
                    stage: STAGE,
                    needs: StageKind::Nonlinear,
                })?;
                let r = nl.correction_at_ln_k(ln_k, tau, InterpMode::Normal, &mut Cursor2::default())?;
                Ok(r * r)
            }
        }
    }

    /// `ln k`, pinned to the grid ends when round-off puts it just outside.
    fn ln_k_of(&self, k: f64) -> f64 {
        let ln_k = k.ln();
        for &end in [self.ln_k.first(), self.ln_k.last()].into_iter().flatten() {
            if (ln_k - end).abs() <= 1e-12 * end.abs().max(1.0) {
                return end;
            }
        }
        ln_k
    }

    fn pk_at_tau(&self, nl: Option<&Nonlinear>, k: f64, tau: f64, mode: PkMode) -> StageResult<PkValue> {
        let ln_k = self.ln_k_of(k);
        let boost = self.boost(nl, ln_k, tau, mode)?;
        let mut cursor = Cursor2::default();
        let mut per_ic = Vec::with_capacity(self.pk.len());
        for g in self.grids(Tracer::Matter)? {
            let ln_p = g
                .interpolate(ln_k, tau, InterpMode::Normal, &mut cursor)
                .map_err(StageError::query(STAGE))?;
            per_ic.push(boost * ln_p.exp());
        }
        let cb = if self.has_pk_cb() {
            let mut sum = 0.0;
            for g in &self.pk_cb {
                sum += g
                    .interpolate(ln_k, tau, InterpMode::Normal, &mut cursor)
                    .map_err(StageError::query(STAGE))?
                    .exp();
            }
            Some(boost * sum)
        } else {
            None
        };
        Ok(PkValue {
            total: per_ic.iter().sum(),
            per_ic,
            cb,
        })
    }

    /// Matter power at wavenumber `k` [1/Mpc] and redshift `z`.
    pub fn pk_at_k_and_z(
        &self,
        bg: &Background,
        nl: Option<&Nonlinear>,
        k: f64,
        z: f64,
        mode: PkMode,
    ) -> StageResult<PkValue> {
        let tau = bg.tau_of_z(z)?;
        self.pk_at_tau(nl, k, tau, mode)
    }

    /// Evaluate many `(k, z)` points. Each distinct redshift is converted
    /// once, walking the background table in sorted order.
    pub fn pk_at_kz_batch(
        &self,
        bg: &Background,
        nl: Option<&Nonlinear>,
        points: &[(f64, f64)],
        mode: PkMode,
    ) -> StageResult<Vec<PkValue>> {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| points[a].1.total_cmp(&points[b].1));
        let mut tau = vec![0.0; points.len()];
        let mut cursor = Cursor::default();
        let mut last: Option<(f64, f64)> = None;
        for &i in &order {
            let z = points[i].1;
            tau[i] = match last {
                Some((lz, lt)) if lz == z => lt,
                _ => {
                    let t = bg.tau_of_z_with(z, InterpMode::GrowingCloseby, &mut cursor)?;
                    last = Some((z, t));
                    t
                }
            };
        }
        points
            .par_iter()
            .zip(tau.par_iter())
            .map(|(&(k, _), &t)| self.pk_at_tau(nl, k, t, mode))
            .collect()
    }

    fn sigma_at_tau(
        &self,
        nl: Option<&Nonlinear>,
        r: f64,
        tau: f64,
        tracer: Tracer,
        mode: PkMode,
    ) -> StageResult<f64> {
        let grids = self.grids(tracer)?;
        let mut pk = vec![0.0; self.ln_k.len()];
        let mut cursor = Cursor2::default();
        for (i, &lk) in self.ln_k.iter().enumerate() {
            let boost = self.boost(nl, lk, tau, mode)?;
            for g in grids {
                let ln_p = g
                    .interpolate(lk, tau, InterpMode::GrowingCloseby, &mut cursor)
                    .map_err(StageError::query(STAGE))?;
                pk[i] += boost * ln_p.exp();
            }
        }
        Ok(sigma_from_pk(&self.ln_k, &pk, r))
    }

    /// Rms density fluctuation in spheres of radius `r` [Mpc] at redshift `z`.
    pub fn sigma(
        &self,
        bg: &Background,
        nl: Option<&Nonlinear>,
        r: f64,
        z: f64,
        tracer: Tracer,
        mode: PkMode,
    ) -> StageResult<f64> {
        if !(r > 0.0) {
            return Err(StageError::config(STAGE, format!("sigma radius must be positive, got {r}")));
        }
        let tau = bg.tau_of_z(z)?;
        self.sigma_at_tau(nl, r, tau, tracer, mode)
    }

    pub fn pk_titles(&self, format: OutputFormat) -> Vec<String> {
        let mut titles = match format {
            OutputFormat::Class => vec!["k (h/Mpc)".to_string(), "P (Mpc/h)^3".to_string()],
            OutputFormat::Camb => vec!["k/h".to_string(), "P".to_string()],
        };
        if self.ic_names.len() > 1 {
            for name in &self.ic_names {
                titles.push(format!("P_{name}"));
            }
        }
        if self.has_pk_cb() {
            titles.push("P_cb".to_string());
        }
        titles
    }

    /// One exported P(k) row: `k` in h/Mpc and powers in (Mpc/h)^3.
    ///
    /// Both output formats share these columns; only [`Self::pk_titles`]
    /// differs.
    pub fn pk_data(
        &self,
        bg: &Background,
        nl: Option<&Nonlinear>,
        k: f64,
        z: f64,
        mode: PkMode,
    ) -> StageResult<Vec<f64>> {
        let p = self.pk_at_k_and_z(bg, nl, k, z, mode)?;
        let h3 = self.h.powi(3);
        let mut row = vec![k / self.h, p.total * h3];
        if self.ic_names.len() > 1 {
            row.extend(p.per_ic.iter().map(|v| v * h3));
        }
        if let Some(cb) = p.cb {
            row.push(cb * h3);
        }
        Ok(row)
    }
}

/// Factor turning a dimensionless C_l into CAMB's `l(l+1)/2pi` microK^2
/// convention.
pub(crate) fn camb_scale(name: &str, l: f64, t_cmb: f64) -> f64 {
    let ll1 = l * (l + 1.0);
    let t_uk = t_cmb * 1e6;
    match name {
        cl::PP => ll1 * ll1 / (2.0 * PI),
        cl::TP => ll1.powf(1.5) / (2.0 * PI) * t_uk,
        _ => ll1 / (2.0 * PI) * t_uk * t_uk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camb_scaling_conventions() {
        let tt = camb_scale(cl::TT, 2.0, 2.7255);
        assert!((tt - 6.0 / (2.0 * PI) * 2.7255e6 * 2.7255e6).abs() / tt < 1e-12);
        let pp = camb_scale(cl::PP, 10.0, 2.7255);
        assert!((pp - 110.0 * 110.0 / (2.0 * PI)).abs() < 1e-9);
    }
}
