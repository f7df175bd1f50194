//! Gaussian smoothing of the unlensed C_l by the rms deflection angle.

use std::f64::consts::PI;

use cf_core::StageKind;
use cf_table::TableBuilder;

use crate::error::{InStage, StageResult};
use crate::lensing::LensingConfig;
use crate::reference::{offset, optional};
use crate::spectra::{Spectra, cl};

const STAGE: StageKind = StageKind::Lensing;

/// Mean squared deflection, `sum (2l+1)/(4 pi) l(l+1) C_l^pp`.
fn deflection_variance(l_values: &[f64], pp: &[f64]) -> f64 {
    l_values
        .iter()
        .zip(pp)
        .map(|(&l, &c)| (2.0 * l + 1.0) / (4.0 * PI) * l * (l + 1.0) * c)
        .sum::<f64>()
        .max(0.0)
}

/// Convolve `values` (indexed by `l - 2`) with a Gaussian of width
/// `l * sigma_d` around multipole `l`.
fn smooth(values: &[f64], l: usize, sigma_d: f64) -> f64 {
    let width = (l as f64 * sigma_d).max(0.5);
    let reach = (3.0 * width).ceil() as usize;
    let lo = l.saturating_sub(reach).max(2);
    let hi = (l + reach).min(values.len() + 1);
    let mut acc = 0.0;
    let mut norm = 0.0;
    for lp in lo..=hi {
        let d = (lp as f64 - l as f64) / width;
        let w = (-0.5 * d * d).exp();
        acc += w * values[lp - 2];
        norm += w;
    }
    acc / norm
}

pub(crate) fn solve(sp: &Spectra, cfg: &LensingConfig, out: &mut TableBuilder) -> StageResult<()> {
    let cols = out.columns().clone();
    let l_off = offset(&cols, cl::L, STAGE)?;
    let l_full = sp.l_max();
    let l_max = l_full.saturating_sub(cfg.margin);

    // unlensed spectra at every integer multipole up to the unlensed maximum
    let types = sp.cl_types();
    let ls: Vec<f64> = (2..=l_full).map(|l| l as f64).collect();
    let mut unlensed: Vec<Vec<f64>> = vec![Vec::with_capacity(ls.len()); types.len()];
    for &l in &ls {
        for (column, v) in unlensed.iter_mut().zip(sp.cl_at_l(l)?.total) {
            column.push(v);
        }
    }
    let series = |name: &str| types.iter().position(|t| *t == name).map(|i| &unlensed[i]);

    let sigma_d2 = series(cl::PP).map_or(0.0, |pp| deflection_variance(&ls, pp));
    let sigma_d = sigma_d2.sqrt();

    let mut row = vec![0.0; cols.len()];
    for l in 2..=l_max {
        let lf = l as f64;
        row[l_off] = lf;
        let transfer = 1.0 - (-lf * lf * sigma_d2).exp();
        for name in [cl::TT, cl::EE, cl::TE, cl::PP, cl::TP] {
            if let (Some(off), Some(values)) = (optional(&cols, name), series(name)) {
                row[off] = match name {
                    cl::PP | cl::TP => values[l - 2],
                    _ => smooth(values, l, sigma_d),
                };
            }
        }
        if let (Some(off), Some(ee)) = (optional(&cols, cl::BB), series(cl::EE)) {
            // lensing leaks part of the E power into B
            row[off] = 0.5 * transfer * smooth(ee, l, sigma_d);
        }
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_preserves_constants() {
        let flat = vec![3.0; 200];
        assert!((smooth(&flat, 100, 0.05) - 3.0).abs() < 1e-12);
        assert!((smooth(&flat, 2, 0.05) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn deflection_variance_is_non_negative() {
        let ls = [2.0, 3.0, 4.0];
        assert!(deflection_variance(&ls, &[1e-9, 1e-10, 1e-11]) > 0.0);
        assert_eq!(deflection_variance(&ls, &[-1.0, -1.0, -1.0]), 0.0);
    }
}
