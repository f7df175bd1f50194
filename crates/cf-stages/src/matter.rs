//! Linear matter power spectra and their variance.
//!
//! `P(k) = 2 pi^2 / k^3 * P_prim(k) * delta(k)^2`, summed over uncorrelated
//! initial conditions. [`sigma_from_pk`] is the single variance routine used
//! by the nonlinear kernels, the spectra derived parameters, and queries.

use std::f64::consts::PI;

use crate::error::StageResult;
use crate::perturbations::{Perturbations, source};
use crate::primordial::Primordial;

/// Which density field a matter spectrum describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tracer {
    /// Total matter, massive neutrinos included.
    #[default]
    Matter,
    /// Baryons plus cold dark matter only.
    Cb,
}

impl Tracer {
    pub fn source(self) -> &'static str {
        match self {
            Tracer::Matter => source::DELTA_M,
            Tracer::Cb => source::DELTA_CB,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tracer::Matter => "m",
            Tracer::Cb => "cb",
        }
    }
}

pub fn pk_from_delta(k: f64, primordial: f64, delta: f64) -> f64 {
    2.0 * PI * PI / (k * k * k) * primordial * delta * delta
}

/// Linear spectrum of one initial condition at every perturbation wavenumber,
/// on conformal-time sample `itau`.
pub fn linear_pk_row(
    pt: &Perturbations,
    pm: &Primordial,
    tracer: Tracer,
    ic: usize,
    itau: usize,
) -> StageResult<Vec<f64>> {
    let grid = pt.source_grid(ic, tracer.source())?;
    let row = grid.row(itau);
    let mut out = Vec::with_capacity(row.len());
    for (&k, &delta) in pt.k().iter().zip(row) {
        out.push(pk_from_delta(k, pm.spectrum_at(k, ic)?, delta));
    }
    Ok(out)
}

/// Fourier transform of a spherical top hat.
fn top_hat(x: f64) -> f64 {
    if x < 1e-3 {
        1.0 - x * x / 10.0
    } else {
        3.0 * (x.sin() - x * x.cos()) / (x * x * x)
    }
}

/// Rms fluctuation in spheres of radius `r` (Mpc), from `pk` sampled on `ln_k`.
pub fn sigma_from_pk(ln_k: &[f64], pk: &[f64], r: f64) -> f64 {
    let integrand: Vec<f64> = ln_k
        .iter()
        .zip(pk)
        .map(|(&lk, &p)| {
            let k = lk.exp();
            let w = top_hat(k * r);
            k * k * k * p / (2.0 * PI * PI) * w * w
        })
        .collect();
    cf_core::numeric::trapezoid(ln_k, &integrand).max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_hat_is_continuous_at_switch() {
        let below = top_hat(0.999e-3);
        let above = top_hat(1.001e-3);
        assert!((below - above).abs() < 1e-6);
    }

    #[test]
    fn sigma_shrinks_with_radius() {
        let ln_k: Vec<f64> = (0..200).map(|i| -8.0 + i as f64 * 0.05).collect();
        let pk: Vec<f64> = ln_k.iter().map(|lk| 1e4 * lk.exp() / (1.0 + (lk.exp() / 0.02).powi(3))).collect();
        let s8 = sigma_from_pk(&ln_k, &pk, 8.0);
        let s20 = sigma_from_pk(&ln_k, &pk, 20.0);
        assert!(s8 > s20 && s20 > 0.0);
    }
}
