//! Line-of-sight projection with trapezoid weights in conformal time.

use cf_core::StageKind;
use cf_table::Grid2;
use rayon::prelude::*;

use crate::background::Background;
use crate::error::{StageError, StageResult};
use crate::perturbations::Perturbations;
use crate::reference::bessel::spherical_bessel;
use crate::thermodynamics::Thermodynamics;
use crate::transfer::{TransferConfig, TransferLayout, source_of, ttype};

const STAGE: StageKind = StageKind::Transfer;

#[derive(Clone, Copy)]
enum Projection {
    Temperature,
    Polarization,
    Lensing,
}

fn trapezoid_weights(tau: &[f64]) -> Vec<f64> {
    let n = tau.len();
    (0..n)
        .map(|i| {
            let lo = tau[i.saturating_sub(1)];
            let hi = tau[(i + 1).min(n - 1)];
            0.5 * (hi - lo)
        })
        .collect()
}

/// `(chi_* - chi) / (chi_* chi)` between the observer and last scattering.
fn lensing_weight(chi: f64, chi_star: f64) -> f64 {
    if chi <= 0.0 || chi >= chi_star {
        0.0
    } else {
        (chi_star - chi) / (chi_star * chi)
    }
}

fn project(
    l: usize,
    k: &[f64],
    tau: &[f64],
    weights: &[f64],
    tau0: f64,
    chi_star: f64,
    planes: &[(Projection, &Grid2)],
) -> Vec<f64> {
    let nk = k.len();
    let lf = l as f64;
    let e_norm = ((lf + 2.0) * (lf + 1.0) * lf * (lf - 1.0)).sqrt();
    let mut out = vec![0.0; planes.len() * nk];
    for (ik, &kk) in k.iter().enumerate() {
        for (itau, (&t, &w)) in tau.iter().zip(weights).enumerate() {
            let chi = tau0 - t;
            let x = kk * chi;
            // j_l is negligible well inside the turning point
            if x < 0.5 * lf && l > 10 {
                continue;
            }
            let j = spherical_bessel(l, x);
            if j == 0.0 {
                continue;
            }
            for (p, (projection, grid)) in planes.iter().enumerate() {
                let s = grid.value(ik, itau);
                let kernel = match projection {
                    Projection::Temperature => j,
                    Projection::Polarization => {
                        if x > 1e-8 {
                            e_norm * j / (x * x)
                        } else {
                            0.0
                        }
                    }
                    Projection::Lensing => j * lensing_weight(chi, chi_star),
                };
                out[p * nk + ik] += w * s * kernel;
            }
        }
    }
    out
}

pub(crate) fn solve(
    bg: &Background,
    th: &Thermodynamics,
    pt: &Perturbations,
    _cfg: &TransferConfig,
    layout: &TransferLayout,
) -> StageResult<Vec<Vec<f64>>> {
    let mut planes = Vec::with_capacity(layout.plane_count());
    for ic in 0..layout.ics {
        for name in layout.types.names() {
            let projection = match name {
                ttype::T => Projection::Temperature,
                ttype::E => Projection::Polarization,
                ttype::LENS => Projection::Lensing,
                other => {
                    return Err(StageError::numerical(STAGE, format!("unknown transfer type '{other}'")));
                }
            };
            let src = source_of(name)
                .ok_or_else(|| StageError::numerical(STAGE, format!("no source for '{name}'")))?;
            planes.push((projection, pt.source_grid(ic, src)?));
        }
    }

    let tau = pt.tau();
    let weights = trapezoid_weights(tau);
    let tau0 = bg.conformal_age();
    let chi_star = tau0 - th.derived().tau_rec;
    let k = pt.k();
    let nk = k.len();

    let rows: Vec<Vec<f64>> = layout
        .l
        .par_iter()
        .map(|&l| project(l, k, tau, &weights, tau0, chi_star, &planes))
        .collect();

    let nl = layout.l.len();
    let mut out = vec![vec![0.0; nl * nk]; planes.len()];
    for (il, row) in rows.iter().enumerate() {
        for (p, plane) in out.iter_mut().enumerate() {
            plane[il * nk..(il + 1) * nk].copy_from_slice(&row[p * nk..(p + 1) * nk]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_span() {
        let tau = [1.0, 2.0, 4.0, 7.0];
        let w = trapezoid_weights(&tau);
        assert!((w.iter().sum::<f64>() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn lensing_weight_vanishes_at_both_ends() {
        assert_eq!(lensing_weight(0.0, 100.0), 0.0);
        assert_eq!(lensing_weight(100.0, 100.0), 0.0);
        assert!(lensing_weight(50.0, 100.0) > 0.0);
    }
}
