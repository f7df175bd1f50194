use cf_core::StageKind;

use crate::background::Background;
use crate::error::{StageError, StageResult};
use crate::matter::{Tracer, linear_pk_row, sigma_from_pk};
use crate::nonlinear::{NonlinearConfig, NonlinearLayout, NonlinearOutput};
use crate::perturbations::Perturbations;
use crate::primordial::Primordial;

const STAGE: StageKind = StageKind::Nonlinear;

/// Radius where `sigma(R) = 1`, or `None` when the field is linear on all
/// scales in the bracket.
fn nonlinear_radius(ln_k: &[f64], pk: &[f64], r_min: f64, r_max: f64) -> Option<f64> {
    let f = |ln_r: f64| sigma_from_pk(ln_k, pk, ln_r.exp()) - 1.0;
    let (mut lo, mut hi) = (r_min.ln(), r_max.ln());
    if f(lo) < 0.0 {
        return None;
    }
    if f(hi) > 0.0 {
        return Some(r_max);
    }
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some((0.5 * (lo + hi)).exp())
}

pub(crate) fn solve(
    _bg: &Background,
    pt: &Perturbations,
    pm: &Primordial,
    cfg: &NonlinearConfig,
    layout: &NonlinearLayout,
) -> StageResult<NonlinearOutput> {
    let (amp, slope) = cfg.coefficients();
    let k_max = layout
        .ln_k
        .last()
        .map(|l| l.exp())
        .ok_or_else(|| StageError::numerical(STAGE, "empty wavenumber grid"))?;
    let mut out = NonlinearOutput::default();
    for &itau in &layout.tau_index {
        let mut pk = vec![0.0; layout.ln_k.len()];
        for ic in 0..pt.ics().len() {
            for (acc, p) in pk.iter_mut().zip(linear_pk_row(pt, pm, Tracer::Matter, ic, itau)?) {
                *acc += p;
            }
        }
        let radius = nonlinear_radius(&layout.ln_k, &pk, cfg.r_min, cfg.r_max);
        let k_nl = radius.map_or(k_max, |r| 1.0 / r);
        for &lk in &layout.ln_k {
            let ratio = match radius {
                Some(_) => (1.0 + amp * (lk.exp() / k_nl).powf(slope)).sqrt(),
                None => 1.0,
            };
            out.ratio.push(ratio);
        }
        out.k_nl.push(k_nl);
    }
    Ok(out)
}
