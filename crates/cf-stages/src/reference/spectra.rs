//! `C_l^{XY} = 4 pi * integral dln k  P(k) Delta_X(k, l) Delta_Y(k, l)`.

use std::f64::consts::PI;

use cf_core::StageKind;
use cf_core::numeric::trapezoid;
use cf_table::{Cursor, InterpMode, TableBuilder};

use crate::error::{InStage, StageResult};
use crate::primordial::Primordial;
use crate::reference::{offset, optional};
use crate::spectra::cl;
use crate::transfer::{Transfer, ttype};

const STAGE: StageKind = StageKind::Spectra;

pub(crate) fn solve(pm: &Primordial, tr: &Transfer, ic: usize, out: &mut TableBuilder) -> StageResult<()> {
    let cols = out.columns().clone();
    let l_off = offset(&cols, cl::L, STAGE)?;
    let pairs: Vec<(usize, &str, &str)> = [
        (cl::TT, ttype::T, ttype::T),
        (cl::EE, ttype::E, ttype::E),
        (cl::TE, ttype::T, ttype::E),
        (cl::PP, ttype::LENS, ttype::LENS),
        (cl::TP, ttype::T, ttype::LENS),
    ]
    .into_iter()
    .filter_map(|(name, x, y)| optional(&cols, name).map(|o| (o, x, y)))
    .collect();

    let mut grids = Vec::with_capacity(pairs.len());
    for &(_, x, y) in &pairs {
        grids.push((tr.grid(ic, x)?, tr.grid(ic, y)?));
    }
    let Some(first) = grids.first().map(|g| g.0) else {
        return Ok(());
    };
    let ln_k = first.x();
    let mut p_prim = Vec::with_capacity(ln_k.len());
    let mut cursor = Cursor::default();
    for &lk in ln_k {
        p_prim.push(pm.spectrum_at_ln_k(lk, ic, InterpMode::GrowingCloseby, &mut cursor)?);
    }

    let mut row = vec![0.0; cols.len()];
    let mut integrand = vec![0.0; ln_k.len()];
    for (il, &l) in tr.l_values().iter().enumerate() {
        row[l_off] = l as f64;
        for (&(off, _, _), (gx, gy)) in pairs.iter().zip(&grids) {
            for (ik, slot) in integrand.iter_mut().enumerate() {
                *slot = p_prim[ik] * gx.value(ik, il) * gy.value(ik, il);
            }
            row[off] = 4.0 * PI * trapezoid(ln_k, &integrand);
        }
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}
