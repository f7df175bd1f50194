use cf_core::StageKind;
use cf_core::numeric::cumulative_trapezoid;
use cf_table::{Cursor, InterpMode};

use crate::background::{self, Background};
use crate::error::{StageError, StageResult};
use crate::perturbations::{InitialCondition, PerturbationsConfig, SourceLayout, source};
use crate::thermodynamics::{self, Thermodynamics};

const STAGE: StageKind = StageKind::Perturbations;

/// Baryon pressure scale, 1/Mpc.
const K_JEANS: f64 = 5.0;

#[derive(Clone, Copy)]
enum Kind {
    T0,
    P,
    PhiPlusPsi,
    DeltaM,
    DeltaCb,
    DeltaB,
    DeltaCdm,
    ThetaB,
    ThetaCdm,
    Phi,
    Psi,
}

impl Kind {
    fn of(name: &str) -> Option<Self> {
        Some(match name {
            source::T0 => Kind::T0,
            source::P => Kind::P,
            source::PHI_PLUS_PSI => Kind::PhiPlusPsi,
            source::DELTA_M => Kind::DeltaM,
            source::DELTA_CB => Kind::DeltaCb,
            source::DELTA_B => Kind::DeltaB,
            source::DELTA_CDM => Kind::DeltaCdm,
            source::THETA_B => Kind::ThetaB,
            source::THETA_CDM => Kind::ThetaCdm,
            source::PHI => Kind::Phi,
            source::PSI => Kind::Psi,
            _ => return None,
        })
    }
}

/// BBKS transfer function; `q = k / (Omega_m h^2)` with k in 1/Mpc.
pub(crate) fn bbks(q: f64) -> f64 {
    if q < 1e-8 {
        return 1.0;
    }
    let x = 2.34 * q;
    (1.0 + x).ln() / x
        * (1.0 + 3.89 * q + (16.1 * q).powi(2) + (5.46 * q).powi(3) + (6.71 * q).powi(4)).powf(-0.25)
}

/// Late-time growth suppression relative to an Einstein-de Sitter universe.
pub(crate) fn growth_suppression(omega_m: f64, omega_lambda: f64) -> f64 {
    2.5 * omega_m
        / (omega_m.powf(4.0 / 7.0) - omega_lambda + (1.0 + 0.5 * omega_m) * (1.0 + omega_lambda / 70.0))
}

/// Everything the closed forms need at one conformal time.
struct Epoch {
    a: f64,
    conformal_h: f64,
    growth: f64,
    rate: f64,
    g: f64,
    dkappa: f64,
    rs: f64,
    k_damp: f64,
}

fn epochs(bg: &Background, th: &Thermodynamics, tau: &[f64]) -> StageResult<Vec<Epoch>> {
    let bg_cols = [
        bg.column(background::col::Z)?,
        bg.column(background::col::H)?,
        bg.column(background::col::GROWTH_D)?,
        bg.column(background::col::GROWTH_F)?,
        bg.column(background::col::RS)?,
    ];
    let th_cols = [
        th.column(thermodynamics::col::G)?,
        th.column(thermodynamics::col::DKAPPA)?,
    ];
    let g0 = growth_suppression(bg.omega0_m(), bg.omega0_lambda());
    let mut bc = Cursor::default();
    let mut tc = Cursor::default();
    let mut b = [0.0; 5];
    let mut t = [0.0; 2];
    let mut out = Vec::with_capacity(tau.len());
    let mut damping = Vec::with_capacity(tau.len());
    for &x in tau {
        bg.values_at_tau(x, &bg_cols, InterpMode::GrowingCloseby, &mut bc, &mut b)?;
        th.values_at_tau(x, &th_cols, InterpMode::GrowingCloseby, &mut tc, &mut t)?;
        let a = 1.0 / (1.0 + b[0]);
        let r = bg.config().baryon_photon_ratio(a);
        let dkappa = t[1].max(f64::MIN_POSITIVE);
        damping.push((r * r / (1.0 + r) + 16.0 / 15.0) / (6.0 * (1.0 + r) * dkappa));
        out.push(Epoch {
            a,
            conformal_h: a * b[1],
            growth: g0 * b[2],
            rate: b[3],
            g: t[0],
            dkappa,
            rs: b[4],
            k_damp: 0.0,
        });
    }
    // diffusion length accumulated since the first sample
    let offset = damping.first().copied().unwrap_or(0.0) * tau.first().copied().unwrap_or(0.0);
    let cum = cumulative_trapezoid(tau, &damping);
    for (e, c) in out.iter_mut().zip(cum) {
        e.k_damp = 1.0 / (c + offset).sqrt();
    }
    Ok(out)
}

pub(crate) fn solve(
    bg: &Background,
    th: &Thermodynamics,
    _cfg: &PerturbationsConfig,
    layout: &SourceLayout,
) -> StageResult<Vec<Vec<f64>>> {
    let cfg_bg = bg.config();
    let h0sq = bg.h0() * bg.h0();
    let omega_m = bg.omega0_m();
    let omega_b = cfg_bg.omega0_b();
    let omega_c = cfg_bg.omega0_cdm();
    let f_nu = cfg_bg.omega0_ncdm() / omega_m;
    let k_fs = 0.018 * omega_m.sqrt() * (cfg_bg.m_ncdm / 3.0) * cfg_bg.h;
    let k_eq = bg.h0() * omega_m * (2.0 / bg.omega0_r()).sqrt();
    let shape = omega_m * cfg_bg.h * cfg_bg.h;

    let eps = epochs(bg, th, &layout.tau)?;
    let kinds = layout
        .types
        .names()
        .map(|n| Kind::of(n).ok_or_else(|| StageError::numerical(STAGE, format!("unsupported source type '{n}'"))))
        .collect::<StageResult<Vec<Kind>>>()?;

    let nk = layout.k.len();
    let mut planes = Vec::with_capacity(layout.plane_count());
    for &ic in &layout.ics {
        for &kind in &kinds {
            let mut values = Vec::with_capacity(nk * eps.len());
            for e in &eps {
                for &k in &layout.k {
                    let (delta_scale, cmb_scale) = match ic {
                        InitialCondition::Adiabatic => (1.0, 1.0),
                        InitialCondition::CdmIsocurvature => {
                            let s = 1.0 / (1.0 + (k / k_eq).powi(2));
                            (s, -2.0 * s)
                        }
                    };
                    let delta_cb =
                        -0.4 * k * k / (omega_m * h0sq) * bbks(k / shape) * e.growth * delta_scale;
                    let delta_m = if f_nu > 0.0 {
                        delta_cb * (1.0 - f_nu + f_nu / (1.0 + (k / k_fs).powi(2)))
                    } else {
                        delta_cb
                    };
                    let delta_b = delta_cb / (1.0 + (k / K_JEANS).powi(2));
                    let delta_cdm = if omega_c > 0.0 {
                        ((omega_b + omega_c) * delta_cb - omega_b * delta_b) / omega_c
                    } else {
                        delta_cb
                    };
                    let phi = -1.5 * h0sq * omega_m * delta_m / (e.a * k * k);
                    let damp = (-(k / e.k_damp).powi(2)).exp();
                    let v = match kind {
                        Kind::T0 => -0.2 * e.g * (k * e.rs).cos() * damp * cmb_scale,
                        Kind::P => {
                            -0.2 * e.g * (k * e.rs).sin() * (k / e.dkappa).min(1.0) * damp * cmb_scale
                        }
                        Kind::PhiPlusPsi => 2.0 * phi,
                        Kind::DeltaM => delta_m,
                        Kind::DeltaCb => delta_cb,
                        Kind::DeltaB => delta_b,
                        Kind::DeltaCdm => delta_cdm,
                        Kind::ThetaB => -e.conformal_h * e.rate * delta_b,
                        Kind::ThetaCdm => -e.conformal_h * e.rate * delta_cdm,
                        Kind::Phi | Kind::Psi => phi,
                    };
                    values.push(v);
                }
            }
            planes.push(values);
        }
    }
    Ok(planes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbks_limits() {
        assert!((bbks(1e-6) - 1.0).abs() < 1e-4);
        assert!(bbks(10.0) < 1e-2);
        assert!(bbks(0.1) > bbks(1.0));
    }

    #[test]
    fn suppression_is_unity_without_lambda() {
        assert!((growth_suppression(1.0, 0.0) - 1.0).abs() < 0.01);
        let g = growth_suppression(0.31, 0.69);
        assert!(g > 0.7 && g < 0.85);
    }
}
