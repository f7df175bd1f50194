use cf_core::StageKind;
use cf_core::units::constants;
use cf_table::TableBuilder;

use crate::background::{BackgroundConfig, col};
use crate::error::{InStage, StageError, StageResult};
use crate::integrator::{OdeSystem, Rk4, integrate_on_grid};

use super::{offset, optional};

const STAGE: StageKind = StageKind::Background;

/// State: proper time, conformal time, sound horizon (all Mpc), growth
/// factor and its log-derivative, integrated in `ln a`.
struct Expansion<'a> {
    cfg: &'a BackgroundConfig,
}

impl Expansion<'_> {
    fn hubble(&self, a: f64) -> StageResult<f64> {
        let h2 = self.cfg.hubble_squared(a);
        if h2 > 0.0 {
            Ok(h2.sqrt())
        } else {
            Err(StageError::numerical(
                STAGE,
                format!("H^2 = {h2} is not positive at a = {a}"),
            ))
        }
    }
}

impl OdeSystem for Expansion<'_> {
    type State = [f64; 5];

    fn rhs(&self, x: f64, y: &[f64; 5]) -> StageResult<[f64; 5]> {
        let a = x.exp();
        let h = self.hubble(a)?;
        let r = self.cfg.baryon_photon_ratio(a);
        let cs = 1.0 / (3.0 * (1.0 + r)).sqrt();
        let h0 = self.cfg.h0();
        let omega_m_a = h0 * h0 * self.cfg.omega0_m() / a.powi(3) / (h * h);
        let (d, dd) = (y[3], y[4]);
        Ok([
            1.0 / h,
            1.0 / (a * h),
            cs / (a * h),
            dd,
            -(2.0 + self.cfg.dlnh_dlna(a)) * dd + 1.5 * omega_m_a * d,
        ])
    }

    fn add(&self, a: &[f64; 5], b: &[f64; 5]) -> [f64; 5] {
        std::array::from_fn(|i| a[i] + b[i])
    }

    fn scale(&self, a: &[f64; 5], s: f64) -> [f64; 5] {
        std::array::from_fn(|i| a[i] * s)
    }
}

fn transverse(cfg: &BackgroundConfig, chi: f64) -> f64 {
    let h0 = cfg.h0();
    let curvature = -cfg.omega_k * h0 * h0;
    if cfg.omega_k.abs() < 1e-12 {
        chi
    } else if curvature < 0.0 {
        let s = (-curvature).sqrt();
        (s * chi).sinh() / s
    } else {
        let s = curvature.sqrt();
        (s * chi).sin() / s
    }
}

pub(crate) fn solve(cfg: &BackgroundConfig, out: &mut TableBuilder) -> StageResult<()> {
    let sys = Expansion { cfg };
    let a_ini = 1.0 / (1.0 + cfg.z_max);
    let x_ini = a_ini.ln();
    let n = cfg.table_size;
    let grid: Vec<f64> = (0..n)
        .map(|i| if i + 1 == n { 0.0 } else { x_ini * (1.0 - i as f64 / (n - 1) as f64) })
        .collect();

    // radiation-era initial conditions
    let h_ini = sys.hubble(a_ini)?;
    let tau_ini = 1.0 / (a_ini * h_ini);
    let y0 = [
        0.5 / h_ini,
        tau_ini,
        tau_ini / 3.0_f64.sqrt(),
        a_ini,
        a_ini,
    ];
    let states = integrate_on_grid(&Rk4, &sys, &grid, y0, 2)?;

    let today = states.last().ok_or_else(|| StageError::numerical(STAGE, "empty grid"))?;
    let (tau0, d0) = (today[1], today[3]);
    if !(d0 > 0.0) {
        return Err(StageError::numerical(STAGE, format!("growth factor today is {d0}")));
    }

    let cols = out.columns().clone();
    let at = |name: &str| offset(&cols, name, STAGE);
    let (i_z, i_t, i_tau, i_h) = (at(col::Z)?, at(col::T)?, at(col::TAU)?, at(col::H)?);
    let (i_chi, i_da, i_dl, i_rs) = (
        at(col::COMOV_DIST)?,
        at(col::ANG_DIST)?,
        at(col::LUM_DIST)?,
        at(col::RS)?,
    );
    let (i_g, i_b, i_cdm, i_crit) = (
        at(col::RHO_G)?,
        at(col::RHO_B)?,
        at(col::RHO_CDM)?,
        at(col::RHO_CRIT)?,
    );
    let (i_d, i_f) = (at(col::GROWTH_D)?, at(col::GROWTH_F)?);
    let i_ncdm = optional(&cols, col::RHO_NCDM);
    let i_lambda = optional(&cols, col::RHO_LAMBDA);
    let i_ur = optional(&cols, col::RHO_UR);

    let h0sq = cfg.h0() * cfg.h0();
    let mpc_per_gyr = constants::GYR_S * constants::C_M_S / constants::MPC_M;
    let mut row = vec![0.0; cols.len()];
    for (x, y) in grid.iter().zip(&states) {
        let a = x.exp();
        let h = sys.hubble(a)?;
        let chi = (tau0 - y[1]).max(0.0);
        let r = transverse(cfg, chi);
        row[i_z] = 1.0 / a - 1.0;
        row[i_t] = y[0] / mpc_per_gyr;
        row[i_tau] = y[1];
        row[i_h] = h;
        row[i_chi] = chi;
        row[i_da] = a * r;
        row[i_dl] = r / a;
        row[i_rs] = y[2];
        row[i_g] = h0sq * cfg.omega0_g() / a.powi(4);
        row[i_b] = h0sq * cfg.omega0_b() / a.powi(3);
        row[i_cdm] = h0sq * cfg.omega0_cdm() / a.powi(3);
        if let Some(i) = i_ncdm {
            row[i] = h0sq * cfg.omega0_ncdm() / a.powi(3);
        }
        if let Some(i) = i_lambda {
            row[i] = h0sq * cfg.omega0_lambda();
        }
        if let Some(i) = i_ur {
            row[i] = h0sq * cfg.omega0_ur() / a.powi(4);
        }
        row[i_crit] = h * h;
        row[i_d] = y[3] / d0;
        row[i_f] = y[4] / y[3];
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}
