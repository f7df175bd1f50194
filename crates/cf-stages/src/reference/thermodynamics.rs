use cf_core::StageKind;
use cf_core::numeric::cumulative_trapezoid;
use cf_core::units::constants;
use cf_table::{Cursor, InterpMode, TableBuilder};

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::thermodynamics::{Reionization, ThermodynamicsConfig, col};

use super::offset;

const STAGE: StageKind = StageKind::Thermodynamics;

/// Residual ionization after hydrogen recombination.
const X_FREEZE: f64 = 2.0e-4;
/// Baryon temperature decouples from the photons below roughly this redshift.
const Z_THERMAL_DECOUPLING: f64 = 150.0;
const T_REIO_K: f64 = 1.0e4;

fn step(z: f64, center: f64, width: f64) -> f64 {
    0.5 * (1.0 + ((z - center) / width).tanh())
}

/// Free electrons per hydrogen nucleus, and the reionized fraction.
pub(crate) fn ionization(cfg: &ThermodynamicsConfig, z: f64) -> (f64, f64) {
    let f_he = cfg.f_he();
    let x_h = X_FREEZE + (1.0 - X_FREEZE) * step(z, 1100.0, 80.0);
    let x_he1 = f_he * step(z, 2000.0, 100.0);
    let x_he2 = f_he * step(z, 6000.0, 200.0);
    let x_rec = x_h + x_he1 + x_he2;
    match cfg.reionization {
        Reionization::None => (x_rec, 0.0),
        Reionization::Camb => {
            let (y_re, dy) = cfg.reio_step();
            let y = (1.0 + z).powf(1.5);
            let frac = 0.5 * (1.0 + ((y_re - y) / dy).tanh());
            let late_he = f_he * step(cfg.helium_reio_z, z, cfg.helium_reio_width);
            let x = x_rec + frac * (1.0 + f_he - x_rec).max(0.0) + late_he;
            (x, frac)
        }
    }
}

/// Hydrogen number density today, per cubic metre.
pub(crate) fn hydrogen_density_today(bg: &Background, yhe: f64) -> f64 {
    let cfg = bg.config();
    let h0_si = cfg.h * 1.0e5 / constants::MPC_M;
    3.0 * h0_si * h0_si * cfg.omega0_b() * (1.0 - yhe)
        / (8.0 * std::f64::consts::PI * constants::G_SI * constants::M_P_KG)
}

pub(crate) fn solve(
    bg: &Background,
    cfg: &ThermodynamicsConfig,
    out: &mut TableBuilder,
) -> StageResult<()> {
    let n = cfg.table_size;
    let zs: Vec<f64> = (0..n)
        .map(|i| if i + 1 == n { 0.0 } else { cfg.z_max * (1.0 - i as f64 / (n - 1) as f64) })
        .collect();
    let mut cursor = Cursor::default();
    let mut taus = Vec::with_capacity(n);
    for &z in &zs {
        taus.push(bg.tau_of_z_with(z, InterpMode::GrowingCloseby, &mut cursor)?);
    }

    let n_h0 = hydrogen_density_today(bg, cfg.yhe);
    let f_he = cfg.f_he();
    let t0 = bg.config().t_cmb;
    let mut xe = Vec::with_capacity(n);
    let mut reio = Vec::with_capacity(n);
    let mut dkappa = Vec::with_capacity(n);
    let mut dkappa_over_r = Vec::with_capacity(n);
    for &z in &zs {
        let (x, frac) = ionization(cfg, z);
        let dk = x * n_h0 * (1.0 + z).powi(2) * constants::SIGMA_T_M2 * constants::MPC_M;
        xe.push(x);
        reio.push(frac);
        dkappa.push(dk);
        dkappa_over_r.push(dk / bg.config().baryon_photon_ratio(1.0 / (1.0 + z)));
    }

    // optical depths are integrated from each row up to today
    let cum = cumulative_trapezoid(&taus, &dkappa);
    let cum_d = cumulative_trapezoid(&taus, &dkappa_over_r);
    let (kappa0, drag0) = match (cum.last(), cum_d.last()) {
        (Some(&a), Some(&b)) => (a, b),
        _ => return Err(StageError::numerical(STAGE, "empty redshift grid")),
    };

    let cols = out.columns().clone();
    let at = |name: &str| offset(&cols, name, STAGE);
    let (i_z, i_tau, i_xe, i_dk) = (at(col::Z)?, at(col::TAU)?, at(col::XE)?, at(col::DKAPPA)?);
    let (i_e, i_g, i_tb) = (at(col::EXPMKAPPA)?, at(col::G)?, at(col::TB)?);
    let (i_wb, i_cb2, i_td) = (at(col::WB)?, at(col::CB2)?, at(col::TAU_D)?);

    let u_td = 1.0 + Z_THERMAL_DECOUPLING;
    let mut row = vec![0.0; cols.len()];
    for i in 0..n {
        let z = zs[i];
        let u = 1.0 + z;
        let expmk = (-(kappa0 - cum[i])).exp();
        let tb = t0 * u * u / (u + u_td) + reio[i] * T_REIO_K;
        let dlntb_dlna = -(2.0 - u / (u + u_td));
        let mu = (1.0 + constants::NOT4 * f_he) / (1.0 + f_he + xe[i]);
        let wb = constants::K_B * tb / (mu * constants::M_P_KG * constants::C_M_S * constants::C_M_S);
        row[i_z] = z;
        row[i_tau] = taus[i];
        row[i_xe] = xe[i];
        row[i_dk] = dkappa[i];
        row[i_e] = expmk;
        row[i_g] = dkappa[i] * expmk;
        row[i_tb] = tb;
        row[i_wb] = wb;
        row[i_cb2] = wb * (1.0 - dlntb_dlna / 3.0);
        row[i_td] = drag0 - cum_d[i];
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_ionized_at_high_redshift() {
        let cfg = ThermodynamicsConfig::default();
        let (x, _) = ionization(&cfg, 7000.0);
        assert!((x - (1.0 + 2.0 * cfg.f_he())).abs() < 0.01);
        let (x, _) = ionization(&cfg, 500.0);
        assert!(x < 1e-3);
        let (x, frac) = ionization(&cfg, 0.0);
        assert!(frac > 0.99);
        assert!((x - (1.0 + 2.0 * cfg.f_he())).abs() < 0.01);
    }
}
