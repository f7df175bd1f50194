//! Heating from adiabatic cooling of baryons and electrons, with fitted
//! branching ratios.

use cf_core::units::constants;
use cf_core::{StageKind, kelvin_of};
use cf_table::{Cursor, InterpMode, TableBuilder};

use crate::background::Background;
use crate::distortions::{BranchingApprox, DistortionsConfig, col};
use crate::error::{InStage, StageResult};
use crate::reference::offset;
use crate::reference::thermodynamics::hydrogen_density_today;
use crate::thermodynamics::{self, Thermodynamics};

const STAGE: StageKind = StageKind::Distortions;

/// Thermalisation redshift of the blackbody visibility.
const Z_MU: f64 = 1.98e6;
/// Transition between the `mu` and `y` eras.
const Z_MU_Y: f64 = 5.0e4;

/// `(J_T, J_y, J_mu)` at redshift `z`.
pub(crate) fn branching(approx: BranchingApprox, z: f64) -> (f64, f64, f64) {
    let j_bb = (-(z / Z_MU).powf(2.5)).exp();
    match approx {
        BranchingApprox::SharpSharp => {
            if z > Z_MU {
                (1.0, 0.0, 0.0)
            } else if z > Z_MU_Y {
                (0.0, 0.0, 1.0)
            } else {
                (0.0, 1.0, 0.0)
            }
        }
        BranchingApprox::SharpSoft => {
            if z > Z_MU_Y {
                (1.0 - j_bb, 0.0, j_bb)
            } else {
                (0.0, 1.0, 0.0)
            }
        }
        BranchingApprox::SoftSoft | BranchingApprox::Exact => {
            let j_y = 1.0 / (1.0 + ((1.0 + z) / 6.0e4).powf(2.58));
            let j_mu = j_bb * (1.0 - (-((1.0 + z) / 5.8e4).powf(1.88)).exp());
            let j_t = 1.0 - j_bb;
            if approx == BranchingApprox::Exact {
                let sum = j_t + j_y + j_mu;
                (j_t / sum, j_y / sum, j_mu / sum)
            } else {
                (j_t, j_y, j_mu)
            }
        }
    }
}

pub(crate) fn solve(
    bg: &Background,
    th: &Thermodynamics,
    cfg: &DistortionsConfig,
    out: &mut TableBuilder,
) -> StageResult<()> {
    let cols = out.columns().clone();
    let z_off = offset(&cols, col::Z, STAGE)?;
    let tau_off = offset(&cols, col::TAU, STAGE)?;
    let heat_off = offset(&cols, col::HEAT, STAGE)?;
    let jt_off = offset(&cols, col::J_T, STAGE)?;
    let jy_off = offset(&cols, col::J_Y, STAGE)?;
    let jmu_off = offset(&cols, col::J_MU, STAGE)?;

    let th_cfg = th.config();
    let f_he = th_cfg.f_he();
    let n_h0 = hydrogen_density_today(bg, th_cfg.yhe);
    let t0 = kelvin_of(bg.t_cmb());
    // n k T / rho_gamma is redshift independent apart from x_e
    let per_particle = n_h0 * constants::K_B * t0 / (constants::A_RAD * t0.powi(4));
    let xe_col = [th.column(thermodynamics::col::XE)?];

    let mut bc = Cursor::default();
    let mut tc = Cursor::default();
    let mut xe = [0.0];
    let mut row = vec![0.0; cols.len()];
    for z in cfg.z_samples()? {
        let x_e = if z <= th.z_max() {
            th.values_at_z(z, &xe_col, InterpMode::GrowingCloseby, &mut tc, &mut xe)?;
            xe[0]
        } else {
            1.0 + 2.0 * f_he
        };
        let (j_t, j_y, j_mu) = branching(cfg.branching, z);
        row[z_off] = z;
        row[tau_off] = bg.tau_of_z_with(z, InterpMode::GrowingCloseby, &mut bc)?;
        row[heat_off] = -1.5 * per_particle * (1.0 + f_he + x_e) / (1.0 + z);
        row[jt_off] = j_t;
        row[jy_off] = j_y;
        row[jmu_off] = j_mu;
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharp_eras() {
        assert_eq!(branching(BranchingApprox::SharpSharp, 1e7), (1.0, 0.0, 0.0));
        assert_eq!(branching(BranchingApprox::SharpSharp, 1e5), (0.0, 0.0, 1.0));
        assert_eq!(branching(BranchingApprox::SharpSharp, 1e4), (0.0, 1.0, 0.0));
    }

    #[test]
    fn exact_ratios_sum_to_one() {
        for z in [1e3, 3e4, 2e5, 1e6, 4e6] {
            let (t, y, m) = branching(BranchingApprox::Exact, z);
            assert!((t + y + m - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn y_dominates_late_and_mu_in_the_middle() {
        let (_, y, m) = branching(BranchingApprox::SoftSoft, 2e3);
        assert!(y > 0.9 && m < 0.1);
        let (_, y, m) = branching(BranchingApprox::SoftSoft, 5e5);
        assert!(m > y);
    }
}
