use cf_core::StageKind;
use cf_table::TableBuilder;

use crate::error::{InStage, StageResult};
use crate::primordial::{PrimordialConfig, col};

use super::{offset, optional};

const STAGE: StageKind = StageKind::Primordial;

pub(crate) fn solve(cfg: &PrimordialConfig, ln_k: &[f64], out: &mut TableBuilder) -> StageResult<()> {
    let cols = out.columns().clone();
    let i_k = offset(&cols, col::LN_K, STAGE)?;
    let i_ad = offset(&cols, col::LN_P_AD, STAGE)?;
    let i_cdi = optional(&cols, col::LN_P_CDI);
    let i_t = optional(&cols, col::LN_P_T);
    let mut row = vec![0.0; cols.len()];
    for &x in ln_k {
        row[i_k] = x;
        row[i_ad] = cfg.ln_p_ad(x);
        if let Some(i) = i_cdi {
            row[i] = cfg.ln_p_cdi(x);
        }
        if let Some(i) = i_t {
            row[i] = cfg.ln_p_t(x);
        }
        out.push_row(&row).in_stage(STAGE)?;
    }
    Ok(())
}
