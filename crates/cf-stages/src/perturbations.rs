//! Perturbations stage: source functions sampled over (k, tau).

use cf_core::StageKind;
use cf_core::numeric::logspace;
use cf_params::ParameterSet;
use cf_table::{Column, ColumnMap, Cursor2, Grid2, InterpMode, OutputFormat};
use tracing::{debug, info};

use crate::background::Background;
use crate::error::{InStage, StageError, StageResult};
use crate::kernels::Kernels;
use crate::request::OutputRequest;
use crate::thermodynamics::{self, Thermodynamics};

const STAGE: StageKind = StageKind::Perturbations;

/// Late-time samples appended after the strided thermodynamics rows, so
/// that P(k, z) stays resolved at low redshift.
const LATE_SAMPLES: usize = 64;
const Z_LATE_MIN: f64 = 50.0;

/// Source-type names.
pub mod source {
    pub const T0: &str = "t0";
    pub const P: &str = "p";
    pub const PHI_PLUS_PSI: &str = "phi_plus_psi";
    pub const DELTA_M: &str = "delta_m";
    pub const DELTA_CB: &str = "delta_cb";
    pub const DELTA_B: &str = "delta_b";
    pub const DELTA_CDM: &str = "delta_cdm";
    pub const THETA_B: &str = "theta_b";
    pub const THETA_CDM: &str = "theta_cdm";
    pub const PHI: &str = "phi";
    pub const PSI: &str = "psi";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InitialCondition {
    Adiabatic,
    CdmIsocurvature,
}

impl InitialCondition {
    pub fn name(self) -> &'static str {
        match self {
            InitialCondition::Adiabatic => "ad",
            InitialCondition::CdmIsocurvature => "cdi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ad" | "AD" => Some(InitialCondition::Adiabatic),
            "cdi" | "CDI" => Some(InitialCondition::CdmIsocurvature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationsConfig {
    pub output: OutputRequest,
    pub ics: Vec<InitialCondition>,
    pub k_min_tau0: f64,
    pub k_max_tau0_over_l_max: f64,
    pub l_max_scalars: usize,
    /// Largest wavenumber for matter spectra, in 1/Mpc.
    pub p_k_max: f64,
    pub k_per_decade: usize,
    pub tau_stride: usize,
    pub z_max_pk: f64,
    pub k_output_values: Vec<f64>,
    pub max_k_output_values: usize,
}

impl Default for PerturbationsConfig {
    fn default() -> Self {
        Self {
            output: OutputRequest::default(),
            ics: vec![InitialCondition::Adiabatic],
            k_min_tau0: 0.1,
            k_max_tau0_over_l_max: 2.0,
            l_max_scalars: 2500,
            p_k_max: 1.0,
            k_per_decade: 20,
            tau_stride: 8,
            z_max_pk: 0.0,
            k_output_values: Vec::new(),
            max_k_output_values: 30,
        }
    }
}

impl PerturbationsConfig {
    pub fn from_params(output: OutputRequest, params: &mut ParameterSet) -> StageResult<Self> {
        let d = Self::default();
        let mut ics = Vec::new();
        let words = params.words("ic");
        for w in &words {
            let ic = InitialCondition::parse(w).ok_or_else(|| {
                StageError::config(STAGE, format!("unknown initial condition '{w}'"))
            })?;
            if !ics.contains(&ic) {
                ics.push(ic);
            }
        }
        if ics.is_empty() {
            ics = d.ics.clone();
        }
        let cfg = Self {
            output,
            ics,
            k_min_tau0: params.f64_or("k_min_tau0", d.k_min_tau0).in_stage(STAGE)?,
            k_max_tau0_over_l_max: params
                .f64_or("k_max_tau0_over_l_max", d.k_max_tau0_over_l_max)
                .in_stage(STAGE)?,
            l_max_scalars: params.usize_or("l_max_scalars", d.l_max_scalars).in_stage(STAGE)?,
            p_k_max: params.f64_or("P_k_max_1/Mpc", d.p_k_max).in_stage(STAGE)?,
            k_per_decade: params.usize_or("k_per_decade", d.k_per_decade).in_stage(STAGE)?,
            tau_stride: params.usize_or("tau_stride", d.tau_stride).in_stage(STAGE)?,
            z_max_pk: params.f64_or("z_max_pk", d.z_max_pk).in_stage(STAGE)?,
            k_output_values: params.f64_list("k_output_values").in_stage(STAGE)?,
            max_k_output_values: params
                .usize_or("max_k_output_values", d.max_k_output_values)
                .in_stage(STAGE)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> StageResult<()> {
        if !self.output.needs_perturbations() {
            return Err(StageError::config(STAGE, "no output needs perturbations"));
        }
        if !(self.k_min_tau0 > 0.0) || !(self.k_max_tau0_over_l_max > 0.0) || !(self.p_k_max > 0.0) {
            return Err(StageError::config(STAGE, "wavenumber bounds must be positive"));
        }
        if self.k_per_decade < 2 || self.tau_stride == 0 {
            return Err(StageError::config(
                STAGE,
                "k_per_decade must be at least 2 and tau_stride at least 1",
            ));
        }
        if self.output.has_cls() && self.l_max_scalars < 3 {
            return Err(StageError::config(STAGE, "l_max_scalars must be at least 3"));
        }
        if !(self.z_max_pk >= 0.0) {
            return Err(StageError::config(STAGE, "z_max_pk must be non-negative"));
        }
        if self.k_output_values.len() > self.max_k_output_values {
            return Err(StageError::config(
                STAGE,
                format!(
                    "{} k_output_values requested, at most {} allowed",
                    self.k_output_values.len(),
                    self.max_k_output_values
                ),
            ));
        }
        if let Some(k) = self.k_output_values.iter().find(|k| !(**k > 0.0)) {
            return Err(StageError::config(STAGE, format!("k_output_values entry {k} is not positive")));
        }
        Ok(())
    }
}

/// Sampling handed to the perturbation kernel.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    pub k: Vec<f64>,
    pub tau: Vec<f64>,
    pub types: ColumnMap,
    pub ics: Vec<InitialCondition>,
}

impl SourceLayout {
    pub fn plane(&self, ic: usize, ty: Column) -> usize {
        ic * self.types.len() + ty.offset()
    }

    pub fn plane_count(&self) -> usize {
        self.ics.len() * self.types.len()
    }
}

/// How a transfer-function column is derived from a source.
#[derive(Clone, Copy)]
enum Scale {
    Identity,
    /// `-delta / k^2` with k in h/Mpc.
    MinusOverK2,
}

#[derive(Debug, Clone)]
pub struct Perturbations {
    config: PerturbationsConfig,
    has_ncdm: bool,
    h: f64,
    k: Vec<f64>,
    tau: Vec<f64>,
    z: Vec<f64>,
    types: ColumnMap,
    sources: Vec<Grid2>,
    pk_first_tau: usize,
}

impl Perturbations {
    pub fn init(
        bg: &Background,
        th: &Thermodynamics,
        output: &OutputRequest,
        params: &mut ParameterSet,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        let config = PerturbationsConfig::from_params(*output, params)?;
        Self::from_config(bg, th, config, kernels)
    }

    pub fn from_config(
        bg: &Background,
        th: &Thermodynamics,
        config: PerturbationsConfig,
        kernels: &dyn Kernels,
    ) -> StageResult<Self> {
        config.validate()?;
        let has_ncdm = bg.has_ncdm();
        let out = config.output;
        let matter = out.m_pk || out.d_tk;
        let types = ColumnMap::builder()
            .push_if(out.t_cl, source::T0)
            .push_if(out.p_cl, source::P)
            .push_if(out.l_cl, source::PHI_PLUS_PSI)
            .push_if(matter, source::DELTA_M)
            .push_if(matter && has_ncdm, source::DELTA_CB)
            .push_if(out.d_tk, source::DELTA_B)
            .push_if(out.d_tk, source::DELTA_CDM)
            .push_if(out.d_tk, source::PHI)
            .push_if(out.d_tk, source::PSI)
            .push_if(out.v_tk, source::THETA_B)
            .push_if(out.v_tk, source::THETA_CDM)
            .build()
            .in_stage(STAGE)?;

        let k = Self::k_grid(bg, &config)?;
        let (tau, z) = Self::tau_grid(bg, th, &config)?;
        let layout = SourceLayout {
            k,
            tau,
            types,
            ics: config.ics.clone(),
        };
        let planes = kernels.perturbations(bg, th, &config, &layout)?;
        if planes.len() != layout.plane_count() {
            return Err(StageError::numerical(
                STAGE,
                format!("kernel returned {} planes, expected {}", planes.len(), layout.plane_count()),
            ));
        }
        let ln_k: Vec<f64> = layout.k.iter().map(|k| k.ln()).collect();
        let mut sources = Vec::with_capacity(planes.len());
        for values in planes {
            sources.push(Grid2::new("ln k", ln_k.clone(), "tau", layout.tau.clone(), values).in_stage(STAGE)?);
        }

        let n_tau = layout.tau.len();
        let pk_first_tau = z
            .iter()
            .position(|&zi| zi <= config.z_max_pk)
            .unwrap_or(n_tau - 1)
            .saturating_sub(1)
            .min(n_tau - 2);
        debug!(
            nk = layout.k.len(),
            ntau = n_tau,
            types = layout.types.len(),
            ics = layout.ics.len(),
            "perturbation sources"
        );
        info!(
            k_min = layout.k[0],
            k_max = layout.k[layout.k.len() - 1],
            "perturbations ready"
        );
        Ok(Self {
            config,
            has_ncdm,
            h: bg.h(),
            k: layout.k,
            tau: layout.tau,
            z,
            types: layout.types,
            sources,
            pk_first_tau,
        })
    }

    fn k_grid(bg: &Background, cfg: &PerturbationsConfig) -> StageResult<Vec<f64>> {
        let tau0 = bg.conformal_age();
        let k_min = cfg.k_min_tau0 / tau0;
        let mut k_max = k_min;
        if cfg.output.has_cls() {
            k_max = k_max.max(cfg.k_max_tau0_over_l_max * cfg.l_max_scalars as f64 / tau0);
        }
        if cfg.output.m_pk || cfg.output.has_transfers() {
            k_max = k_max.max(cfg.p_k_max);
        }
        for &k in &cfg.k_output_values {
            k_max = k_max.max(k);
        }
        if cfg.k_output_values.iter().any(|&k| k < k_min) {
            return Err(StageError::config(
                STAGE,
                format!("k_output_values below k_min = {k_min:.3e} 1/Mpc"),
            ));
        }
        if k_max <= k_min {
            return Err(StageError::config(STAGE, "empty wavenumber range"));
        }
        let decades = (k_max / k_min).log10();
        let n = ((decades * cfg.k_per_decade as f64).ceil() as usize + 1).max(4);
        logspace(k_min, k_max, n).in_stage(STAGE)
    }

    /// Strided thermodynamics rows, then a late-time grid uniform in ln(1+z).
    fn tau_grid(
        bg: &Background,
        th: &Thermodynamics,
        cfg: &PerturbationsConfig,
    ) -> StageResult<(Vec<f64>, Vec<f64>)> {
        let z_late = cfg.z_max_pk.max(Z_LATE_MIN);
        if z_late >= th.z_max() {
            return Err(StageError::config(
                STAGE,
                format!("z_max_pk = {} is beyond the thermodynamics table", cfg.z_max_pk),
            ));
        }
        let t = th.table();
        let tau_col = th.column(thermodynamics::col::TAU)?;
        let z_col = th.column(thermodynamics::col::Z)?;
        let mut tau = Vec::new();
        let mut z = Vec::new();
        for i in (0..t.rows()).step_by(cfg.tau_stride) {
            let zi = t.value(i, z_col);
            if zi <= z_late {
                break;
            }
            tau.push(t.value(i, tau_col));
            z.push(zi);
        }
        let top = (1.0 + z_late).ln();
        for j in 0..LATE_SAMPLES {
            let zi = if j + 1 == LATE_SAMPLES {
                0.0
            } else {
                (top * (1.0 - j as f64 / (LATE_SAMPLES - 1) as f64)).exp() - 1.0
            };
            tau.push(bg.tau_of_z(zi)?);
            z.push(zi);
        }
        Ok((tau, z))
    }

    pub fn config(&self) -> &PerturbationsConfig {
        &self.config
    }

    pub fn has_cls(&self) -> bool {
        self.config.output.has_cls()
    }

    pub fn has_cl_cmb_temperature(&self) -> bool {
        self.config.output.t_cl
    }

    pub fn has_cl_cmb_polarization(&self) -> bool {
        self.config.output.p_cl
    }

    pub fn has_cl_cmb_lensing_potential(&self) -> bool {
        self.config.output.l_cl
    }

    pub fn has_pk_matter(&self) -> bool {
        self.config.output.m_pk
    }

    pub fn has_density_transfers(&self) -> bool {
        self.config.output.d_tk
    }

    pub fn has_velocity_transfers(&self) -> bool {
        self.config.output.v_tk
    }

    pub fn has_cdi(&self) -> bool {
        self.config.ics.contains(&InitialCondition::CdmIsocurvature)
    }

    pub fn has_ncdm(&self) -> bool {
        self.has_ncdm
    }

    /// Separate baryon+CDM spectrum, only meaningful with massive neutrinos.
    pub fn has_pk_cb(&self) -> bool {
        self.has_ncdm && self.types.index(source::DELTA_CB).is_some()
    }

    pub fn k(&self) -> &[f64] {
        &self.k
    }

    pub fn k_range(&self) -> (f64, f64) {
        (self.k[0], self.k[self.k.len() - 1])
    }

    pub fn tau(&self) -> &[f64] {
        &self.tau
    }

    /// Redshift of each conformal-time sample.
    pub fn tau_z(&self) -> &[f64] {
        &self.z
    }

    /// First conformal-time sample used by matter power spectra.
    pub fn pk_first_tau(&self) -> usize {
        self.pk_first_tau
    }

    pub fn ics(&self) -> &[InitialCondition] {
        &self.config.ics
    }

    pub fn source_types(&self) -> &ColumnMap {
        &self.types
    }

    pub fn source_type(&self, name: &str) -> StageResult<Column> {
        self.types.require(name).map_err(StageError::query(STAGE))
    }

    pub fn grid(&self, ic: usize, ty: Column) -> StageResult<&Grid2> {
        if ic >= self.config.ics.len() {
            return Err(StageError::config(STAGE, format!("initial condition index {ic} out of range")));
        }
        Ok(&self.sources[ic * self.types.len() + ty.offset()])
    }

    pub fn source_grid(&self, ic: usize, type_name: &str) -> StageResult<&Grid2> {
        let ty = self.source_type(type_name)?;
        self.grid(ic, ty)
    }

    pub fn source_at(&self, ic: usize, type_name: &str, k: f64, tau: f64) -> StageResult<f64> {
        self.source_grid(ic, type_name)?
            .interpolate(k.ln(), tau, InterpMode::Normal, &mut Cursor2::default())
            .map_err(StageError::query(STAGE))
    }

    pub fn source_at_with(
        &self,
        ic: usize,
        ty: Column,
        k: f64,
        tau: f64,
        mode: InterpMode,
        cursor: &mut Cursor2,
    ) -> StageResult<f64> {
        self.grid(ic, ty)?
            .interpolate(k.ln(), tau, mode, cursor)
            .map_err(StageError::query(STAGE))
    }

    fn ic_suffix(&self, ic: InitialCondition) -> String {
        if self.config.ics.len() > 1 {
            format!("[{}]", ic.name())
        } else {
            String::new()
        }
    }

    fn transfer_fields(&self, format: OutputFormat) -> Vec<(&'static str, &'static str, Scale)> {
        let d = self.has_density_transfers();
        let v = self.has_velocity_transfers();
        let cb = d && self.has_ncdm;
        let mut fields = Vec::new();
        match format {
            OutputFormat::Class => {
                let entries = [
                    (d, "d_b", source::DELTA_B),
                    (d, "d_cdm", source::DELTA_CDM),
                    (d, "d_m", source::DELTA_M),
                    (cb, "d_cb", source::DELTA_CB),
                    (d, "phi", source::PHI),
                    (d, "psi", source::PSI),
                    (v, "t_b", source::THETA_B),
                    (v, "t_cdm", source::THETA_CDM),
                ];
                for (on, title, src) in entries {
                    if on {
                        fields.push((title, src, Scale::Identity));
                    }
                }
            }
            OutputFormat::Camb => {
                let entries = [
                    (d, "-T_cdm/k2", source::DELTA_CDM),
                    (d, "-T_b/k2", source::DELTA_B),
                    (d, "-T_tot/k2", source::DELTA_M),
                    (cb, "-T_cb/k2", source::DELTA_CB),
                ];
                for (on, title, src) in entries {
                    if on {
                        fields.push((title, src, Scale::MinusOverK2));
                    }
                }
            }
        }
        fields
    }

    pub fn transfer_titles(&self, format: OutputFormat) -> Vec<String> {
        let mut titles = vec!["k (h/Mpc)".to_string()];
        for &ic in &self.config.ics {
            let suffix = self.ic_suffix(ic);
            for (title, _, _) in self.transfer_fields(format) {
                titles.push(format!("{title}{suffix}"));
            }
        }
        titles
    }

    pub fn transfer_data(
        &self,
        bg: &Background,
        k: f64,
        z: f64,
        format: OutputFormat,
    ) -> StageResult<Vec<f64>> {
        let tau = bg.tau_of_z(z)?;
        let k_h = k / self.h;
        let mut row = vec![k_h];
        let fields = self.transfer_fields(format);
        let mut cursor = Cursor2::default();
        for ic in 0..self.config.ics.len() {
            for &(_, src, scale) in &fields {
                let ty = self.source_type(src)?;
                let v = self.source_at_with(ic, ty, k, tau, InterpMode::Normal, &mut cursor)?;
                row.push(match scale {
                    Scale::Identity => v,
                    Scale::MinusOverK2 => -v / (k_h * k_h),
                });
            }
        }
        Ok(row)
    }

    pub fn k_output_values(&self) -> &[f64] {
        &self.config.k_output_values
    }

    pub fn k_output_titles(&self) -> Vec<String> {
        let mut titles = vec!["tau [Mpc]".to_string(), "a".to_string()];
        for &ic in &self.config.ics {
            let suffix = self.ic_suffix(ic);
            for name in self.types.names() {
                titles.push(format!("{name}{suffix}"));
            }
        }
        titles
    }

    /// Every source at the `index`-th output wavenumber and conformal time `tau`.
    pub fn k_output_data(&self, bg: &Background, index: usize, tau: f64) -> StageResult<Vec<f64>> {
        let k = *self.config.k_output_values.get(index).ok_or_else(|| {
            StageError::config(STAGE, format!("no k_output_values entry {index}"))
        })?;
        let a = 1.0 / (1.0 + bg.z_of_tau(tau)?);
        let mut row = vec![tau, a];
        let mut cursor = Cursor2::default();
        for ic in 0..self.config.ics.len() {
            for (ty, _) in self.types.iter() {
                row.push(self.source_at_with(ic, ty, k, tau, InterpMode::GrowingCloseby, &mut cursor)?);
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundConfig;
    use crate::kernels::ReferenceKernels;
    use crate::thermodynamics::ThermodynamicsConfig;

    fn upstream(m_ncdm: f64) -> (Background, Thermodynamics) {
        let bg = Background::from_config(
            BackgroundConfig {
                z_max: 1e6,
                table_size: 1000,
                m_ncdm,
                ..BackgroundConfig::default()
            },
            &ReferenceKernels,
        )
        .unwrap();
        let mut th_config = ThermodynamicsConfig::default();
        th_config.table_size = 1600;
        let th = Thermodynamics::from_config(&bg, th_config, &ReferenceKernels).unwrap();
        (bg, th)
    }

    fn config(words: &[&str]) -> PerturbationsConfig {
        PerturbationsConfig {
            output: OutputRequest::parse(words).unwrap(),
            l_max_scalars: 500,
            k_per_decade: 8,
            ..PerturbationsConfig::default()
        }
    }

    #[test]
    fn enabled_types_follow_outputs() {
        let (bg, th) = upstream(0.0);
        let pt = Perturbations::from_config(&bg, &th, config(&["tCl", "mPk"]), &ReferenceKernels).unwrap();
        let names: Vec<&str> = pt.source_types().names().collect();
        assert_eq!(names, vec![source::T0, source::DELTA_M]);
        assert!(pt.has_cl_cmb_temperature() && pt.has_pk_matter() && !pt.has_pk_cb());
        assert!(pt.source_at(0, source::P, 0.01, pt.tau()[5]).is_err());
    }

    #[test]
    fn grids_are_strictly_increasing() {
        let (bg, th) = upstream(0.06);
        let pt = Perturbations::from_config(&bg, &th, config(&["mPk", "dTk"]), &ReferenceKernels).unwrap();
        assert!(pt.k().windows(2).all(|w| w[1] > w[0]));
        assert!(pt.tau().windows(2).all(|w| w[1] > w[0]));
        assert!(pt.has_pk_cb());
        let last = *pt.tau().last().unwrap();
        assert!((last - bg.conformal_age()).abs() < 1e-6 * last);
        assert_eq!(pt.pk_first_tau(), pt.tau().len() - 2);
    }

    #[test]
    fn matter_grows_with_time() {
        let (bg, th) = upstream(0.0);
        let pt = Perturbations::from_config(&bg, &th, config(&["mPk"]), &ReferenceKernels).unwrap();
        let tau = pt.tau();
        let early = pt.source_at(0, source::DELTA_M, 0.05, tau[tau.len() - 20]).unwrap();
        let late = pt.source_at(0, source::DELTA_M, 0.05, tau[tau.len() - 1]).unwrap();
        assert!(late.abs() > early.abs());
    }

    #[test]
    fn too_many_k_outputs_rejected() {
        let (bg, th) = upstream(0.0);
        let cfg = PerturbationsConfig {
            k_output_values: vec![0.01, 0.1, 0.2],
            max_k_output_values: 2,
            ..config(&["mPk"])
        };
        let err = Perturbations::from_config(&bg, &th, cfg, &ReferenceKernels).unwrap_err();
        assert!(matches!(err, StageError::Configuration { .. }));
    }

    #[test]
    fn transfer_titles_pair_with_data() {
        let (bg, th) = upstream(0.06);
        let cfg = PerturbationsConfig {
            ics: vec![InitialCondition::Adiabatic, InitialCondition::CdmIsocurvature],
            ..config(&["dTk", "vTk"])
        };
        let pt = Perturbations::from_config(&bg, &th, cfg, &ReferenceKernels).unwrap();
        for format in [OutputFormat::Class, OutputFormat::Camb] {
            let titles = pt.transfer_titles(format);
            let row = pt.transfer_data(&bg, 0.1, 0.0, format).unwrap();
            assert_eq!(titles.len(), row.len(), "{format:?}");
        }
        assert_eq!(pt.transfer_titles(OutputFormat::Class).len(), 1 + 2 * 8);
    }

    #[test]
    fn k_output_rows_pair_with_titles() {
        let (bg, th) = upstream(0.0);
        let cfg = PerturbationsConfig {
            k_output_values: vec![0.05],
            ..config(&["tCl", "mPk"])
        };
        let pt = Perturbations::from_config(&bg, &th, cfg, &ReferenceKernels).unwrap();
        let tau = pt.tau()[pt.tau().len() / 2];
        let row = pt.k_output_data(&bg, 0, tau).unwrap();
        assert_eq!(row.len(), pt.k_output_titles().len());
        assert!(pt.k_output_data(&bg, 1, tau).is_err());
    }
}
