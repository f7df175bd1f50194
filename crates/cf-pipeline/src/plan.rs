//! Deciding which stages a run executes and where its output goes.

use cf_core::StageKind;
use cf_params::{ParamResult, ParameterSet};
use cf_stages::{Request, StageError};
use cf_table::OutputFormat;
use serde::Serialize;

use crate::error::PipelineResult;

/// Where and how output files are written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputOptions {
    /// Prefix prepended to every file name, e.g. `output/run1_`.
    pub root: String,
    #[serde(serialize_with = "format_name")]
    pub format: OutputFormat,
    pub write_background: bool,
    pub write_thermodynamics: bool,
    pub write_primordial: bool,
    pub write_parameters: bool,
    /// Redshifts of the P(k) and transfer-function files.
    pub z_pk: Vec<f64>,
}

fn format_name<S: serde::Serializer>(format: &OutputFormat, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(format.name())
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            root: "output/".to_string(),
            format: OutputFormat::Class,
            write_background: false,
            write_thermodynamics: false,
            write_primordial: false,
            write_parameters: true,
            z_pk: vec![0.0],
        }
    }
}

impl OutputOptions {
    pub fn from_params(params: &mut ParameterSet) -> ParamResult<Self> {
        let d = Self::default();
        let format = match params.choice_or("format", &["class", "camb"], "class")? {
            "camb" => OutputFormat::Camb,
            _ => OutputFormat::Class,
        };
        let mut z_pk = params.f64_list("z_pk")?;
        if z_pk.is_empty() {
            z_pk = d.z_pk.clone();
        }
        Ok(Self {
            root: params.string_or("root", &d.root),
            format,
            write_background: params.flag_or("write_background", d.write_background)?,
            write_thermodynamics: params.flag_or("write_thermodynamics", d.write_thermodynamics)?,
            write_primordial: params.flag_or("write_primordial", d.write_primordial)?,
            write_parameters: params.flag_or("write_parameters", d.write_parameters)?,
            z_pk,
        })
    }

    pub fn path(&self, name: &str) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("{}{}", self.root, name))
    }
}

/// Everything decided before the first stage runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub request: Request,
    pub options: OutputOptions,
    pub strict_parameters: bool,
}

impl RunPlan {
    pub fn from_params(params: &mut ParameterSet) -> PipelineResult<Self> {
        let request = Request::from_params(params)?;
        let options = OutputOptions::from_params(params)?;
        let strict_parameters = params.flag_or("strict_parameters", false)?;
        if request.lensing && !request.lensing_possible() {
            return Err(StageError::config(
                StageKind::Lensing,
                "lensing = yes needs lCl together with tCl or pCl",
            )
            .into());
        }
        // matter spectra must reach the deepest requested output redshift
        let z_top = options.z_pk.iter().copied().fold(0.0, f64::max);
        let pk_like = request.output.m_pk || request.output.has_transfers();
        if pk_like && z_top > 0.0 && !params.contains("z_max_pk") {
            params.set("z_max_pk", &z_top.to_string())?;
        }
        Ok(Self {
            request,
            options,
            strict_parameters,
        })
    }

    /// Whether `stage` runs: either an output asks for it, or a stage that
    /// runs needs it upstream.
    pub fn wants(&self, stage: StageKind) -> bool {
        self.requested(stage)
            || StageKind::ALL
                .into_iter()
                .filter(|later| *later > stage)
                .any(|later| later.upstream().contains(&stage) && self.wants(later))
    }

    fn requested(&self, stage: StageKind) -> bool {
        let out = &self.request.output;
        match stage {
            StageKind::Background | StageKind::Thermodynamics => true,
            StageKind::Perturbations | StageKind::Primordial => out.needs_perturbations(),
            StageKind::Nonlinear => self.request.wants_nonlinear(),
            StageKind::Transfer => out.has_cls(),
            StageKind::Spectra => out.has_cls() || out.m_pk,
            StageKind::Lensing => self.request.lensing,
            StageKind::Distortions => out.sd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(pairs: &[(&str, &str)]) -> PipelineResult<RunPlan> {
        let mut p = ParameterSet::from_pairs("t", pairs.iter().copied()).unwrap();
        RunPlan::from_params(&mut p)
    }

    #[test]
    fn background_and_thermodynamics_always_run() {
        let p = plan(&[]).unwrap();
        assert!(p.wants(StageKind::Background) && p.wants(StageKind::Thermodynamics));
        assert!(!p.wants(StageKind::Perturbations) && !p.wants(StageKind::Spectra));
    }

    #[test]
    fn cl_output_pulls_in_transfer_and_spectra() {
        let p = plan(&[("output", "tCl")]).unwrap();
        assert!(p.wants(StageKind::Transfer) && p.wants(StageKind::Spectra));
        assert!(!p.wants(StageKind::Nonlinear) && !p.wants(StageKind::Distortions));
    }

    #[test]
    fn wanted_stages_have_their_upstream_wanted() {
        for output in ["tCl", "mPk", "tCl,pCl,lCl", "mTk,vTk", "Sd", "mPk,Sd"] {
            let p = plan(&[("output", output), ("non_linear", "halofit")]).unwrap();
            for stage in StageKind::ALL.into_iter().filter(|s| p.wants(*s)) {
                for &up in stage.upstream() {
                    assert!(p.wants(up), "{output}: {stage} runs without {up}");
                }
            }
        }
    }

    #[test]
    fn lensing_without_potential_is_rejected() {
        let err = plan(&[("output", "tCl"), ("lensing", "yes")]).unwrap_err();
        assert!(err.to_string().contains("lensing"));
    }

    #[test]
    fn nonlinear_needs_mpk() {
        let p = plan(&[("output", "tCl"), ("non_linear", "halofit")]).unwrap();
        assert!(!p.wants(StageKind::Nonlinear));
        let p = plan(&[("output", "mPk"), ("non_linear", "hmcode")]).unwrap();
        assert!(p.wants(StageKind::Nonlinear));
    }

    #[test]
    fn z_pk_raises_z_max_pk() {
        let mut p = ParameterSet::from_pairs("t", [("output", "mPk"), ("z_pk", "0, 1.5")]).unwrap();
        RunPlan::from_params(&mut p).unwrap();
        assert_eq!(p.peek("z_max_pk"), Some("1.5"));
    }
}
