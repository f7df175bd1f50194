//! The stage orchestrator.
//!
//! [`run`] builds every requested stage in dependency order. The first
//! failure stops the run: later stages never start, everything already built
//! is released newest first, and the failing stage's error is returned as is.

use cf_core::{Lifecycle, StageKind, StageTimings, Timer};
use cf_params::{Parameter, ParameterSet};
use cf_stages::{
    Background, Distortions, Kernels, Lensing, Nonlinear, Perturbations, Primordial, Spectra,
    StageResult, StageSlot, Thermodynamics, Transfer,
};
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::plan::{OutputOptions, RunPlan};
use crate::progress::{PipelineEvent, StageStatus};

/// Every stage state produced by one run, plus the parameters it read.
#[derive(Debug)]
pub struct Cosmology {
    params: ParameterSet,
    plan: RunPlan,
    pub(crate) background: StageSlot<Background>,
    pub(crate) thermodynamics: StageSlot<Thermodynamics>,
    pub(crate) perturbations: StageSlot<Perturbations>,
    pub(crate) primordial: StageSlot<Primordial>,
    pub(crate) nonlinear: StageSlot<Nonlinear>,
    pub(crate) transfer: StageSlot<Transfer>,
    pub(crate) spectra: StageSlot<Spectra>,
    pub(crate) lensing: StageSlot<Lensing>,
    pub(crate) distortions: StageSlot<Distortions>,
    timings: StageTimings,
}

/// Run every requested stage.
pub fn run(params: ParameterSet, kernels: &dyn Kernels) -> PipelineResult<Cosmology> {
    run_with_progress(params, kernels, &mut |_| {})
}

/// Run every requested stage, reporting each stage transition to `progress`.
pub fn run_with_progress(
    mut params: ParameterSet,
    kernels: &dyn Kernels,
    progress: &mut dyn FnMut(PipelineEvent),
) -> PipelineResult<Cosmology> {
    let plan = RunPlan::from_params(&mut params)?;
    let mut cosmo = Cosmology::new(params, plan);
    let mut clock = RunClock {
        run: Timer::start(),
        timings: StageTimings::default(),
        progress,
    };

    if let Err(e) = cosmo.build(kernels, &mut clock) {
        cosmo.free();
        return Err(e);
    }
    cosmo.timings = clock.timings;
    info!(total_s = cosmo.timings.total_s(), "run complete");

    let unused = cosmo.unused_parameters();
    if !unused.is_empty() {
        let names: Vec<String> = unused.iter().map(|p| p.name.clone()).collect();
        warn!(count = names.len(), names = %names.join(", "), "parameters were never read");
        if cosmo.plan.strict_parameters {
            cosmo.free();
            return Err(PipelineError::UnusedParameters { names });
        }
    }
    Ok(cosmo)
}

/// Run-wide timing and progress reporting.
struct RunClock<'a> {
    run: Timer,
    timings: StageTimings,
    progress: &'a mut dyn FnMut(PipelineEvent),
}

impl RunClock<'_> {
    fn emit(&mut self, stage: StageKind, status: StageStatus, message: Option<String>) {
        (self.progress)(PipelineEvent {
            stage,
            status,
            elapsed_s: self.run.elapsed_s(),
            message,
        });
    }

    /// Drive one slot through its lifecycle.
    fn step<T>(
        &mut self,
        slot: &mut StageSlot<T>,
        wanted: bool,
        init: impl FnOnce() -> StageResult<T>,
    ) -> PipelineResult<()> {
        let stage = slot.kind();
        if !wanted {
            debug!(stage = %stage, "not requested");
            self.emit(stage, StageStatus::Skipped, None);
            return Ok(());
        }
        self.emit(stage, StageStatus::Started, None);
        slot.begin();
        let timer = Timer::start();
        let outcome = slot.complete(init());
        let seconds = timer.stop();
        match outcome {
            Ok(()) => {
                info!(stage = %stage, seconds, "ready");
                self.timings.record(stage, seconds);
                self.emit(stage, StageStatus::Ready, None);
                Ok(())
            }
            Err(e) => {
                error!(stage = %stage, "{e}");
                self.emit(stage, StageStatus::Failed, Some(e.to_string()));
                Err(e.into())
            }
        }
    }
}

impl Cosmology {
    fn new(params: ParameterSet, plan: RunPlan) -> Self {
        Self {
            params,
            plan,
            background: StageSlot::new(StageKind::Background),
            thermodynamics: StageSlot::new(StageKind::Thermodynamics),
            perturbations: StageSlot::new(StageKind::Perturbations),
            primordial: StageSlot::new(StageKind::Primordial),
            nonlinear: StageSlot::new(StageKind::Nonlinear),
            transfer: StageSlot::new(StageKind::Transfer),
            spectra: StageSlot::new(StageKind::Spectra),
            lensing: StageSlot::new(StageKind::Lensing),
            distortions: StageSlot::new(StageKind::Distortions),
            timings: StageTimings::default(),
        }
    }

    fn build(&mut self, kernels: &dyn Kernels, clock: &mut RunClock<'_>) -> PipelineResult<()> {
        let plan = &self.plan;

        clock.step(&mut self.background, true, || {
            Background::init(&mut self.params, kernels)
        })?;

        let bg = self.background.require(StageKind::Thermodynamics)?;
        clock.step(&mut self.thermodynamics, true, || {
            Thermodynamics::init(bg, &mut self.params, kernels)
        })?;
        let th = self.thermodynamics.require(StageKind::Perturbations)?;

        clock.step(&mut self.perturbations, plan.wants(StageKind::Perturbations), || {
            Perturbations::init(bg, th, &plan.request.output, &mut self.params, kernels)
        })?;
        let pt = self.perturbations.get();

        clock.step(&mut self.primordial, plan.wants(StageKind::Primordial), || {
            let pt = need(pt, StageKind::Primordial, StageKind::Perturbations)?;
            Primordial::init(pt, &mut self.params, kernels)
        })?;
        let pm = self.primordial.get();

        clock.step(&mut self.nonlinear, plan.wants(StageKind::Nonlinear), || {
            Nonlinear::init(
                bg,
                need(pt, StageKind::Nonlinear, StageKind::Perturbations)?,
                need(pm, StageKind::Nonlinear, StageKind::Primordial)?,
                plan.request.non_linear,
                &mut self.params,
                kernels,
            )
        })?;

        clock.step(&mut self.transfer, plan.wants(StageKind::Transfer), || {
            let pt = need(pt, StageKind::Transfer, StageKind::Perturbations)?;
            Transfer::init(bg, th, pt, &mut self.params, kernels)
        })?;
        let tr = self.transfer.get();

        clock.step(&mut self.spectra, plan.wants(StageKind::Spectra), || {
            Spectra::init(
                bg,
                need(pt, StageKind::Spectra, StageKind::Perturbations)?,
                need(pm, StageKind::Spectra, StageKind::Primordial)?,
                tr,
                kernels,
            )
        })?;
        let sp = self.spectra.get();

        clock.step(&mut self.lensing, plan.wants(StageKind::Lensing), || {
            let sp = need(sp, StageKind::Lensing, StageKind::Spectra)?;
            Lensing::init(sp, &mut self.params, kernels)
        })?;

        clock.step(&mut self.distortions, plan.wants(StageKind::Distortions), || {
            Distortions::init(bg, th, &mut self.params, kernels)
        })?;
        Ok(())
    }

    /// Release every ready stage, newest first. Safe to call repeatedly.
    pub fn free(&mut self) {
        let mut freed = 0;
        freed += self.distortions.free() as usize;
        freed += self.lensing.free() as usize;
        freed += self.spectra.free() as usize;
        freed += self.transfer.free() as usize;
        freed += self.nonlinear.free() as usize;
        freed += self.primordial.free() as usize;
        freed += self.perturbations.free() as usize;
        freed += self.thermodynamics.free() as usize;
        freed += self.background.free() as usize;
        if freed > 0 {
            debug!(freed, "stages released");
        }
    }

    pub fn lifecycle(&self, stage: StageKind) -> Lifecycle {
        match stage {
            StageKind::Background => self.background.lifecycle(),
            StageKind::Thermodynamics => self.thermodynamics.lifecycle(),
            StageKind::Perturbations => self.perturbations.lifecycle(),
            StageKind::Primordial => self.primordial.lifecycle(),
            StageKind::Nonlinear => self.nonlinear.lifecycle(),
            StageKind::Transfer => self.transfer.lifecycle(),
            StageKind::Spectra => self.spectra.lifecycle(),
            StageKind::Lensing => self.lensing.lifecycle(),
            StageKind::Distortions => self.distortions.lifecycle(),
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Entries no stage read during the run.
    pub fn unused_parameters(&self) -> Vec<&Parameter> {
        self.params.unused()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn output_options(&self) -> &OutputOptions {
        &self.plan.options
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.get()
    }

    pub fn thermodynamics(&self) -> Option<&Thermodynamics> {
        self.thermodynamics.get()
    }

    pub fn perturbations(&self) -> Option<&Perturbations> {
        self.perturbations.get()
    }

    pub fn primordial(&self) -> Option<&Primordial> {
        self.primordial.get()
    }

    pub fn nonlinear(&self) -> Option<&Nonlinear> {
        self.nonlinear.get()
    }

    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.get()
    }

    pub fn spectra(&self) -> Option<&Spectra> {
        self.spectra.get()
    }

    pub fn lensing(&self) -> Option<&Lensing> {
        self.lensing.get()
    }

    pub fn distortions(&self) -> Option<&Distortions> {
        self.distortions.get()
    }
}

impl Drop for Cosmology {
    fn drop(&mut self) {
        self.free();
    }
}

/// An upstream state that must exist for `stage` to start.
fn need<T>(state: Option<&T>, stage: StageKind, needs: StageKind) -> StageResult<&T> {
    state.ok_or(cf_stages::StageError::Dependency { stage, needs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_stages::ReferenceKernels;

    fn params(pairs: &[(&str, &str)]) -> ParameterSet {
        ParameterSet::from_pairs("test", pairs.iter().copied()).unwrap()
    }

    #[test]
    fn background_only_run_skips_the_rest() {
        let mut events = Vec::new();
        let cosmo =
            run_with_progress(params(&[]), &ReferenceKernels, &mut |e| events.push(e)).unwrap();
        assert_eq!(cosmo.lifecycle(StageKind::Background), Lifecycle::Ready);
        assert_eq!(cosmo.lifecycle(StageKind::Thermodynamics), Lifecycle::Ready);
        for stage in &StageKind::ALL[2..] {
            assert_eq!(cosmo.lifecycle(*stage), Lifecycle::Uninitialized, "{stage}");
        }
        let skipped = events
            .iter()
            .filter(|e| e.status == StageStatus::Skipped)
            .count();
        assert_eq!(skipped, 7);
        assert!(cosmo.timings().get(StageKind::Background).is_some());
    }

    #[test]
    fn free_twice_is_harmless() {
        let mut cosmo = run(params(&[]), &ReferenceKernels).unwrap();
        cosmo.free();
        cosmo.free();
        assert_eq!(cosmo.lifecycle(StageKind::Background), Lifecycle::Freed);
        assert!(cosmo.background().is_none());
    }

    #[test]
    fn unknown_parameter_is_reported() {
        let cosmo = run(params(&[("omega_typo", "0.1")]), &ReferenceKernels).unwrap();
        let unused: Vec<&str> = cosmo
            .unused_parameters()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(unused, vec!["omega_typo"]);
    }

    struct BrokenThermo;

    impl Kernels for BrokenThermo {
        fn thermodynamics(
            &self,
            _bg: &Background,
            _cfg: &cf_stages::ThermodynamicsConfig,
            _out: &mut cf_table::TableBuilder,
        ) -> StageResult<()> {
            Err(cf_stages::StageError::numerical(StageKind::Thermodynamics, "no convergence"))
        }
    }

    #[test]
    fn failure_frees_upstream_and_marks_the_culprit() {
        let mut p = params(&[("output", "mPk")]);
        let plan = RunPlan::from_params(&mut p).unwrap();
        let mut cosmo = Cosmology::new(p, plan);
        let mut sink = |_: PipelineEvent| {};
        let mut clock = RunClock {
            run: Timer::start(),
            timings: StageTimings::default(),
            progress: &mut sink,
        };
        assert!(cosmo.build(&BrokenThermo, &mut clock).is_err());
        assert_eq!(cosmo.lifecycle(StageKind::Background), Lifecycle::Ready);
        cosmo.free();
        assert_eq!(cosmo.lifecycle(StageKind::Background), Lifecycle::Freed);
        assert_eq!(cosmo.lifecycle(StageKind::Thermodynamics), Lifecycle::Failed);
        assert_eq!(cosmo.lifecycle(StageKind::Perturbations), Lifecycle::Uninitialized);
    }

    #[test]
    fn cosmology_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Cosmology>();
    }
}
