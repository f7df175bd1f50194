use core::fmt;

/// The pipeline stages, declared in dependency order.
///
/// The discriminant is the position in the run order; teardown walks it
/// backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StageKind {
    Background,
    Thermodynamics,
    Perturbations,
    Primordial,
    Nonlinear,
    Transfer,
    Spectra,
    Lensing,
    Distortions,
}

impl StageKind {
    /// All stages in run order.
    pub const ALL: [StageKind; 9] = [
        StageKind::Background,
        StageKind::Thermodynamics,
        StageKind::Perturbations,
        StageKind::Primordial,
        StageKind::Nonlinear,
        StageKind::Transfer,
        StageKind::Spectra,
        StageKind::Lensing,
        StageKind::Distortions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Background => "background",
            StageKind::Thermodynamics => "thermodynamics",
            StageKind::Perturbations => "perturbations",
            StageKind::Primordial => "primordial",
            StageKind::Nonlinear => "nonlinear",
            StageKind::Transfer => "transfer",
            StageKind::Spectra => "spectra",
            StageKind::Lensing => "lensing",
            StageKind::Distortions => "distortions",
        }
    }

    /// Stages whose states must be ready before this one can start.
    ///
    /// Optional inputs (the transfer tables spectra use when present) are not
    /// listed.
    pub fn upstream(self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            Background => &[],
            Thermodynamics => &[Background],
            Perturbations => &[Background, Thermodynamics],
            Primordial => &[Perturbations],
            Nonlinear => &[Background, Perturbations, Primordial],
            Transfer => &[Background, Thermodynamics, Perturbations],
            Spectra => &[Background, Perturbations, Primordial],
            Lensing => &[Spectra],
            Distortions => &[Background, Thermodynamics],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of one stage state inside a pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Freed,
}

impl Lifecycle {
    pub fn is_ready(self) -> bool {
        self == Lifecycle::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_order_follows_declaration() {
        assert!(StageKind::ALL.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn upstream_stages_run_earlier() {
        for stage in StageKind::ALL {
            for &up in stage.upstream() {
                assert!(up < stage, "{up} after {stage}");
            }
        }
    }

    #[test]
    fn only_ready_counts_as_ready() {
        assert!(Lifecycle::Ready.is_ready());
        assert!(!Lifecycle::Freed.is_ready());
        assert!(!Lifecycle::Initializing.is_ready());
    }

    #[test]
    fn display_uses_module_name() {
        assert_eq!(StageKind::Thermodynamics.to_string(), "thermodynamics");
    }
}
