//! Stage states for the cosmoflow pipeline.
//!
//! Provides:
//! - one state type per stage, each owning its result tables
//! - stage configs read from a parameter set
//! - the `Kernels` seam and the closed-form `ReferenceKernels`
//! - lifecycle slots and the fixed-step RK4 integrator
//! - matter power and variance helpers shared by several stages

pub mod background;
pub mod distortions;
pub mod error;
pub mod integrator;
pub mod kernels;
pub mod lensing;
pub mod matter;
pub mod nonlinear;
pub mod perturbations;
pub mod primordial;
pub mod request;
pub mod slot;
pub mod spectra;
pub mod thermodynamics;
pub mod transfer;

// Internal modules
mod reference;

// Re-exports for public API
pub use background::{Background, BackgroundConfig};
pub use distortions::{BranchingApprox, Distortions, DistortionsConfig, DistortionsDerived};
pub use error::{ErrorKind, StageError, StageResult};
pub use integrator::{Integrator, OdeSystem, Rk4, integrate_on_grid};
pub use kernels::{Kernels, ReferenceKernels};
pub use lensing::{Lensing, LensingConfig};
pub use matter::{Tracer, sigma_from_pk};
pub use nonlinear::{Nonlinear, NonlinearConfig, NonlinearMethod};
pub use perturbations::{InitialCondition, Perturbations, PerturbationsConfig};
pub use primordial::{Primordial, PrimordialConfig};
pub use request::{OutputRequest, Request};
pub use slot::StageSlot;
pub use spectra::{ClValue, PkMode, PkValue, Spectra, SpectraDerived};
pub use thermodynamics::{ThermoDerived, Thermodynamics, ThermodynamicsConfig};
pub use transfer::{Transfer, TransferConfig};
