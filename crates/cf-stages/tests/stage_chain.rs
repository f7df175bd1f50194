//! Stages built directly on each other, without the orchestrator.

use cf_params::ParameterSet;
use cf_stages::spectra::cl;
use cf_stages::{
    Background, BackgroundConfig, Distortions, ErrorKind, Lensing, Nonlinear, NonlinearMethod,
    OutputRequest, Perturbations, PkMode, Primordial, ReferenceKernels, Spectra, Thermodynamics,
    Tracer, Transfer,
};
use cf_table::OutputFormat;
use proptest::prelude::*;

fn params(pairs: &[(&str, &str)]) -> ParameterSet {
    ParameterSet::from_pairs("test", pairs.iter().copied()).unwrap()
}

struct Chain {
    bg: Background,
    th: Thermodynamics,
    pt: Perturbations,
    pm: Primordial,
}

fn chain(output: &[&str], extra: &[(&str, &str)]) -> Chain {
    let k = ReferenceKernels;
    let mut p = params(extra);
    let req = OutputRequest::parse(output).unwrap();
    let bg = Background::init(&mut p, &k).unwrap();
    let th = Thermodynamics::init(&bg, &mut p, &k).unwrap();
    let pt = Perturbations::init(&bg, &th, &req, &mut p, &k).unwrap();
    let pm = Primordial::init(&pt, &mut p, &k).unwrap();
    Chain { bg, th, pt, pm }
}

#[test]
fn matter_spectrum_and_sigma8() {
    let c = chain(&["mPk"], &[("z_max_pk", "2")]);
    let sp = Spectra::init(&c.bg, &c.pt, &c.pm, None, &ReferenceKernels).unwrap();
    assert!(!sp.has_cls());
    let s8 = sp.derived().sigma8.unwrap();
    assert!(s8 > 0.3 && s8 < 2.0, "sigma8 = {s8}");

    let p0 = sp.pk_at_k_and_z(&c.bg, None, 0.1, 0.0, PkMode::Linear).unwrap();
    let p2 = sp.pk_at_k_and_z(&c.bg, None, 0.1, 2.0, PkMode::Linear).unwrap();
    assert!(p0.total > p2.total);
    assert_eq!(p0.per_ic.len(), 1);
    let row = sp.pk_data(&c.bg, None, 0.1, 0.0, PkMode::Linear).unwrap();
    for format in [OutputFormat::Class, OutputFormat::Camb] {
        assert_eq!(sp.pk_titles(format).len(), row.len());
    }

    // the one sigma accessor reproduces the derived value
    let s = sp
        .sigma(&c.bg, None, 8.0 / c.bg.h(), 0.0, Tracer::Matter, PkMode::Linear)
        .unwrap();
    assert!((s - s8).abs() < 1e-6 * s8);

    let err = sp.pk_at_k_and_z(&c.bg, None, 0.1, 3.0, PkMode::Linear).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
    let err = sp.pk_at_k_and_z(&c.bg, None, 0.1, 0.0, PkMode::Nonlinear).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
}

#[test]
fn batch_matches_pointwise() {
    let c = chain(&["mPk"], &[("z_max_pk", "1")]);
    let sp = Spectra::init(&c.bg, &c.pt, &c.pm, None, &ReferenceKernels).unwrap();
    let points = [(0.05, 0.5), (0.2, 0.0), (0.01, 0.5), (0.1, 1.0)];
    let batch = sp.pk_at_kz_batch(&c.bg, None, &points, PkMode::Linear).unwrap();
    for (&(k, z), b) in points.iter().zip(&batch) {
        let one = sp.pk_at_k_and_z(&c.bg, None, k, z, PkMode::Linear).unwrap();
        assert!((one.total - b.total).abs() <= 1e-12 * one.total);
    }
}

#[test]
fn nonlinear_boost_grows_with_k() {
    let c = chain(&["mPk"], &[]);
    let mut p = params(&[]);
    let nl = Nonlinear::init(&c.bg, &c.pt, &c.pm, NonlinearMethod::Halofit, &mut p, &ReferenceKernels)
        .unwrap();
    let sp = Spectra::init(&c.bg, &c.pt, &c.pm, None, &ReferenceKernels).unwrap();
    let lin = sp.pk_at_k_and_z(&c.bg, Some(&nl), 0.5, 0.0, PkMode::Linear).unwrap();
    let non = sp.pk_at_k_and_z(&c.bg, Some(&nl), 0.5, 0.0, PkMode::Nonlinear).unwrap();
    assert!(non.total >= lin.total);
    let row = nl.data_at_k_z(&c.bg, 0.5, 0.0, OutputFormat::Class).unwrap();
    assert_eq!(row.len(), nl.titles(OutputFormat::Class).len());
}

#[test]
fn angular_spectra_and_lensing() {
    let c = chain(&["tCl", "pCl", "lCl"], &[("l_max_scalars", "600")]);
    let k = ReferenceKernels;
    let mut p = params(&[("l_max_scalars", "600"), ("lensing_margin", "100")]);
    let tr = Transfer::init(&c.bg, &c.th, &c.pt, &mut p, &k).unwrap();
    assert!(tr.has_temperature() && tr.has_polarization() && tr.has_lensing_potential());
    let sp = Spectra::init(&c.bg, &c.pt, &c.pm, Some(&tr), &k).unwrap();
    assert_eq!(sp.cl_types(), vec![cl::TT, cl::EE, cl::TE, cl::PP, cl::TP]);

    let value = sp.cl_at_l(100.0).unwrap();
    assert_eq!(value.total.len(), 5);
    assert_eq!(value.per_ic.len(), 1);
    assert!(value.total[0] > 0.0 && value.total[1] > 0.0);

    for format in [OutputFormat::Class, OutputFormat::Camb] {
        assert_eq!(sp.cl_titles(format).len(), sp.cl_data(42.0, format).unwrap().len());
    }
    assert_eq!(sp.cl_titles(OutputFormat::Class)[4], "phiphi");

    let le = Lensing::init(&sp, &mut p, &k).unwrap();
    assert_eq!(le.l_max(), 500);
    let lensed = le.lensed_cl_at_l(250.0).unwrap();
    assert_eq!(lensed.len(), le.cl_types().len());
    assert!(le.has_cl(cl::BB));
    assert!(le.lensed_cl_at_l(501.0).is_err());
    for format in [OutputFormat::Class, OutputFormat::Camb] {
        assert_eq!(le.titles(format).len(), le.cl_data(300.0, format).unwrap().len());
    }
    assert_eq!(le.titles(OutputFormat::Camb), vec!["L", "TT", "EE", "BB", "TE"]);

    // a margin leaving only l = 2 is refused rather than built
    let mut p = params(&[("lensing_margin", "598")]);
    let err = Lensing::init(&sp, &mut p, &k).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn distortions_are_small_and_negative() {
    let c = chain(&["mPk"], &[]);
    let mut p = params(&[]);
    let sd = Distortions::init(&c.bg, &c.th, &mut p, &ReferenceKernels).unwrap();
    let d = sd.derived();
    assert!(d.mu < 0.0 && d.mu > -1e-7, "mu = {}", d.mu);
    assert!(d.y < 0.0 && d.y > -1e-7, "y = {}", d.y);
    assert_eq!(sd.titles(OutputFormat::Class).len(), sd.data_at_z(2e4, OutputFormat::Class).unwrap().len());
    assert_eq!(sd.spectrum_titles().len(), sd.spectrum_data(3.0).unwrap().len());
    assert!(sd.spectrum_data(50.0).is_err());
}

#[test]
fn every_stage_pairs_titles_with_rows() {
    let c = chain(&["mPk", "dTk", "vTk"], &[("k_output_values", "0.01, 0.1")]);
    for format in [OutputFormat::Class, OutputFormat::Camb] {
        assert_eq!(c.bg.titles(format).len(), c.bg.data_at_z(3.0, format).unwrap().len());
        assert_eq!(c.th.titles(format).len(), c.th.data_at_z(900.0, format).unwrap().len());
        assert_eq!(
            c.pt.transfer_titles(format).len(),
            c.pt.transfer_data(&c.bg, 0.05, 0.0, format).unwrap().len()
        );
        assert_eq!(c.pm.titles(format).len(), c.pm.data_at_k(0.05, format).unwrap().len());
    }
    let tau = c.bg.tau_of_z(10.0).unwrap();
    assert_eq!(c.pt.k_output_titles().len(), c.pt.k_output_data(&c.bg, 1, tau).unwrap().len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn background_axes_stay_monotonic(h in 0.55_f64..0.8, omega_cdm in 0.08_f64..0.16) {
        let cfg = BackgroundConfig { h, omega_cdm, table_size: 400, ..BackgroundConfig::default() };
        let bg = Background::from_config(cfg, &ReferenceKernels).unwrap();
        let t = bg.table();
        for &axis in t.axes() {
            let v = t.column_vec(axis);
            let up = v.windows(2).all(|w| w[1] > w[0]);
            let down = v.windows(2).all(|w| w[1] < w[0]);
            prop_assert!(up || down);
        }
        let tau = bg.tau_of_z(100.0).unwrap();
        let z = bg.z_of_tau(tau).unwrap();
        prop_assert!((z - 100.0).abs() < 1e-3 * 100.0);
    }
}
