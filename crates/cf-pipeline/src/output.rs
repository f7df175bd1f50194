//! Text and JSON output for a finished run.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cf_core::{Lifecycle, StageKind};
use cf_stages::{PkMode, StageResult};
use cf_table::write_dat;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Cosmology;
use crate::plan::OutputOptions;
use crate::query::DerivedParameters;

/// One stage's outcome in `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub lifecycle: Lifecycle,
    pub seconds: Option<f64>,
}

/// Machine-readable record of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stages: Vec<StageReport>,
    pub total_s: f64,
    pub derived: DerivedParameters,
    pub unused_parameters: Vec<String>,
    pub options: OutputOptions,
}

impl RunSummary {
    pub fn collect(cosmo: &Cosmology, options: &OutputOptions) -> StageResult<Self> {
        let stages = StageKind::ALL
            .iter()
            .map(|&stage| StageReport {
                stage,
                lifecycle: cosmo.lifecycle(stage),
                seconds: cosmo.timings().get(stage),
            })
            .collect();
        Ok(Self {
            stages,
            total_s: cosmo.timings().total_s(),
            derived: cosmo.derived()?,
            unused_parameters: cosmo
                .unused_parameters()
                .iter()
                .map(|p| p.name.clone())
                .collect(),
            options: options.clone(),
        })
    }
}

/// Create `path` and hand a buffered writer to `fill`.
fn write_file<F>(path: &Path, fill: F) -> PipelineResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let io_err = |source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    fill(&mut out).map_err(io_err)?;
    out.flush().map_err(io_err)
}

/// `z1_pk.dat`, `z2_pk.dat`, ... when several redshifts are written.
fn z_indexed(name: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("z{}_{name}", index + 1)
    } else {
        name.to_string()
    }
}

struct Writer<'a> {
    options: &'a OutputOptions,
    written: Vec<PathBuf>,
}

impl Writer<'_> {
    fn dat(
        &mut self,
        name: &str,
        header: &[String],
        titles: &[String],
        rows: Vec<Vec<f64>>,
    ) -> PipelineResult<()> {
        let path = self.options.path(name);
        write_file(&path, |out| write_dat(out, header, titles, rows))?;
        self.written.push(path);
        Ok(())
    }

    fn text(&mut self, name: &str, body: &str) -> PipelineResult<()> {
        let path = self.options.path(name);
        write_file(&path, |out| out.write_all(body.as_bytes()))?;
        self.written.push(path);
        Ok(())
    }
}

/// Write every file the run and its options call for. Returns the paths written.
pub fn write_outputs(cosmo: &Cosmology, options: &OutputOptions) -> PipelineResult<Vec<PathBuf>> {
    // the root may be a directory ("output/") or a file prefix ("output/run1_")
    let first_file = options.path("_");
    if let Some(parent) = first_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| PipelineError::Output {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let format = options.format;
    let mut w = Writer {
        options,
        written: Vec::new(),
    };

    if options.write_background {
        if let Some(bg) = cosmo.background() {
            let header = vec![format!("background table, {} rows", bg.table().rows())];
            w.dat("background.dat", &header, &bg.titles(format), bg.export_rows(format))?;
        }
    }
    if options.write_thermodynamics {
        if let Some(th) = cosmo.thermodynamics() {
            let header = vec![format!("thermodynamics table, {} rows", th.table().rows())];
            w.dat("thermodynamics.dat", &header, &th.titles(format), th.export_rows(format))?;
        }
    }
    if options.write_primordial {
        if let Some(pm) = cosmo.primordial() {
            let header = vec!["primordial spectra".to_string()];
            w.dat("primordial.dat", &header, &pm.titles(format), pm.export_rows(format)?)?;
        }
    }

    if let Some(sp) = cosmo.spectra().filter(|s| s.has_cls()) {
        let header = vec![format!("unlensed C_l, {} format", format.name())];
        let rows = (2..=sp.l_max())
            .map(|l| sp.cl_data(l as f64, format))
            .collect::<StageResult<Vec<_>>>()?;
        w.dat("cl.dat", &header, &sp.cl_titles(format), rows)?;
    }
    if let Some(ls) = cosmo.lensing() {
        let header = vec![format!("lensed C_l, {} format", format.name())];
        let rows = (2..=ls.l_max())
            .map(|l| ls.cl_data(l as f64, format))
            .collect::<StageResult<Vec<_>>>()?;
        w.dat("cl_lensed.dat", &header, &ls.titles(format), rows)?;
    }

    let z_count = options.z_pk.len();
    let pk_spectra = cosmo.spectra().filter(|s| s.has_pk_matter());
    if let (Some(bg), Some(sp)) = (cosmo.background(), pk_spectra) {
        let nl = cosmo.nonlinear();
        let k = sp.k_values();
        for (i, &z) in options.z_pk.iter().enumerate() {
            let header = vec![format!("linear matter power spectrum at z = {z}")];
            let rows = k
                .iter()
                .map(|&k| sp.pk_data(bg, nl, k, z, PkMode::Linear))
                .collect::<StageResult<Vec<_>>>()?;
            w.dat(&z_indexed("pk.dat", i, z_count), &header, &sp.pk_titles(format), rows)?;

            let Some(nl) = nl else { continue };
            if bg.tau_of_z(z)? < nl.tau_min() {
                warn!(z, "no nonlinear correction this early, pk_nl not written");
                continue;
            }
            let header = vec![format!(
                "{} matter power spectrum at z = {z}",
                nl.method().name()
            )];
            let rows = k
                .iter()
                .map(|&k| sp.pk_data(bg, Some(nl), k, z, PkMode::Nonlinear))
                .collect::<StageResult<Vec<_>>>()?;
            w.dat(&z_indexed("pk_nl.dat", i, z_count), &header, &sp.pk_titles(format), rows)?;
        }
    }

    if let (Some(bg), Some(pt)) = (cosmo.background(), cosmo.perturbations()) {
        if pt.has_density_transfers() || pt.has_velocity_transfers() {
            for (i, &z) in options.z_pk.iter().enumerate() {
                let header = vec![format!("transfer functions at z = {z}")];
                let rows = pt
                    .k()
                    .iter()
                    .map(|&k| pt.transfer_data(bg, k, z, format))
                    .collect::<StageResult<Vec<_>>>()?;
                let titles = pt.transfer_titles(format);
                w.dat(&z_indexed("tk.dat", i, z_count), &header, &titles, rows)?;
            }
        }
        for (i, &k) in pt.k_output_values().iter().enumerate() {
            let header = vec![format!("sources at k = {k} 1/Mpc")];
            let rows = pt
                .tau()
                .iter()
                .map(|&tau| pt.k_output_data(bg, i, tau))
                .collect::<StageResult<Vec<_>>>()?;
            w.dat(&format!("perturbations_k{i}.dat"), &header, &pt.k_output_titles(), rows)?;
        }
    }

    if let Some(sd) = cosmo.distortions() {
        let d = sd.derived();
        let header = vec![format!("mu = {:e}, y = {:e}", d.mu, d.y)];
        w.dat("sd_heating.dat", &header, &sd.titles(format), sd.export_rows(format))?;
        w.dat("sd.dat", &header, &sd.spectrum_titles(), sd.spectrum_rows()?)?;
    }

    if options.write_parameters {
        w.text("parameters.ini", &cosmo.params().to_ini())?;
        let unused: String = cosmo
            .unused_parameters()
            .iter()
            .map(|p| format!("{} = {}\n", p.name, p.value))
            .collect();
        w.text("unused_parameters", &unused)?;
    }

    let summary = RunSummary::collect(cosmo, options)?;
    w.text("summary.json", &serde_json::to_string_pretty(&summary)?)?;

    info!(files = w.written.len(), root = %options.root, "output written");
    Ok(w.written)
}
