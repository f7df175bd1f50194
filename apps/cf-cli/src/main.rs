use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use cf_core::StageKind;
use cf_params::ParameterSet;
use cf_pipeline::{
    Cosmology, PipelineEvent, PipelineResult, RunPlan, StageStatus, run, run_with_progress,
    write_outputs,
};
use cf_stages::{PkMode, ReferenceKernels, Tracer};
use cf_table::OutputFormat;

#[derive(Parser)]
#[command(name = "cf-cli")]
#[command(about = "cosmoflow CLI - staged cosmological tables and spectra", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a parameter file and list the stages a run would build
    Check {
        /// Parameter file (.ini, .yaml or .json)
        params_path: PathBuf,
    },
    /// Run the pipeline and write output files
    Run {
        /// Parameter file (.ini, .yaml or .json)
        params_path: PathBuf,
        /// Output prefix, overriding `root`
        #[arg(long)]
        root: Option<String>,
        /// Output layout: class or camb, overriding `format`
        #[arg(long)]
        format: Option<String>,
        /// Print the run summary without writing files
        #[arg(long)]
        no_files: bool,
    },
    /// Run the pipeline and answer one query
    #[command(subcommand)]
    Query(QueryCommands),
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Background quantities at a redshift
    Background {
        params_path: PathBuf,
        #[arg(long)]
        z: f64,
    },
    /// Matter power spectrum at (k, z), k in 1/Mpc
    Pk {
        params_path: PathBuf,
        #[arg(long)]
        k: f64,
        #[arg(long, default_value_t = 0.0)]
        z: f64,
        /// Apply the nonlinear correction
        #[arg(long)]
        nonlinear: bool,
    },
    /// Angular power spectra at a multipole
    Cl {
        params_path: PathBuf,
        #[arg(long)]
        l: f64,
        /// Lensed instead of unlensed spectra
        #[arg(long)]
        lensed: bool,
    },
    /// Rms density fluctuation in spheres of radius R [Mpc]
    Sigma {
        params_path: PathBuf,
        #[arg(long)]
        r: f64,
        #[arg(long, default_value_t = 0.0)]
        z: f64,
        /// Baryons plus CDM only
        #[arg(long)]
        cb: bool,
    },
}

fn main() -> PipelineResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { params_path } => cmd_check(&params_path),
        Commands::Run {
            params_path,
            root,
            format,
            no_files,
        } => cmd_run(&params_path, root.as_deref(), format.as_deref(), !no_files),
        Commands::Query(query) => match query {
            QueryCommands::Background { params_path, z } => cmd_background(&params_path, z),
            QueryCommands::Pk {
                params_path,
                k,
                z,
                nonlinear,
            } => cmd_pk(&params_path, k, z, nonlinear),
            QueryCommands::Cl {
                params_path,
                l,
                lensed,
            } => cmd_cl(&params_path, l, lensed),
            QueryCommands::Sigma {
                params_path,
                r,
                z,
                cb,
            } => cmd_sigma(&params_path, r, z, cb),
        },
    }
}

fn load(params_path: &Path) -> PipelineResult<ParameterSet> {
    Ok(cf_params::load_any(params_path)?)
}

fn cmd_check(params_path: &Path) -> PipelineResult<()> {
    println!("Checking parameters: {}", params_path.display());
    let mut params = load(params_path)?;
    let plan = RunPlan::from_params(&mut params)?;
    println!("Stages:");
    for stage in StageKind::ALL {
        let mark = if plan.wants(stage) { "run " } else { "skip" };
        println!("  [{mark}] {stage}");
    }
    println!("Output: {}* ({})", plan.options.root, plan.options.format.name());
    Ok(())
}

fn cmd_run(
    params_path: &Path,
    root: Option<&str>,
    format: Option<&str>,
    write_files: bool,
) -> PipelineResult<()> {
    println!("Running: {}", params_path.display());
    let mut params = load(params_path)?;
    if let Some(root) = root {
        params.set("root", root)?;
    }
    if let Some(format) = format {
        params.set("format", format)?;
    }

    let mut last_emit = Instant::now();
    let result = run_with_progress(params, &ReferenceKernels, &mut |event| {
        if event.status != StageStatus::Started || last_emit.elapsed().as_millis() >= 100 {
            render_cli_progress(&event);
            last_emit = Instant::now();
        }
    });
    clear_progress_line();
    let cosmo = result?;

    println!("✓ Run completed");
    print_timing_summary(&cosmo);
    print_derived(&cosmo)?;

    let unused = cosmo.unused_parameters();
    if !unused.is_empty() {
        println!("\nUnread parameters:");
        for p in unused {
            println!("  {} = {}", p.name, p.value);
        }
    }

    if write_files {
        let written = write_outputs(&cosmo, cosmo.output_options())?;
        println!("\n✓ Wrote {} files", written.len());
        for path in written {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(80));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &PipelineEvent) {
    let line = match &event.message {
        Some(msg) => format!(
            "\r{:<16} {:<8} elapsed={:.2}s  {}",
            event.stage.name(),
            event.status.label(),
            event.elapsed_s,
            msg
        ),
        None => format!(
            "\r{:<16} {:<8} elapsed={:.2}s",
            event.stage.name(),
            event.status.label(),
            event.elapsed_s
        ),
    };
    print!("{}", line);
    let _ = io::stdout().flush();
}

fn print_timing_summary(cosmo: &Cosmology) {
    println!("\nTiming:");
    for (stage, seconds) in cosmo.timings().iter() {
        println!("  {:<16} {:>8.3} s", stage.name(), seconds);
    }
    println!("  {:<16} {:>8.3} s", "total", cosmo.timings().total_s());
}

fn print_derived(cosmo: &Cosmology) -> PipelineResult<()> {
    let d = cosmo.derived()?;
    println!("\nDerived parameters:");
    println!("  h            = {:.5}", d.h);
    println!("  age          = {:.4} Gyr", d.age_gyr);
    println!("  tau_0        = {:.3} Mpc", d.conformal_age_mpc);
    println!("  z_eq         = {:.2}", d.z_eq);
    println!("  z_rec        = {:.2}", d.z_rec);
    println!("  rs_rec       = {:.3} Mpc", d.rs_rec);
    println!("  z_reio       = {:.3}", d.z_reio);
    println!("  tau_reio     = {:.5}", d.tau_reio);
    if let Some(s8) = d.sigma8 {
        println!("  sigma8       = {:.5}", s8);
    }
    if let (Some(mu), Some(y)) = (d.mu, d.y) {
        println!("  mu           = {:.4e}", mu);
        println!("  y            = {:.4e}", y);
    }
    Ok(())
}

fn quiet_run(params_path: &Path) -> PipelineResult<Cosmology> {
    run(load(params_path)?, &ReferenceKernels)
}

fn print_row(titles: &[String], row: &[f64]) {
    for (title, value) in titles.iter().zip(row) {
        println!("  {:<28} {:>24.16e}", title, value);
    }
}

fn cmd_background(params_path: &Path, z: f64) -> PipelineResult<()> {
    let cosmo = quiet_run(params_path)?;
    let (titles, row) = cosmo.background_at_z(z, OutputFormat::Class)?;
    print_row(&titles, &row);
    Ok(())
}

fn cmd_pk(params_path: &Path, k: f64, z: f64, nonlinear: bool) -> PipelineResult<()> {
    let cosmo = quiet_run(params_path)?;
    let mode = if nonlinear {
        PkMode::Nonlinear
    } else {
        PkMode::Linear
    };
    let p = cosmo.pk_at_k_and_z(k, z, mode)?;
    println!("P(k = {k} 1/Mpc, z = {z}) = {:.6e} Mpc^3", p.total);
    if p.per_ic.len() > 1 {
        for (i, v) in p.per_ic.iter().enumerate() {
            println!("  ic {i}: {v:.6e}");
        }
    }
    if let Some(cb) = p.cb {
        println!("  cb:   {cb:.6e}");
    }
    Ok(())
}

fn cmd_cl(params_path: &Path, l: f64, lensed: bool) -> PipelineResult<()> {
    let cosmo = quiet_run(params_path)?;
    let (types, values) = if lensed {
        let values = cosmo.lensed_cl_at_l(l)?;
        (cosmo.lensing().map(|ls| ls.cl_types()).unwrap_or_default(), values)
    } else {
        let values = cosmo.cl_at_l(l)?.total;
        (cosmo.spectra().map(|s| s.cl_types()).unwrap_or_default(), values)
    };
    for (name, v) in types.iter().zip(&values) {
        println!("  {:<8} {:>24.16e}", name, v);
    }
    Ok(())
}

fn cmd_sigma(params_path: &Path, r: f64, z: f64, cb: bool) -> PipelineResult<()> {
    let cosmo = quiet_run(params_path)?;
    let tracer = if cb { Tracer::Cb } else { Tracer::Matter };
    let s = cosmo.sigma(r, z, tracer, PkMode::Linear)?;
    println!("sigma(R = {r} Mpc, z = {z}) = {s:.6}");
    Ok(())
}
