//! Command-line driver for a Krylov harmonic reduction run.
//!
//! Loads an assembly artifact, builds the Krylov basis at the expansion frequency,
//! solves the reduced sweep and expands the results. Every intermediate product can be
//! written as CSV into an output directory; a one-line-per-sample summary is always
//! written to `summary.csv`.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use krylov_harmonic::{ExpandOptions, KrylovSolver, LoadProfile, ResidualNorm, report};
use serde::Serialize;
use std::path::PathBuf;

/// Load profile applied across the sweep.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum LoadArg {
    /// Load grows linearly with the sample index.
    Ramped,
    /// Full load at every sample.
    Stepped,
}

impl From<LoadArg> for LoadProfile {
    fn from(arg: LoadArg) -> Self {
        match arg {
            LoadArg::Ramped => LoadProfile::Ramped,
            LoadArg::Stepped => LoadProfile::Stepped,
        }
    }
}

/// Norm used for residual reporting.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum ResidualArg {
    Off,
    Inf,
    L1,
    L2,
}

impl From<ResidualArg> for ResidualNorm {
    fn from(arg: ResidualArg) -> Self {
        match arg {
            ResidualArg::Off => ResidualNorm::Off,
            ResidualArg::Inf => ResidualNorm::Inf,
            ResidualArg::L1 => ResidualNorm::L1,
            ResidualArg::L2 => ResidualNorm::L2,
        }
    }
}

/// Command-line arguments for the reduction run.
#[derive(Parser, Debug)]
#[clap(
    name = "krylov",
    about = "Runs a Krylov model-order-reduced harmonic sweep on an assembly artifact."
)]
struct KrylovArgs {
    /// Path to the `.kfa` assembly artifact.
    #[clap(long, value_name = "PATH")]
    artifact: PathBuf,
    /// Maximum dimension of the Krylov subspace.
    #[clap(long, default_value_t = 10)]
    max_dim: usize,
    /// Expansion frequency f0 in Hz.
    #[clap(long, default_value_t = 0.0)]
    frequency: f64,
    /// Compute the orthogonality diagnostic of the basis.
    #[clap(long)]
    check_orthogonality: bool,
    /// Start of the sweep in Hz.
    #[clap(long, default_value_t = 0.0)]
    freq_start: f64,
    /// End of the sweep in Hz.
    #[clap(long)]
    freq_end: f64,
    /// Number of sweep samples.
    #[clap(long, default_value_t = 10)]
    freq_steps: usize,
    #[clap(long, value_enum, default_value_t = LoadArg::Stepped)]
    load: LoadArg,
    /// Residual norm; `off` disables the residual check.
    #[clap(long, value_enum, default_value_t = ResidualArg::Off)]
    residual: ResidualArg,
    /// Write user-ordered displacement vectors.
    #[clap(long)]
    solution_vectors: bool,
    /// Also write the basis Q, the reduced solution Y, the internal-order displacements
    /// and, when residuals are on, the residual vectors.
    #[clap(long)]
    dump_intermediate: bool,
    /// Directory where the CSV outputs will be written.
    #[clap(long, value_name = "DIR")]
    output_dir: PathBuf,
}

/// One row of the run summary.
#[derive(Debug, Serialize)]
struct SummaryRow {
    sample: usize,
    frequency_hz: f64,
    load_ratio: f64,
    max_displacement: f64,
    relative_residual: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = KrylovArgs::parse();
    log::info!("Starting Krylov harmonic run with parameters: {:?}", &args);

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", &args.output_dir))?;

    let mut solver = KrylovSolver::from_artifact(&args.artifact)
        .with_context(|| format!("Failed to load artifact {:?}", &args.artifact))?;

    // 1. Krylov basis at f0.
    let basis = solver.build_subspace(args.max_dim, args.frequency, args.check_orthogonality)?;
    if basis.is_saturated() {
        log::warn!(
            "Basis saturated: using {} of {} requested vectors.",
            basis.dim(),
            basis.requested_dim()
        );
    }
    if let Some(orthogonal) = basis.is_orthogonal() {
        log::info!("Basis orthogonality within tolerance: {}", orthogonal);
        report::write_orthogonality(args.output_dir.join("orthogonality.csv"), basis)?;
    }
    if args.dump_intermediate {
        report::write_basis(args.output_dir.join("basis.csv"), basis)?;
    }

    // 2. Reduced sweep.
    let reduced = solver.solve_sweep(
        args.freq_start,
        args.freq_end,
        args.freq_steps,
        args.load.into(),
    )?;
    if args.dump_intermediate {
        report::write_reduced_solution(args.output_dir.join("reduced.csv"), reduced)?;
    }

    // 3. Expansion.
    let residual_norm: ResidualNorm = args.residual.into();
    let options = ExpandOptions {
        residual_computation: residual_norm != ResidualNorm::Off,
        residual_norm,
        compute_solution_vectors: args.solution_vectors,
        return_solution: false,
    };
    solver.expand(&options)?;

    let (Some(reduced), Some(expansion)) = (solver.reduced_solution(), solver.expansion()) else {
        return Err(anyhow!("Run finished without an expansion."));
    };
    if let Some(vectors) = expansion.solution_vectors() {
        report::write_solution_vectors(args.output_dir.join("solution.csv"), vectors)?;
    }
    if !expansion.residuals().is_empty() {
        report::write_residuals(args.output_dir.join("residuals.csv"), expansion.residuals())?;
    }
    if args.dump_intermediate {
        let dof_map = solver.system().dof_map();
        report::write_displacements(args.output_dir.join("displacements.csv"), expansion, dof_map)?;
        if expansion.residual_vectors().is_some() {
            report::write_residual_vectors(
                args.output_dir.join("residual_vectors.csv"),
                expansion,
                dof_map,
            )?;
        }
    }

    let summary_path = args.output_dir.join("summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for i in 0..reduced.steps() {
        let residual = expansion
            .residuals()
            .iter()
            .find(|r| r.sample == i + 1)
            .map(|r| r.relative_residual);
        writer.serialize(SummaryRow {
            sample: i + 1,
            frequency_hz: reduced.frequencies_hz()[i],
            load_ratio: reduced.load_ratios()[i],
            max_displacement: expansion
                .displacement(i)
                .map_or(0.0, |x| x.norm_max()),
            relative_residual: residual,
        })?;
    }
    writer.flush()?;

    log::info!(
        "Run completed. Results written to {:?}",
        args.output_dir
    );
    Ok(())
}
