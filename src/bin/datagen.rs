//! A data generation utility for creating assembly artifact test instances.
//!
//! Generates a spring-mass-damper chain, grounded at its first node, with a
//! configurable number of degrees of freedom per node. Each dof direction forms an
//! independent chain. Damping is Rayleigh-proportional (`C = alpha M + beta K`) and the
//! reference load is drawn from a seeded RNG, so instances are reproducible.
//!
//! External node numbering can contain gaps (ids without an internal node), and the
//! leading internal equations can be constrained out of the solver ordering. Both
//! exercise the numbering tables of the artifact format.

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use faer::{Mat, c64, sparse::Triplet};
use krylov_harmonic::{
    AssembledSystem, DofMap, SystemMatrix, utils::data_loader::write_assembly,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::path::PathBuf;

/// Command-line interface for the chain generator.
#[derive(Parser, Debug)]
#[clap(
    name = "datagen",
    about = "Generates a spring-mass-damper chain as a .kfa assembly artifact."
)]
struct DataGenArgs {
    /// Number of internal nodes in the chain.
    #[clap(long)]
    nodes: usize,
    /// Degrees of freedom per node.
    #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=6))]
    dofs_per_node: u32,
    /// Spring stiffness between neighbouring nodes (and to ground).
    #[clap(long, default_value_t = 1.0e4)]
    stiffness: f64,
    /// Lumped mass of every node.
    #[clap(long, default_value_t = 1.0)]
    mass: f64,
    /// Mass-proportional Rayleigh damping coefficient.
    #[clap(long, default_value_t = 0.0)]
    alpha: f64,
    /// Stiffness-proportional Rayleigh damping coefficient.
    #[clap(long, default_value_t = 1.0e-4)]
    beta: f64,
    /// External node ids without an internal node (gaps in user numbering).
    #[clap(long, value_delimiter = ',')]
    unmapped: Vec<usize>,
    /// Number of leading internal equations removed from the solver ordering.
    #[clap(long, default_value_t = 0)]
    constrained: usize,
    /// A seed for the reference load generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Path of the artifact to write.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Symmetric tridiagonal chain stiffness over internal equations, grounded at node 0.
fn chain_triplets(nodes: usize, dofs: usize, k: f64) -> Vec<(usize, usize, f64)> {
    let mut triplets = Vec::new();
    for node in 0..nodes {
        for dof in 0..dofs {
            let eq = node * dofs + dof;
            // Spring to the previous node (or ground) plus spring to the next node.
            let diag = if node + 1 < nodes { 2.0 * k } else { k };
            triplets.push((eq, eq, diag));
            if node + 1 < nodes {
                let next = eq + dofs;
                triplets.push((eq, next, -k));
                triplets.push((next, eq, -k));
            }
        }
    }
    triplets
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = DataGenArgs::parse();
    log::info!("Generating chain artifact with parameters: {:?}", &args);

    let dofs = args.dofs_per_node as usize;
    let internal = args.nodes * dofs;
    ensure!(args.nodes > 0, "The chain needs at least one node.");
    ensure!(
        args.constrained < internal,
        "Cannot constrain {} of {} equations.",
        args.constrained,
        internal
    );

    // External numbering: internal node i takes the i-th id not listed as unmapped.
    let max_node = args.nodes + args.unmapped.len();
    ensure!(
        args.unmapped.iter().all(|&id| id >= 1 && id <= max_node),
        "Unmapped node ids must lie in 1..={}",
        max_node
    );
    let mut forward = vec![None; max_node];
    let mut back = Vec::with_capacity(args.nodes);
    for ext in 1..=max_node {
        if !args.unmapped.contains(&ext) {
            forward[ext - 1] = Some(back.len());
            back.push(ext);
        }
    }
    ensure!(
        back.len() == args.nodes,
        "Unmapped node ids must be distinct."
    );

    // Solver ordering keeps every internal equation past the constrained ones.
    let solver_to_internal: Vec<usize> = (args.constrained..internal).collect();
    let mut internal_to_solver = vec![None; internal];
    for (s, &eq) in solver_to_internal.iter().enumerate() {
        internal_to_solver[eq] = Some(s);
    }
    let n = solver_to_internal.len();

    let restrict = |entries: &[(usize, usize, f64)]| -> Vec<Triplet<usize, usize, c64>> {
        entries
            .iter()
            .filter_map(|&(i, j, v)| {
                let row = internal_to_solver[i]?;
                let col = internal_to_solver[j]?;
                Some(Triplet {
                    row,
                    col,
                    val: c64::new(v, 0.0),
                })
            })
            .collect()
    };

    let k_entries = chain_triplets(args.nodes, dofs, args.stiffness);
    let m_entries: Vec<_> = (0..internal).map(|eq| (eq, eq, args.mass)).collect();
    let c_entries: Vec<_> = k_entries
        .iter()
        .map(|&(i, j, v)| (i, j, args.beta * v))
        .chain(m_entries.iter().map(|&(i, j, v)| (i, j, args.alpha * v)))
        .filter(|&(_, _, v)| v != 0.0)
        .collect();

    let sparse = |name: &str, entries: &[(usize, usize, f64)]| {
        SystemMatrix::sparse_from_triplets(n, n, &restrict(entries))
            .with_context(|| format!("Failed to assemble the {} matrix.", name))
    };
    let stiffness = sparse("stiffness", &k_entries)?;
    let mass = sparse("mass", &m_entries)?;
    let damping = sparse("damping", &c_entries)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let load = Mat::from_fn(n, 1, |_, _| c64::new(rng.random::<f64>() - 0.5, 0.0));

    let dof_map = DofMap::new(forward, back, solver_to_internal, dofs)?;
    let system = AssembledSystem::new(stiffness, mass, damping, load, dof_map)?;

    let comment = format!(
        "chain: nodes={} dofs_per_node={} k={} m={} alpha={} beta={} seed={}",
        args.nodes, dofs, args.stiffness, args.mass, args.alpha, args.beta, args.seed
    );
    write_assembly(&args.output, &system, Some(&comment))
        .with_context(|| format!("Failed to write artifact {:?}", &args.output))?;

    log::info!(
        "Wrote {:?}: {} solver equations, {} nodes, {} external ids.",
        args.output,
        n,
        args.nodes,
        max_node
    );
    Ok(())
}
