//! Integration test suite for the Krylov harmonic reduction pipeline.
//!
//! # Test Methodology
//!
//! Most checks compare the reduced-order response against quantities that are known
//! exactly:
//! 1.  **Known answers:** a single spring-mass-damper has a closed-form response, and
//!     a basis of full dimension `m = n` makes the reduction exact, so residuals must
//!     vanish up to rounding.
//! 2.  **Structural invariants:** orthonormality of the basis, agreement of the
//!     reconstruction `X = Q Y` with the projection `Q^H X`, and identical bases when a
//!     saturated run is repeated with the achieved dimension.
//! 3.  **Protocol:** out-of-order stage calls and invalid parameters are rejected
//!     with the right error kind.
//!
//! Random test problems are spring-mass chains with non-proportional damping (or none) and
//! complex loads, drawn from seeded generators so every run sees the same systems.

use anyhow::{Result, anyhow, ensure};
use faer::{Mat, c64, sparse::Triplet};
use krylov_harmonic::{
    AssembledSystem, ExpandOptions, KrylovErrorKind, KrylovSolver, LoadProfile, Recurrence,
    ResidualNorm, Stage, SystemMatrix,
    algorithms::subspace::{ORTHOGONALITY_TOLERANCE, identity_deviation},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Tolerance for quantities that are exact up to rounding.
const EXACT_TOLERANCE: f64 = 1e-9;

fn z(re: f64) -> c64 {
    c64::new(re, 0.0)
}

fn diagonal(values: &[f64]) -> SystemMatrix {
    SystemMatrix::dense_from_real(values.len(), values.len(), |i, j| {
        if i == j { values[i] } else { 0.0 }
    })
}

fn residual_options(norm: ResidualNorm) -> ExpandOptions {
    ExpandOptions {
        residual_computation: true,
        residual_norm: norm,
        ..Default::default()
    }
}

/// Triplets of a grounded spring chain with springs `k[i]` between node `i - 1` and `i`
/// (node `-1` being the ground).
fn chain_triplets(springs: &[f64]) -> Vec<Triplet<usize, usize, c64>> {
    let n = springs.len();
    let mut triplets = Vec::new();
    for i in 0..n {
        let mut diag = springs[i];
        if i + 1 < n {
            diag += springs[i + 1];
            triplets.push(Triplet { row: i, col: i + 1, val: z(-springs[i + 1]) });
            triplets.push(Triplet { row: i + 1, col: i, val: z(-springs[i + 1]) });
        }
        triplets.push(Triplet { row: i, col: i, val: z(diag) });
    }
    triplets
}

fn diagonal_triplets(values: &[f64]) -> Vec<Triplet<usize, usize, c64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| Triplet { row: i, col: i, val: z(v) })
        .collect()
}

/// A random damped chain of order `n`, stored sparse.
fn random_chain(n: usize, seed: u64) -> Result<AssembledSystem> {
    random_chain_with_damping(n, seed, true)
}

/// Same chain as [`random_chain`] for a given seed, with the dampers optionally removed.
fn random_chain_with_damping(n: usize, seed: u64, damped: bool) -> Result<AssembledSystem> {
    let mut rng = StdRng::seed_from_u64(seed);
    let springs: Vec<f64> = (0..n).map(|_| rng.random_range(50.0..150.0)).collect();
    let masses: Vec<f64> = (0..n).map(|_| rng.random_range(0.5..1.5)).collect();
    let mut dampers: Vec<f64> = (0..n).map(|_| rng.random_range(0.0..0.5)).collect();
    if !damped {
        dampers.iter_mut().for_each(|d| *d = 0.0);
    }
    let load = Mat::from_fn(n, 1, |_, _| {
        c64::new(rng.random::<f64>() - 0.5, rng.random::<f64>() - 0.5)
    });

    let sparse = |triplets: Vec<Triplet<usize, usize, c64>>| {
        SystemMatrix::sparse_from_triplets(n, n, &triplets)
            .ok_or_else(|| anyhow!("Failed to construct sparse test matrix."))
    };
    Ok(AssembledSystem::with_identity_map(
        sparse(chain_triplets(&springs))?,
        sparse(diagonal_triplets(&masses))?,
        sparse(diagonal_triplets(&dampers))?,
        load,
    )?)
}

/// The same system with every matrix converted to dense storage.
fn densified(system: &AssembledSystem) -> Result<AssembledSystem> {
    let n = system.ndof();
    let dense = |m: &SystemMatrix| {
        let mut d = Mat::<c64>::zeros(n, n);
        for t in m.triplets() {
            d[(t.row, t.col)] += t.val;
        }
        SystemMatrix::Dense(d)
    };
    Ok(AssembledSystem::with_identity_map(
        dense(system.stiffness()),
        dense(system.mass()),
        dense(system.damping()),
        system.load().to_owned(),
    )?)
}

#[test]
fn test_single_dof_known_answer() -> Result<()> {
    let (k, m, c) = (250.0, 2.0, 0.75);
    let system = AssembledSystem::with_identity_map(
        diagonal(&[k]),
        diagonal(&[m]),
        diagonal(&[c]),
        Mat::from_fn(1, 1, |_, _| z(1.0)),
    )?;
    let mut solver = KrylovSolver::new(system);

    let basis = solver.build_subspace(1, 0.0, true)?;
    ensure!(basis.dim() == 1 && !basis.is_saturated());
    ensure!((basis.q()[(0, 0)] - z(1.0)).norm() < 1e-14, "Q must be [1]");

    let reduced = solver.solve_sweep(0.0, 0.0, 1, LoadProfile::Stepped)?;
    let y = reduced.y()[(0, 0)];
    ensure!((y - z(1.0 / k)).norm() < 1e-15, "Y1 = {y:?}, expected 1/k");

    solver.expand(&residual_options(ResidualNorm::L2))?;
    let expansion = solver
        .expansion()
        .ok_or_else(|| anyhow!("expansion missing"))?;
    let x = expansion
        .displacement(0)
        .ok_or_else(|| anyhow!("sample 1 missing"))?[(0, 0)];
    ensure!((x - z(1.0 / k)).norm() < 1e-15, "X1 = {x:?}, expected 1/k");
    ensure!(expansion.residuals()[0].relative_residual < 1e-14);
    Ok(())
}

#[test]
fn test_single_dof_response_across_sweep() -> Result<()> {
    // With n = 1 the reduction is exact at every frequency:
    // x(f) = r / (k - w^2 m + i w c).
    let (k, m, c) = (400.0, 1.0, 2.0);
    let system = AssembledSystem::with_identity_map(
        diagonal(&[k]),
        diagonal(&[m]),
        diagonal(&[c]),
        Mat::from_fn(1, 1, |_, _| z(1.0)),
    )?;
    let mut solver = KrylovSolver::new(system);
    solver.build_subspace(1, 3.0, false)?;
    solver.solve_sweep(0.0, 6.0, 6, LoadProfile::Ramped)?;
    solver.expand(&ExpandOptions::default())?;

    let reduced = solver.reduced_solution().ok_or_else(|| anyhow!("no sweep"))?;
    let expansion = solver.expansion().ok_or_else(|| anyhow!("no expansion"))?;
    for i in 0..6 {
        let w = 2.0 * std::f64::consts::PI * reduced.frequencies_hz()[i];
        let ratio = reduced.load_ratios()[i];
        let exact = z(ratio) / c64::new(k - w * w * m, w * c);
        let x = expansion
            .displacement(i)
            .ok_or_else(|| anyhow!("sample {} missing", i + 1))?[(0, 0)];
        ensure!(
            (x - exact).norm() <= 1e-12 * exact.norm(),
            "sample {}: {:?} vs exact {:?}",
            i + 1,
            x,
            exact
        );
    }
    Ok(())
}

#[test]
fn test_basis_is_orthonormal() -> Result<()> {
    for seed in [1, 2, 3] {
        let system = random_chain(20, seed)?;
        let mut solver = KrylovSolver::new(system);
        for f0 in [0.0, 1.5] {
            let basis = solver.build_subspace(8, f0, true)?;
            ensure!(basis.dim() == 8, "seed {seed}: unexpected saturation");
            ensure!(basis.recurrence() == Recurrence::SecondOrder);
            ensure!(basis.is_orthogonal() == Some(true));

            let g = basis
                .orthogonality()
                .ok_or_else(|| anyhow!("orthogonality matrix missing"))?;
            ensure!(g.nrows() == 8 && g.ncols() == 8);
            let deviation = identity_deviation(g);
            ensure!(
                deviation <= ORTHOGONALITY_TOLERANCE,
                "seed {seed}, f0 = {f0}: max |G - I| = {deviation:e}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_long_basis_stays_orthonormal() -> Result<()> {
    // Late Krylov vectors of a chain are nearly parallel to earlier ones, so a single
    // Gram-Schmidt pass would leave a visible Q^H Q - I here.
    let cases = [
        (30, 30, false, 0.0),
        (40, 30, false, 0.0),
        (60, 40, true, 0.5),
    ];
    for (n, m, damped, f0) in cases {
        for seed in [1, 2, 3] {
            let system = random_chain_with_damping(n, seed, damped)?;
            let mut solver = KrylovSolver::new(system);
            let basis = solver.build_subspace(m, f0, true)?;
            ensure!(
                basis.dim() == m,
                "n = {n}, seed {seed}: saturated at {} of {m}",
                basis.dim()
            );
            let expected = if damped {
                Recurrence::SecondOrder
            } else {
                Recurrence::FirstOrder
            };
            ensure!(basis.recurrence() == expected);

            let g = basis
                .orthogonality()
                .ok_or_else(|| anyhow!("orthogonality matrix missing"))?;
            let deviation = identity_deviation(g);
            ensure!(
                basis.is_orthogonal() == Some(true),
                "n = {n}, m = {m}, seed {seed}: max |G - I| = {deviation:e}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_saturation_is_monotonic_undamped() -> Result<()> {
    // Only two modes are excited, so no more than two directions can be generated.
    let system = AssembledSystem::with_identity_map(
        diagonal(&[4.0, 9.0, 16.0]),
        diagonal(&[1.0, 1.0, 1.0]),
        SystemMatrix::zeros(3),
        Mat::from_fn(3, 1, |i, _| z(if i < 2 { 1.0 } else { 0.0 })),
    )?;
    let mut solver = KrylovSolver::new(system);

    let saturated = solver.build_subspace(8, 0.0, true)?.clone();
    ensure!(saturated.is_saturated());
    ensure!(saturated.dim() == 2, "achieved dimension {}", saturated.dim());
    ensure!(saturated.requested_dim() == 8);

    let repeated = solver.build_subspace(saturated.dim(), 0.0, true)?;
    ensure!(repeated.dim() == saturated.dim());
    ensure!(!repeated.is_saturated());
    let drift = (repeated.q() - saturated.q()).norm_l2();
    ensure!(drift < EXACT_TOLERANCE, "basis drift {drift:e}");
    Ok(())
}

#[test]
fn test_saturation_is_monotonic_with_proportional_damping() -> Result<()> {
    // With C = beta K, at f0 = 0 the derivative matrix is beta K and the second
    // candidate is parallel to the first.
    let springs = [100.0, 100.0, 100.0, 100.0];
    let beta = 1e-3;
    let stiffness = chain_triplets(&springs);
    let damping: Vec<_> = stiffness
        .iter()
        .map(|t| Triplet { row: t.row, col: t.col, val: t.val * z(beta) })
        .collect();
    let system = AssembledSystem::with_identity_map(
        SystemMatrix::sparse_from_triplets(4, 4, &stiffness)
            .ok_or_else(|| anyhow!("stiffness"))?,
        SystemMatrix::sparse_from_triplets(4, 4, &diagonal_triplets(&[1.0; 4]))
            .ok_or_else(|| anyhow!("mass"))?,
        SystemMatrix::sparse_from_triplets(4, 4, &damping).ok_or_else(|| anyhow!("damping"))?,
        Mat::from_fn(4, 1, |i, _| z(if i == 3 { 1.0 } else { 0.3 })),
    )?;
    let mut solver = KrylovSolver::new(system);

    let saturated = solver.build_subspace(4, 0.0, false)?.clone();
    ensure!(saturated.is_saturated() && saturated.dim() == 1);

    let repeated = solver.build_subspace(1, 0.0, false)?;
    ensure!(!repeated.is_saturated());
    ensure!((repeated.q() - saturated.q()).norm_l2() < EXACT_TOLERANCE);

    // Away from 0 Hz the mass term breaks the proportionality.
    let full = solver.build_subspace(4, 1.0, true)?;
    ensure!(full.dim() == 4 && full.is_orthogonal() == Some(true));
    Ok(())
}

#[test]
fn test_sequencing_invariant() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(5, 7)?);
    ensure!(solver.stage() == Stage::Empty);

    let err = solver
        .solve_sweep(0.0, 1.0, 2, LoadProfile::Stepped)
        .err()
        .ok_or_else(|| anyhow!("solve_sweep before build_subspace must fail"))?;
    ensure!(matches!(err.kind(), KrylovErrorKind::Sequence { .. }));

    let err = solver
        .expand(&ExpandOptions::default())
        .err()
        .ok_or_else(|| anyhow!("expand before solve_sweep must fail"))?;
    ensure!(matches!(err.kind(), KrylovErrorKind::Sequence { .. }));

    solver.build_subspace(3, 0.5, false)?;
    let err = solver
        .expand(&ExpandOptions::default())
        .err()
        .ok_or_else(|| anyhow!("expand before solve_sweep must fail"))?;
    ensure!(
        err.to_string() == "Sequence violation: `solve_sweep` must run before `expand`."
    );

    solver.solve_sweep(0.0, 1.0, 2, LoadProfile::Stepped)?;
    solver.expand(&ExpandOptions::default())?;
    ensure!(solver.stage() == Stage::Expanded);
    Ok(())
}

#[test]
fn test_invalid_parameters_are_rejected() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(4, 11)?);
    for (max_dim, f0) in [(0, 0.0), (2, -1.0), (2, f64::NAN)] {
        let err = solver
            .build_subspace(max_dim, f0, false)
            .err()
            .ok_or_else(|| anyhow!("build_subspace({max_dim}, {f0}) must fail"))?;
        ensure!(matches!(err.kind(), KrylovErrorKind::InvalidParameter(_)));
    }
    ensure!(solver.stage() == Stage::Empty, "no partial state on rejection");

    solver.build_subspace(2, 0.0, false)?;
    for (start, end, steps) in [(-1.0, 2.0, 2), (3.0, 2.0, 2), (0.0, 2.0, 0)] {
        let err = solver
            .solve_sweep(start, end, steps, LoadProfile::Ramped)
            .err()
            .ok_or_else(|| anyhow!("solve_sweep({start}, {end}, {steps}) must fail"))?;
        ensure!(matches!(err.kind(), KrylovErrorKind::InvalidParameter(_)));
    }
    ensure!(solver.stage() == Stage::SubspaceReady);

    let err = "euclid"
        .parse::<ResidualNorm>()
        .err()
        .ok_or_else(|| anyhow!("unknown residual norm must fail"))?;
    ensure!(matches!(err.kind(), KrylovErrorKind::InvalidParameter(_)));
    Ok(())
}

#[test]
fn test_load_ratios() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(4, 5)?);
    solver.build_subspace(4, 1.0, false)?;

    for profile in [LoadProfile::Ramped, LoadProfile::Stepped] {
        let single = solver.solve_sweep(2.0, 2.0, 1, profile)?;
        ensure!(single.load_ratios() == [1.0], "{profile:?}: {:?}", single.load_ratios());
    }

    let ramped = solver.solve_sweep(0.0, 8.0, 4, LoadProfile::Ramped)?;
    ensure!(ramped.load_ratios() == [0.25, 0.5, 0.75, 1.0]);
    ensure!(ramped.frequencies_hz() == [2.0, 4.0, 6.0, 8.0]);
    ensure!((ramped.final_frequency_hz() - 8.0).abs() < 1e-15);

    let stepped = solver.solve_sweep(0.0, 8.0, 4, LoadProfile::Stepped)?;
    ensure!(stepped.load_ratios().iter().all(|&r| r == 1.0));
    Ok(())
}

#[test]
fn test_single_sample_ramped_matches_stepped() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(6, 13)?);
    solver.build_subspace(4, 2.0, false)?;
    let stepped = solver
        .solve_sweep(3.0, 3.0, 1, LoadProfile::Stepped)?
        .y()
        .to_owned();
    let ramped = solver.solve_sweep(3.0, 3.0, 1, LoadProfile::Ramped)?.y().to_owned();
    ensure!((&stepped - &ramped).norm_l2() < EXACT_TOLERANCE * stepped.norm_l2());
    Ok(())
}

#[test]
fn test_full_dimension_residual_is_negligible() -> Result<()> {
    for seed in [21, 22, 23] {
        let system = random_chain(6, seed)?;
        let mut solver = KrylovSolver::new(system);
        let basis = solver.build_subspace(6, 0.7, false)?;
        ensure!(basis.dim() == 6, "seed {seed}: basis saturated at {}", basis.dim());
        solver.solve_sweep(0.0, 10.0, 7, LoadProfile::Ramped)?;

        for norm in [ResidualNorm::Inf, ResidualNorm::L1, ResidualNorm::L2] {
            solver.expand(&residual_options(norm))?;
            let residuals = solver
                .expansion()
                .ok_or_else(|| anyhow!("expansion missing"))?
                .residuals();
            ensure!(residuals.len() == 7);
            for (i, record) in residuals.iter().enumerate() {
                ensure!(record.sample == i + 1);
                ensure!(record.rhs_norm > 0.0);
                ensure!(
                    record.relative_residual >= 0.0 && record.relative_residual < EXACT_TOLERANCE,
                    "seed {seed}, {norm:?}, sample {}: relative residual {:e}",
                    record.sample,
                    record.relative_residual
                );
            }
        }
    }
    Ok(())
}

#[test]
fn test_truncated_basis_residual_is_reported() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(12, 31)?);
    solver.build_subspace(3, 1.0, false)?;
    solver.solve_sweep(0.0, 4.0, 4, LoadProfile::Stepped)?;
    solver.expand(&residual_options(ResidualNorm::L2))?;
    let residuals = solver
        .expansion()
        .ok_or_else(|| anyhow!("expansion missing"))?
        .residuals();
    ensure!(residuals.len() == 4);
    ensure!(residuals.iter().all(|r| r.relative_residual.is_finite() && r.relative_residual >= 0.0));

    // `off` is a request to skip, not an error.
    solver.expand(&residual_options(ResidualNorm::Off))?;
    ensure!(
        solver
            .expansion()
            .ok_or_else(|| anyhow!("expansion missing"))?
            .residuals()
            .is_empty()
    );
    Ok(())
}

#[test]
fn test_reconstruction_round_trip() -> Result<()> {
    let mut solver = KrylovSolver::new(random_chain(15, 41)?);
    solver.build_subspace(6, 1.0, false)?;
    solver.solve_sweep(0.5, 5.0, 5, LoadProfile::Ramped)?;
    solver.expand(&ExpandOptions::default())?;

    let basis = solver.basis().ok_or_else(|| anyhow!("basis missing"))?;
    let reduced = solver.reduced_solution().ok_or_else(|| anyhow!("sweep missing"))?;
    let expansion = solver.expansion().ok_or_else(|| anyhow!("expansion missing"))?;

    let reprojected = basis.q().adjoint() * expansion.displacements();
    let error = (&reprojected - reduced.y()).norm_l2();
    ensure!(
        error <= EXACT_TOLERANCE * reduced.y().norm_l2(),
        "||Q^H X - Y|| = {error:e}"
    );
    Ok(())
}

#[test]
fn test_full_dimension_round_trip_undamped() -> Result<()> {
    for seed in [4, 5, 6] {
        let mut solver = KrylovSolver::new(random_chain_with_damping(30, seed, false)?);
        let dim = solver.build_subspace(30, 0.0, false)?.dim();
        ensure!(dim == 30, "seed {seed}: saturated at {dim}");
        solver.solve_sweep(0.5, 2.0, 4, LoadProfile::Stepped)?;
        solver.expand(&ExpandOptions::default())?;

        let basis = solver.basis().ok_or_else(|| anyhow!("basis missing"))?;
        let reduced = solver.reduced_solution().ok_or_else(|| anyhow!("sweep missing"))?;
        let expansion = solver.expansion().ok_or_else(|| anyhow!("expansion missing"))?;

        let reprojected = basis.q().adjoint() * expansion.displacements();
        let error = (&reprojected - reduced.y()).norm_l2();
        ensure!(
            error <= EXACT_TOLERANCE * reduced.y().norm_l2(),
            "seed {seed}: ||Q^H X - Y|| = {error:e}"
        );
    }
    Ok(())
}

#[test]
fn test_undamped_bypass() -> Result<()> {
    let n = 10;
    let mut rng = StdRng::seed_from_u64(3);
    let springs: Vec<f64> = (0..n).map(|_| rng.random_range(50.0..150.0)).collect();
    let load = Mat::from_fn(n, 1, |_, _| z(rng.random::<f64>() - 0.5));
    let system = AssembledSystem::with_identity_map(
        SystemMatrix::sparse_from_triplets(n, n, &chain_triplets(&springs))
            .ok_or_else(|| anyhow!("stiffness"))?,
        SystemMatrix::sparse_from_triplets(n, n, &diagonal_triplets(&vec![1.0; n]))
            .ok_or_else(|| anyhow!("mass"))?,
        SystemMatrix::zeros(n),
        load,
    )?;
    let mut solver = KrylovSolver::new(system);

    let basis = solver.build_subspace(6, 0.0, true)?;
    ensure!(basis.recurrence() == Recurrence::FirstOrder);
    ensure!(basis.dim() == 6);
    ensure!(basis.is_orthogonal() == Some(true));

    // At f0 > 0 the derivative matrix 2i w0 M is nonzero even without damping.
    let basis = solver.build_subspace(6, 0.5, true)?;
    ensure!(basis.recurrence() == Recurrence::SecondOrder);
    ensure!(basis.is_orthogonal() == Some(true));
    Ok(())
}

#[test]
fn test_dense_and_sparse_storage_agree() -> Result<()> {
    let sparse = random_chain(8, 51)?;
    let dense = densified(&sparse)?;

    let mut results = Vec::new();
    for system in [sparse, dense] {
        let mut solver = KrylovSolver::new(system);
        solver.build_subspace(5, 1.2, false)?;
        solver.solve_sweep(0.0, 3.0, 3, LoadProfile::Stepped)?;
        solver.expand(&ExpandOptions::default())?;
        let expansion = solver.expansion().ok_or_else(|| anyhow!("expansion missing"))?;
        results.push(expansion.displacements().to_owned());
    }
    let error = (&results[0] - &results[1]).norm_l2();
    ensure!(
        error <= EXACT_TOLERANCE * results[0].norm_l2(),
        "dense/sparse displacement mismatch {error:e}"
    );
    Ok(())
}

#[test]
fn test_missing_artifact() -> Result<()> {
    let err = KrylovSolver::from_artifact("data/does-not-exist.kfa")
        .err()
        .ok_or_else(|| anyhow!("missing artifact must fail"))?;
    ensure!(matches!(err.kind(), KrylovErrorKind::ArtifactNotFound { .. }));
    Ok(())
}
