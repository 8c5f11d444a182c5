//! CSV reports of the intermediate and final artifacts of a run.
//!
//! Complex values are split into `re` and `im` columns, and all indices written to the
//! reports are 1-based so they line up with equation and node ids in the assembly
//! artifact.

use crate::{
    algorithms::{
        expansion::{Expansion, ResidualRecord, SolutionVectors},
        reduced::ReducedSolution,
        subspace::KrylovBasis,
    },
    assembly::DofMap,
};
use faer::{MatRef, c64};
use serde::Serialize;
use std::{io, path::Path};

/// One entry of a complex matrix.
#[derive(Debug, Serialize)]
struct EntryRow {
    row: usize,
    column: usize,
    re: f64,
    im: f64,
}

/// One entry of the orthogonality matrix `|<q_i, q_j>|`.
#[derive(Debug, Serialize)]
struct OrthogonalityRow {
    i: usize,
    j: usize,
    magnitude: f64,
}

/// One reduced coordinate of one sweep sample.
#[derive(Debug, Serialize)]
struct ReducedRow {
    sample: usize,
    frequency_hz: f64,
    load_ratio: f64,
    component: usize,
    re: f64,
    im: f64,
}

/// One user-ordered displacement of one sweep sample.
#[derive(Debug, Serialize)]
struct DisplacementRow {
    sample: usize,
    frequency_hz: f64,
    node: usize,
    equation: usize,
    re: f64,
    im: f64,
}

/// One internal-order entry of a full-space vector of one sweep sample.
#[derive(Debug, Serialize)]
struct InternalRow {
    sample: usize,
    frequency_hz: f64,
    equation: usize,
    re: f64,
    im: f64,
}

fn write_entries<W: io::Write>(
    writer: &mut csv::Writer<W>,
    m: MatRef<'_, c64>,
) -> Result<(), csv::Error> {
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let val = m[(i, j)];
            writer.serialize(EntryRow {
                row: i + 1,
                column: j + 1,
                re: val.re,
                im: val.im,
            })?;
        }
    }
    Ok(())
}

/// Writes the basis `Q` column by column.
pub fn write_basis_to<W: io::Write>(out: W, basis: &KrylovBasis) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    write_entries(&mut writer, basis.q())?;
    writer.flush()?;
    Ok(())
}

pub fn write_basis(path: impl AsRef<Path>, basis: &KrylovBasis) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    write_entries(&mut writer, basis.q())?;
    writer.flush()?;
    Ok(())
}

/// Writes the orthogonality diagnostic. Writes nothing but the header if the check
/// was not requested when the basis was built.
pub fn write_orthogonality(
    path: impl AsRef<Path>,
    basis: &KrylovBasis,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    match basis.orthogonality() {
        Some(g) => {
            for i in 0..g.nrows() {
                for j in 0..g.ncols() {
                    writer.serialize(OrthogonalityRow {
                        i: i + 1,
                        j: j + 1,
                        magnitude: g[(i, j)],
                    })?;
                }
            }
        }
        None => writer.write_record(["i", "j", "magnitude"])?,
    }
    writer.flush()?;
    Ok(())
}

/// Writes `Y` one row per reduced coordinate and sample.
pub fn write_reduced_solution_to<W: io::Write>(
    out: W,
    reduced: &ReducedSolution,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    let y = reduced.y();
    for s in 0..reduced.steps() {
        for c in 0..y.nrows() {
            let val = y[(c, s)];
            writer.serialize(ReducedRow {
                sample: s + 1,
                frequency_hz: reduced.frequencies_hz()[s],
                load_ratio: reduced.load_ratios()[s],
                component: c + 1,
                re: val.re,
                im: val.im,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_reduced_solution(
    path: impl AsRef<Path>,
    reduced: &ReducedSolution,
) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_reduced_solution_to(io::BufWriter::new(file), reduced)
}

/// Writes the user-ordered displacements of every sample.
pub fn write_solution_vectors_to<W: io::Write>(
    out: W,
    vectors: &SolutionVectors,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    for (s, (records, &hz)) in vectors
        .samples
        .iter()
        .zip(&vectors.frequencies_hz)
        .enumerate()
    {
        for record in records {
            writer.serialize(DisplacementRow {
                sample: s + 1,
                frequency_hz: hz,
                node: record.node,
                equation: record.equation,
                re: record.value.re,
                im: record.value.im,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_solution_vectors(
    path: impl AsRef<Path>,
    vectors: &SolutionVectors,
) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_solution_vectors_to(io::BufWriter::new(file), vectors)
}

/// Scatters each column of `vectors` into internal equation order and writes it. Writes
/// only the header when there is nothing to report.
fn write_internal_columns<W: io::Write>(
    out: W,
    frequencies_hz: &[f64],
    vectors: Option<MatRef<'_, c64>>,
    dof_map: &DofMap,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    match vectors {
        Some(v) => {
            for (s, &hz) in frequencies_hz.iter().enumerate().take(v.ncols()) {
                let internal = dof_map.to_internal_order(v.get(.., s..s + 1));
                for eq in 0..internal.nrows() {
                    let val = internal[(eq, 0)];
                    writer.serialize(InternalRow {
                        sample: s + 1,
                        frequency_hz: hz,
                        equation: eq + 1,
                        re: val.re,
                        im: val.im,
                    })?;
                }
            }
        }
        None => writer.write_record(["sample", "frequency_hz", "equation", "re", "im"])?,
    }
    writer.flush()?;
    Ok(())
}

/// Writes the expanded displacements of every sample in internal equation order.
/// Constrained equations appear as zeros.
pub fn write_displacements_to<W: io::Write>(
    out: W,
    expansion: &Expansion,
    dof_map: &DofMap,
) -> Result<(), csv::Error> {
    write_internal_columns(
        out,
        expansion.frequencies_hz(),
        Some(expansion.displacements()),
        dof_map,
    )
}

pub fn write_displacements(
    path: impl AsRef<Path>,
    expansion: &Expansion,
    dof_map: &DofMap,
) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_displacements_to(io::BufWriter::new(file), expansion, dof_map)
}

/// Writes the residual vectors `A(ω_i) x_i - r_i F0` in internal equation order.
pub fn write_residual_vectors_to<W: io::Write>(
    out: W,
    expansion: &Expansion,
    dof_map: &DofMap,
) -> Result<(), csv::Error> {
    write_internal_columns(
        out,
        expansion.frequencies_hz(),
        expansion.residual_vectors(),
        dof_map,
    )
}

pub fn write_residual_vectors(
    path: impl AsRef<Path>,
    expansion: &Expansion,
    dof_map: &DofMap,
) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_residual_vectors_to(io::BufWriter::new(file), expansion, dof_map)
}

/// Writes one row per residual record.
pub fn write_residuals(
    path: impl AsRef<Path>,
    residuals: &[ResidualRecord],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in residuals {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
