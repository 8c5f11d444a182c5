//! This module provides utilities for reading and writing assembly artifacts.
//!
//! An artifact is a line-oriented text file (`.kfa`) in the spirit of the DIMACS
//! formats: every line starts with a tag, 1-based indices follow, and complex values
//! are written as `re [im]` with the imaginary part defaulting to zero.
//!
//! ```text
//! c <comment>
//! p full <ndof> <num_nodes> <max_node> <dofs_per_node>
//! k <row> <col> <re> [im]        stiffness entry
//! m <row> <col> <re> [im]        mass entry
//! d <row> <col> <re> [im]        damping entry
//! f <row> <re> [im]              reference load entry
//! fw <ext_node> <int_node>       forward node map (int_node <= 0: unmapped)
//! bk <int_node> <ext_node>       back node map
//! eq <solver_eq> <internal_eq>   solver -> internal equation ordering
//! ```
//!
//! Duplicate matrix entries are summed. Without `fw`/`bk` lines the node numbering is
//! the identity, and without `eq` lines the solver keeps internal equation order.

use crate::{
    assembly::{AssembledSystem, DofMap},
    error::{KrylovError, KrylovErrorKind},
    matrix::SystemMatrix,
};
use faer::{Mat, c64, sparse::Triplet};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
    str::FromStr,
};
use thiserror::Error;

/// Represents all possible errors that can occur while parsing an artifact.
#[derive(Error, Debug)]
pub enum DataLoaderError {
    /// Wraps a standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A token that should be an integer is not.
    #[error("Parse error on line {line}: failed to parse integer from '{token}'")]
    ParseInt { line: usize, token: String },
    /// A token that should be a float is not.
    #[error("Parse error on line {line}: failed to parse float from '{token}'")]
    ParseFloat { line: usize, token: String },
    /// The 'p full' problem line is missing or malformed.
    #[error("Format error: the 'p full' problem line was not found or was malformed.")]
    ProblemLineMissing,
    /// A line is structurally invalid.
    #[error("Format error on line {line}: {msg}")]
    Malformed { line: usize, msg: String },
    /// A 1-based index falls outside the range declared by the problem line.
    #[error("Index error on line {line}: {what} {index} is outside 1..={max}")]
    IndexOutOfRange {
        line: usize,
        what: &'static str,
        index: usize,
        max: usize,
    },
    /// The numbering tables are incomplete or contradictory.
    #[error("Mapping error: {0}")]
    Mapping(String),
    /// The sparse matrix construction failed internally.
    #[error("Internal error: Failed to construct the sparse {0} matrix from triplets.")]
    SparseMatrixConstructionError(&'static str),
}

impl From<DataLoaderError> for KrylovError {
    fn from(err: DataLoaderError) -> Self {
        KrylovErrorKind::Artifact(err.to_string()).into()
    }
}

/// Dimensions declared by the problem line.
#[derive(Debug, Clone, Copy)]
struct Header {
    ndof: usize,
    num_nodes: usize,
    max_node: usize,
    dofs_per_node: usize,
}

/// Raw content of an artifact before validation.
#[derive(Default)]
struct RawArtifact {
    header: Option<Header>,
    stiffness: Vec<Triplet<usize, usize, c64>>,
    mass: Vec<Triplet<usize, usize, c64>>,
    damping: Vec<Triplet<usize, usize, c64>>,
    load: Vec<(usize, c64)>,
    forward: Vec<(usize, Option<usize>)>,
    back: Vec<(usize, usize)>,
    equations: Vec<(usize, usize)>,
}

fn parse_int<T: FromStr>(token: &str, line: usize) -> Result<T, DataLoaderError> {
    token.parse::<T>().map_err(|_| DataLoaderError::ParseInt {
        line,
        token: token.to_string(),
    })
}

fn parse_float(token: &str, line: usize) -> Result<f64, DataLoaderError> {
    token.parse::<f64>().map_err(|_| DataLoaderError::ParseFloat {
        line,
        token: token.to_string(),
    })
}

/// Parses a 1-based index and converts it to 0-based.
fn parse_index(
    token: &str,
    line: usize,
    what: &'static str,
    max: usize,
) -> Result<usize, DataLoaderError> {
    let index: usize = parse_int(token, line)?;
    if index == 0 || index > max {
        return Err(DataLoaderError::IndexOutOfRange {
            line,
            what,
            index,
            max,
        });
    }
    Ok(index - 1)
}

/// Parses `re [im]` starting at `parts[at]`.
fn parse_value(parts: &[&str], at: usize, line: usize) -> Result<c64, DataLoaderError> {
    let re = parse_float(parts[at], line)?;
    let im = match parts.get(at + 1) {
        Some(token) => parse_float(token, line)?,
        None => 0.0,
    };
    Ok(c64::new(re, im))
}

fn expect_fields(parts: &[&str], min: usize, max: usize, line: usize) -> Result<(), DataLoaderError> {
    if parts.len() < min || parts.len() > max {
        return Err(DataLoaderError::Malformed {
            line,
            msg: format!(
                "'{}' lines take {} to {} fields, found {}",
                parts[0],
                min - 1,
                max - 1,
                parts.len() - 1
            ),
        });
    }
    Ok(())
}

fn parse_lines<R: BufRead>(reader: R) -> Result<RawArtifact, DataLoaderError> {
    let mut raw = RawArtifact::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || parts[0] == "c" {
            continue;
        }

        if parts[0] == "p" {
            if raw.header.is_some() || parts.len() != 6 || parts[1] != "full" {
                return Err(DataLoaderError::ProblemLineMissing);
            }
            raw.header = Some(Header {
                ndof: parse_int(parts[2], lineno)?,
                num_nodes: parse_int(parts[3], lineno)?,
                max_node: parse_int(parts[4], lineno)?,
                dofs_per_node: parse_int(parts[5], lineno)?,
            });
            continue;
        }

        let Some(h) = raw.header else {
            return Err(DataLoaderError::Malformed {
                line: lineno,
                msg: format!("'{}' entry before the problem line", parts[0]),
            });
        };

        match parts[0] {
            tag @ ("k" | "m" | "d") => {
                expect_fields(&parts, 4, 5, lineno)?;
                let triplet = Triplet {
                    row: parse_index(parts[1], lineno, "row", h.ndof)?,
                    col: parse_index(parts[2], lineno, "column", h.ndof)?,
                    val: parse_value(&parts, 3, lineno)?,
                };
                match tag {
                    "k" => raw.stiffness.push(triplet),
                    "m" => raw.mass.push(triplet),
                    _ => raw.damping.push(triplet),
                }
            }
            "f" => {
                expect_fields(&parts, 3, 4, lineno)?;
                let row = parse_index(parts[1], lineno, "load row", h.ndof)?;
                raw.load.push((row, parse_value(&parts, 2, lineno)?));
            }
            "fw" => {
                expect_fields(&parts, 3, 3, lineno)?;
                let ext = parse_index(parts[1], lineno, "external node", h.max_node)?;
                let int: i64 = parse_int(parts[2], lineno)?;
                let int = if int <= 0 {
                    None
                } else {
                    Some(parse_index(parts[2], lineno, "internal node", h.num_nodes)?)
                };
                raw.forward.push((ext, int));
            }
            "bk" => {
                expect_fields(&parts, 3, 3, lineno)?;
                let int = parse_index(parts[1], lineno, "internal node", h.num_nodes)?;
                let ext = parse_index(parts[2], lineno, "external node", h.max_node)?;
                raw.back.push((int, ext));
            }
            "eq" => {
                expect_fields(&parts, 3, 3, lineno)?;
                let internal = h.num_nodes * h.dofs_per_node;
                let s = parse_index(parts[1], lineno, "solver equation", h.ndof)?;
                let e = parse_index(parts[2], lineno, "internal equation", internal)?;
                raw.equations.push((s, e));
            }
            other => {
                return Err(DataLoaderError::Malformed {
                    line: lineno,
                    msg: format!("unknown line tag '{other}'"),
                });
            }
        }
    }

    Ok(raw)
}

/// Builds the numbering tables, filling in whatever the artifact leaves implicit.
fn build_dof_map(h: Header, raw: &RawArtifact) -> Result<DofMap, KrylovError> {
    let mut forward: Vec<Option<usize>> = vec![None; h.max_node];
    let mut back: Vec<Option<usize>> = vec![None; h.num_nodes];

    match (raw.forward.is_empty(), raw.back.is_empty()) {
        (true, true) => {
            if h.max_node != h.num_nodes {
                return Err(DataLoaderError::Mapping(format!(
                    "no node maps given but max_node ({}) differs from num_nodes ({})",
                    h.max_node, h.num_nodes
                ))
                .into());
            }
            for i in 0..h.num_nodes {
                forward[i] = Some(i);
                back[i] = Some(i + 1);
            }
        }
        (false, true) => {
            for &(ext, int) in &raw.forward {
                forward[ext] = int;
                if let Some(int) = int {
                    back[int] = Some(ext + 1);
                }
            }
        }
        (true, false) => {
            for &(int, ext) in &raw.back {
                back[int] = Some(ext + 1);
                forward[ext] = Some(int);
            }
        }
        (false, false) => {
            for &(ext, int) in &raw.forward {
                forward[ext] = int;
            }
            for &(int, ext) in &raw.back {
                back[int] = Some(ext + 1);
            }
        }
    }

    let back = back
        .into_iter()
        .enumerate()
        .map(|(int, ext)| {
            ext.ok_or_else(|| {
                DataLoaderError::Mapping(format!(
                    "internal node {} has no external counterpart",
                    int + 1
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let internal = h.num_nodes * h.dofs_per_node;
    let solver_to_internal = if raw.equations.is_empty() {
        if h.ndof != internal {
            return Err(DataLoaderError::Mapping(format!(
                "no equation ordering given but ndof ({}) differs from num_nodes * dofs_per_node ({})",
                h.ndof, internal
            ))
            .into());
        }
        (0..h.ndof).collect()
    } else {
        let mut order: Vec<Option<usize>> = vec![None; h.ndof];
        for &(s, e) in &raw.equations {
            order[s] = Some(e);
        }
        order
            .into_iter()
            .enumerate()
            .map(|(s, e)| {
                e.ok_or_else(|| {
                    DataLoaderError::Mapping(format!(
                        "solver equation {} has no internal equation",
                        s + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    DofMap::new(forward, back, solver_to_internal, h.dofs_per_node)
}

/// Reads an assembled system from any buffered reader.
pub fn read_assembly<R: BufRead>(reader: R) -> Result<AssembledSystem, KrylovError> {
    let raw = parse_lines(reader)?;
    let h = raw.header.ok_or(DataLoaderError::ProblemLineMissing)?;
    if h.ndof == 0 || h.num_nodes == 0 || h.dofs_per_node == 0 {
        return Err(DataLoaderError::Mapping(
            "ndof, num_nodes and dofs_per_node must all be positive".to_string(),
        )
        .into());
    }

    let sparse = |name: &'static str, triplets: &[Triplet<usize, usize, c64>]| {
        SystemMatrix::sparse_from_triplets(h.ndof, h.ndof, triplets)
            .ok_or(DataLoaderError::SparseMatrixConstructionError(name))
    };
    let stiffness = sparse("stiffness", &raw.stiffness)?;
    let mass = sparse("mass", &raw.mass)?;
    let damping = sparse("damping", &raw.damping)?;

    let mut load = Mat::<c64>::zeros(h.ndof, 1);
    for &(row, val) in &raw.load {
        load[(row, 0)] += val;
    }

    let dof_map = build_dof_map(h, &raw)?;
    AssembledSystem::new(stiffness, mass, damping, load, dof_map)
}

/// Loads an assembled system from an artifact file.
///
/// # Returns
/// [`KrylovErrorKind::ArtifactNotFound`] if `path` does not exist,
/// [`KrylovErrorKind::Artifact`] if it cannot be read or is inconsistent.
pub fn load_assembly(path: impl AsRef<Path>) -> Result<AssembledSystem, KrylovError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| -> KrylovError {
        if e.kind() == io::ErrorKind::NotFound {
            KrylovErrorKind::ArtifactNotFound {
                path: path.to_path_buf(),
            }
            .into()
        } else {
            DataLoaderError::Io(e).into()
        }
    })?;
    let system = read_assembly(BufReader::new(file))?;
    log::info!(
        "Loaded assembly artifact {:?}: {} equations, {} nodes, {} dofs per node.",
        path,
        system.ndof(),
        system.dof_map().num_nodes(),
        system.dof_map().dofs_per_node()
    );
    Ok(system)
}

fn write_value<W: Write>(out: &mut W, val: c64) -> io::Result<()> {
    if val.im == 0.0 {
        write!(out, " {}", val.re)
    } else {
        write!(out, " {} {}", val.re, val.im)
    }
}

/// Serializes a system in the artifact format. Every table is written explicitly.
pub fn write_assembly_to<W: Write>(
    mut out: W,
    system: &AssembledSystem,
    comment: Option<&str>,
) -> Result<(), DataLoaderError> {
    let map = system.dof_map();
    if let Some(comment) = comment {
        for line in comment.lines() {
            writeln!(out, "c {line}")?;
        }
    }
    writeln!(
        out,
        "p full {} {} {} {}",
        system.ndof(),
        map.num_nodes(),
        map.max_node(),
        map.dofs_per_node()
    )?;

    for (tag, matrix) in [
        ("k", system.stiffness()),
        ("m", system.mass()),
        ("d", system.damping()),
    ] {
        for t in matrix.triplets() {
            write!(out, "{} {} {}", tag, t.row + 1, t.col + 1)?;
            write_value(&mut out, t.val)?;
            writeln!(out)?;
        }
    }

    let load = system.load();
    for row in 0..load.nrows() {
        let val = load[(row, 0)];
        if val != c64::new(0.0, 0.0) {
            write!(out, "f {}", row + 1)?;
            write_value(&mut out, val)?;
            writeln!(out)?;
        }
    }

    for (ext, int) in map.forward().iter().enumerate() {
        match int {
            Some(int) => writeln!(out, "fw {} {}", ext + 1, int + 1)?,
            None => writeln!(out, "fw {} 0", ext + 1)?,
        }
    }
    for (int, ext) in map.back().iter().enumerate() {
        writeln!(out, "bk {} {}", int + 1, ext)?;
    }
    for (s, eq) in map.solver_to_internal().iter().enumerate() {
        writeln!(out, "eq {} {}", s + 1, eq + 1)?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a system to an artifact file.
pub fn write_assembly(
    path: impl AsRef<Path>,
    system: &AssembledSystem,
    comment: Option<&str>,
) -> Result<(), KrylovError> {
    let file = File::create(path.as_ref()).map_err(DataLoaderError::Io)?;
    write_assembly_to(BufWriter::new(file), system, comment)?;
    Ok(())
}
