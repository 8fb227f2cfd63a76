//! Parser for decoding graph description files.
//!
//! Provides functions for parsing Stim-style .dem (Detector Error Model)
//! text, which describes the fault mechanisms of a stabilizer circuit. Every
//! `error(p)` instruction becomes one or more edges of a DecodingGraph; the
//! `^` separator splits a decomposed mechanism into its graphlike parts.
//! Flattened models only: `repeat` blocks are rejected.

use anyhow::{Context, Result, anyhow, bail};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map, map_res, opt},
    multi::many0,
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use qstress_core::graph::DecodingGraph;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Detector(usize),
    Observable(usize),
    Separator,
}

#[derive(Debug, Clone, PartialEq)]
enum Instruction {
    Error { probability: f64, targets: Vec<Target> },
    Detector(usize),
    LogicalObservable,
    ShiftDetectors(usize),
}

fn index(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn coordinates(input: &str) -> IResult<&str, &str> {
    delimited(char('('), take_while(|c| c != ')'), char(')'))(input)
}

fn target(input: &str) -> IResult<&str, Target> {
    alt((
        map(preceded(char('D'), index), Target::Detector),
        map(preceded(char('L'), index), Target::Observable),
        map(char('^'), |_| Target::Separator),
    ))(input)
}

fn error_instruction(input: &str) -> IResult<&str, Instruction> {
    let (input, _) = tag("error")(input)?;
    let (input, probability) =
        delimited(pair(char('('), space0), double, pair(space0, char(')')))(input)?;
    let (input, targets) = many0(preceded(space1, target))(input)?;
    Ok((input, Instruction::Error { probability, targets }))
}

fn detector_instruction(input: &str) -> IResult<&str, Instruction> {
    map(
        preceded(
            tuple((tag("detector"), opt(coordinates), space1, char('D'))),
            index,
        ),
        Instruction::Detector,
    )(input)
}

fn observable_instruction(input: &str) -> IResult<&str, Instruction> {
    map(
        preceded(tuple((tag("logical_observable"), space1, char('L'))), index),
        |_| Instruction::LogicalObservable,
    )(input)
}

fn shift_instruction(input: &str) -> IResult<&str, Instruction> {
    map(
        preceded(
            tuple((tag("shift_detectors"), opt(coordinates), space1)),
            index,
        ),
        Instruction::ShiftDetectors,
    )(input)
}

fn instruction(input: &str) -> IResult<&str, Instruction> {
    all_consuming(terminated(
        alt((
            error_instruction,
            detector_instruction,
            observable_instruction,
            shift_instruction,
        )),
        space0,
    ))(input)
}

/// Adds the graphlike components of one `error` instruction to `graph`.
fn add_mechanism(
    graph: &mut DecodingGraph,
    probability: f64,
    targets: &[Target],
    offset: usize,
) -> Result<()> {
    if !(0.0..=1.0).contains(&probability) {
        bail!("probability {probability} outside [0, 1]");
    }
    for component in targets.split(|t| *t == Target::Separator) {
        let mut detectors = [0usize; 2];
        let mut count = 0;
        let mut observable = false;
        for t in component {
            match *t {
                Target::Detector(d) => {
                    if count == 2 {
                        bail!("mechanism flips more than two detectors; decompose it first");
                    }
                    detectors[count] = d + offset;
                    count += 1;
                }
                Target::Observable(0) => observable = !observable,
                Target::Observable(k) => log::debug!("ignoring observable L{k}"),
                Target::Separator => {}
            }
        }
        if count == 2 && detectors[0] == detectors[1] {
            count = 0;
        }
        if count == 0 {
            if observable {
                log::warn!("dropping mechanism that flips the observable but no detector");
            }
            continue;
        }
        let highest = detectors[..count].iter().copied().max().unwrap_or(0);
        graph.ensure_detectors(highest + 1);
        let v = (count == 2).then_some(detectors[1]);
        graph.add_edge(detectors[0], v, probability, observable)?;
    }
    Ok(())
}

/// Parses DEM text into a DecodingGraph.
///
/// The detector count is the highest detector index mentioned by any
/// `error` or `detector` instruction, plus one. Comments (`#`) and blank
/// lines are skipped; `logical_observable` declarations carry no edges.
///
/// # Arguments
///
/// * `text` - Full contents of a .dem file
///
/// # Returns
///
/// A DecodingGraph with its adjacency built, or an error naming the first
/// line that could not be understood.
pub fn parse_dem(text: &str) -> Result<DecodingGraph> {
    let mut graph = DecodingGraph::new(0);
    let mut offset = 0usize;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("repeat") {
            bail!(
                "line {}: repeat blocks are not supported, flatten the model first",
                line_no + 1
            );
        }
        let (_, parsed) = instruction(line)
            .map_err(|e| anyhow!("line {}: cannot parse '{}': {}", line_no + 1, line, e))?;
        match parsed {
            Instruction::Error {
                probability,
                targets,
            } => add_mechanism(&mut graph, probability, &targets, offset)
                .with_context(|| format!("line {}", line_no + 1))?,
            Instruction::Detector(d) => graph.ensure_detectors(offset + d + 1),
            Instruction::ShiftDetectors(n) => offset += n,
            Instruction::LogicalObservable => {}
        }
    }

    graph.build_adjacency();
    Ok(graph)
}

/// Loads a .dem file and constructs a DecodingGraph.
///
/// # Arguments
///
/// * `path` - Path to the .dem file
///
/// # Returns
///
/// A DecodingGraph containing all edges from the file, or an error if the
/// file cannot be read or parsed.
pub fn load_dem_file<P: AsRef<Path>>(path: P) -> Result<DecodingGraph> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to open .dem file {}", path.display()))?;
    parse_dem(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Writes `graph` as DEM text.
///
/// Probabilities are printed in their shortest round-trip form, so parsing
/// the output reproduces the same edges, weights and detector count.
pub fn write_dem<W: Write>(graph: &DecodingGraph, mut out: W) -> Result<()> {
    writeln!(
        out,
        "# {} detectors, {} mechanisms",
        graph.num_detectors,
        graph.num_edges()
    )?;
    for edge in &graph.edges {
        write!(out, "error({}) D{}", edge.probability, edge.u)?;
        if edge.v != graph.boundary() {
            write!(out, " D{}", edge.v)?;
        }
        if edge.observable {
            write!(out, " L0")?;
        }
        writeln!(out)?;
    }
    for d in 0..graph.num_detectors {
        writeln!(out, "detector D{d}")?;
    }
    out.flush()?;
    Ok(())
}

/// Writes `graph` to a .dem file at `path`.
pub fn save_dem_file<P: AsRef<Path>>(graph: &DecodingGraph, path: P) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_dem(graph, BufWriter::new(file))
}
