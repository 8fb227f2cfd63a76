//! I/O utilities for stress benchmark data files.
//!
//! Provides readers and writers for decoding graphs (.dem files), bit-packed
//! syndrome data (.b8 files), and the append-only CSV results table the
//! benchmark sweep persists into and resumes from.

/// File loading utilities for bit-packed syndrome data.
///
/// Reads and writes .b8 files: one byte-padded record per shot holding the
/// detector bits, optionally followed by the logical observable bit.
pub mod loader;

/// Parser for decoding graph descriptions in DEM format.
///
/// Parses detector error model (.dem) text into a `DecodingGraph` and writes
/// a graph back out in the same format, so models produced by external
/// simulators and by the built-in generator are interchangeable.
pub mod parser;

/// Append-only results table.
///
/// One CSV row per finished sweep cell, flushed and synced as soon as it is
/// written so an interrupted sweep never loses a completed cell.
pub mod table;
