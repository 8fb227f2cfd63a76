//! CSV results table with resume support.
//!
//! The table is append-only. Opening an existing file scans its rows into a
//! set of completed cells so a restarted sweep can skip them; every appended
//! row is flushed and synced before `append` returns. Rows go through `csv`
//! and `serde`, so quoting and escaping follow RFC 4180.

use anyhow::{Context, Result, bail};
use qstress_core::task::DecoderId;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Column header of the results table, in field order of [`ResultRow`].
pub const COLUMNS: [&str; 14] = [
    "decoder",
    "distance",
    "shots",
    "errors",
    "logical_error_rate",
    "ci_low",
    "ci_high",
    "mean_latency_us",
    "fast_path_fraction",
    "latency_stddev_us",
    "base_error_rate",
    "drift",
    "burst",
    "rounds",
];

/// Identity of one sweep cell.
///
/// Floating-point coordinates are compared by bit pattern, which is exact
/// because the table prints them in shortest round-trip form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub decoder: DecoderId,
    pub distance: usize,
    pub rounds: usize,
    base_error_rate: u64,
    drift: u64,
    burst: u64,
}

impl CellKey {
    pub fn new(
        decoder: DecoderId,
        distance: usize,
        rounds: usize,
        base_error_rate: f64,
        drift: f64,
        burst: f64,
    ) -> Self {
        Self {
            decoder,
            distance,
            rounds,
            base_error_rate: base_error_rate.to_bits(),
            drift: drift.to_bits(),
            burst: burst.to_bits(),
        }
    }
}

/// One finished sweep cell as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(with = "decoder_name")]
    pub decoder: DecoderId,
    pub distance: usize,
    pub shots: u64,
    pub errors: u64,
    pub logical_error_rate: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    #[serde(serialize_with = "nanosecond_resolution")]
    pub mean_latency_us: f64,
    pub fast_path_fraction: f64,
    #[serde(serialize_with = "nanosecond_resolution")]
    pub latency_stddev_us: f64,
    pub base_error_rate: f64,
    pub drift: f64,
    pub burst: f64,
    pub rounds: usize,
}

impl ResultRow {
    pub fn key(&self) -> CellKey {
        CellKey::new(
            self.decoder,
            self.distance,
            self.rounds,
            self.base_error_rate,
            self.drift,
            self.burst,
        )
    }
}

/// Decoders are stored by their command-line name.
mod decoder_name {
    use qstress_core::task::DecoderId;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &DecoderId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(id.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DecoderId, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(D::Error::custom)
    }
}

/// Microsecond columns keep three decimals.
fn nanosecond_resolution<S: Serializer>(micros: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((micros * 1000.0).round() / 1000.0)
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

/// Destination for finished sweep cells.
pub trait RowSink {
    /// Cells that already have a persisted row.
    fn completed(&self) -> &HashSet<CellKey>;

    /// Persists one row. Once this returns Ok the row survives a crash.
    fn append(&mut self, row: &ResultRow) -> Result<()>;

    fn is_completed(&self, key: &CellKey) -> bool {
        self.completed().contains(key)
    }
}

/// Append-only CSV file of results.
pub struct ResultsTable {
    path: PathBuf,
    writer: csv::Writer<File>,
    completed: HashSet<CellKey>,
    skipped_lines: usize,
}

impl ResultsTable {
    /// Opens (or creates) the table at `path` for appending.
    ///
    /// A new or empty file gets the header. An existing file must start with
    /// the header; its rows are scanned into the completed set, with
    /// malformed rows logged and skipped. A file whose last line lacks a
    /// newline is repaired before anything is appended.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the CSV file
    ///
    /// # Returns
    ///
    /// The open table, or an error if the file cannot be read or written or
    /// is not a results table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut completed = HashSet::new();
        let mut skipped_lines = 0;
        let mut needs_header = true;
        let mut needs_newline = false;

        match fs::read(&path) {
            Ok(bytes) => {
                needs_newline = !bytes.is_empty() && !bytes.ends_with(b"\n");
                let mut reader = csv_reader(&bytes);
                let headers = reader
                    .headers()
                    .with_context(|| format!("Failed to read header of {}", path.display()))?
                    .clone();
                if !headers.is_empty() {
                    if headers.iter().ne(COLUMNS.iter().copied()) {
                        bail!(
                            "{} exists but is not a results table (unexpected header)",
                            path.display()
                        );
                    }
                    needs_header = false;
                    for result in reader.deserialize::<ResultRow>() {
                        match result {
                            Ok(row) => {
                                completed.insert(row.key());
                            }
                            Err(e) => {
                                skipped_lines += 1;
                                let line = e.position().map_or(0, |p| p.line());
                                log::warn!(
                                    "{}:{line}: skipping malformed row: {e}",
                                    path.display()
                                );
                            }
                        }
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {} for appending", path.display()))?;
        if needs_newline {
            file.write_all(b"\n")?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(COLUMNS)?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;

        if !completed.is_empty() {
            log::info!(
                "{}: {} completed cells found",
                path.display(),
                completed.len()
            );
        }

        Ok(Self {
            path,
            writer,
            completed,
            skipped_lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of existing rows that could not be parsed on open.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

impl RowSink for ResultsTable {
    fn completed(&self) -> &HashSet<CellKey> {
        &self.completed
    }

    fn append(&mut self, row: &ResultRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        self.writer
            .get_ref()
            .sync_data()
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;
        self.completed.insert(row.key());
        Ok(())
    }
}

/// Reads every well-formed row of the table at `path`.
pub fn read_rows<P: AsRef<Path>>(path: P) -> Result<Vec<ResultRow>> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(csv_reader(&bytes)
        .deserialize::<ResultRow>()
        .filter_map(|r| r.ok())
        .collect())
}

/// In-memory sink, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<ResultRow>,
    completed: HashSet<CellKey>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that already holds the given cells.
    pub fn with_completed<I: IntoIterator<Item = CellKey>>(keys: I) -> Self {
        Self {
            rows: Vec::new(),
            completed: keys.into_iter().collect(),
        }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }
}

impl RowSink for MemorySink {
    fn completed(&self) -> &HashSet<CellKey> {
        &self.completed
    }

    fn append(&mut self, row: &ResultRow) -> Result<()> {
        self.completed.insert(row.key());
        self.rows.push(row.clone());
        Ok(())
    }
}
