//! Channel reader capability and the file helpers shared by every equipment
//! family.
//!
//! A [`ChannelReader`] knows how to find the channels of one equipment
//! layout under a test directory and how to turn one channel's sequential
//! files into a [`ChannelTable`]. Readers are stateless apart from their
//! [`ReadOptions`], so a single instance is shared across worker tasks.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::{
    Anomaly, AuxColumn, CellValue, ChannelDescriptor, ChannelTable, ColumnKind, EquipmentType,
    Record,
};
use cyclelog_core::settings::{ExtraFilePolicy, OrderingPolicy};
use tracing::warn;

use crate::pne::PneChannelReader;
use crate::toyo::ToyoChannelReader;

// ── Public API ────────────────────────────────────────────────────────────────

/// Per-run reader configuration.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub extra_files: ExtraFilePolicy,
    /// Set by the loader when another channel failed; readers stop at the
    /// next fragment boundary.
    pub cancel: Arc<AtomicBool>,
}

impl ReadOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(AtomicOrdering::Relaxed)
    }

    /// Return `Cancelled` once the shared flag has been raised.
    pub fn check_cancelled(&self, channel: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(CyclerError::Cancelled(channel.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Discovery and loading for one equipment family.
pub trait ChannelReader: Send + Sync {
    fn equipment(&self) -> EquipmentType;

    /// Channels under `root`, in the order they will be merged.
    fn discover_channels(&self, root: &Path) -> Result<Vec<ChannelDescriptor>>;

    /// Read every fragment of `channel` into one table.
    fn load_channel(&self, channel: &ChannelDescriptor) -> Result<ChannelTable>;
}

/// Build the reader for `equipment`.
pub fn reader_for(equipment: EquipmentType, options: ReadOptions) -> Box<dyn ChannelReader> {
    match equipment {
        EquipmentType::Pne => Box::new(PneChannelReader::new(options)),
        EquipmentType::Toyo1 | EquipmentType::Toyo2 => {
            Box::new(ToyoChannelReader::new(equipment, options))
        }
    }
}

// ── Directory listing ─────────────────────────────────────────────────────────

/// One immediate child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChild {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Immediate children of `dir`, sorted by name.
///
/// Entries whose names are not valid UTF-8 are skipped with a warning;
/// they can never match a channel or fragment pattern.
pub fn list_children(dir: &Path) -> Result<Vec<DirChild>> {
    let mut children = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            CyclerError::file_read(path, source)
        })?;
        let Some(name) = entry.file_name().to_str() else {
            warn!("Skipping non UTF-8 entry {}", entry.path().display());
            continue;
        };
        children.push(DirChild {
            name: name.to_string(),
            is_dir: entry.file_type().is_dir(),
            path: entry.into_path(),
        });
    }
    Ok(children)
}

/// `true` when `name` is non-empty and made only of ASCII digits.
pub fn is_numeric_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

// ── Line reading ──────────────────────────────────────────────────────────────

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Streaming UTF-8 line reader.
///
/// Yields `(line_number, line)` with 1-based line numbers. A leading BOM is
/// stripped and trailing `\r\n` removed. Invalid UTF-8 is an `Encoding`
/// error, never decoded lossily.
pub struct Utf8Lines {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
    buf: Vec<u8>,
}

impl Utf8Lines {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CyclerError::file_read(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            line: 0,
            buf: Vec::with_capacity(512),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for Utf8Lines {
    type Item = Result<(usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(CyclerError::file_read(&self.path, e))),
        }
        self.line += 1;

        let mut bytes: &[u8] = &self.buf;
        if self.line == 1 {
            bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        }
        while let Some((&last, rest)) = bytes.split_last() {
            if last == b'\n' || last == b'\r' {
                bytes = rest;
            } else {
                break;
            }
        }

        Some(match std::str::from_utf8(bytes) {
            Ok(s) => Ok((self.line, s.to_string())),
            Err(_) => Err(CyclerError::Encoding {
                path: self.path.clone(),
                line: self.line,
            }),
        })
    }
}

// ── Delimited records ─────────────────────────────────────────────────────────

/// Streaming reader for headerless delimited text, built on `csv`.
///
/// Yields `(line_number, record)` for every record with at least one
/// non-empty field; line numbers are 1-based and point at the record's first
/// line. Fields are trimmed, quoted fields are unquoted, and records may vary
/// in width. A leading BOM is skipped and invalid UTF-8 is an `Encoding`
/// error.
pub struct DelimitedRecords {
    path: PathBuf,
    records: csv::StringRecordsIntoIter<BufReader<File>>,
}

impl DelimitedRecords {
    pub fn open(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path).map_err(|e| CyclerError::file_read(path, e))?;
        let mut reader = BufReader::new(file);
        if reader
            .fill_buf()
            .map_err(|e| CyclerError::file_read(path, e))?
            .starts_with(UTF8_BOM)
        {
            reader.consume(UTF8_BOM.len());
        }
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    fn error(&self, err: csv::Error) -> CyclerError {
        let line = err.position().map_or(0, |p| p.line() as usize);
        if let csv::ErrorKind::Utf8 { .. } = err.kind() {
            return CyclerError::Encoding {
                path: self.path.clone(),
                line,
            };
        }
        let reason = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(source) => CyclerError::file_read(&self.path, source),
            _ => CyclerError::MalformedRecord {
                path: self.path.clone(),
                line,
                reason,
            },
        }
    }
}

impl Iterator for DelimitedRecords {
    type Item = Result<(usize, csv::StringRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(err) => return Some(Err(self.error(err))),
            };
            if record.iter().all(str::is_empty) {
                continue;
            }
            let line = record.position().map_or(0, |p| p.line() as usize);
            return Some(Ok((line, record)));
        }
    }
}

/// Parse one field, reporting the file and line on failure.
pub(crate) fn parse_field<T: FromStr>(raw: &str, name: &str, path: &Path, line: usize) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| CyclerError::MalformedRecord {
            path: path.to_path_buf(),
            line,
            reason: format!("field {name} is not a number: {:?}", raw.trim()),
        })
}

/// Parse an integer field; whole-valued decimals such as `"3.0"` are
/// accepted.
pub(crate) fn parse_int(raw: &str, name: &str, path: &Path, line: usize) -> Result<i64> {
    let token = raw.trim();
    if let Ok(i) = token.parse::<i64>() {
        return Ok(i);
    }
    match token.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(CyclerError::MalformedRecord {
            path: path.to_path_buf(),
            line,
            reason: format!("field {name} is not an integer: {token:?}"),
        }),
    }
}

// ── Auxiliary columns ─────────────────────────────────────────────────────────

/// Settle each auxiliary column's kind from the values actually read and
/// coerce every cell to it.
///
/// Integers mixed with floats become floats; numbers mixed with text become
/// text. A column with no values keeps its declared kind.
pub(crate) fn settle_aux_kinds(columns: &mut [AuxColumn], records: &mut [Record]) {
    for (i, column) in columns.iter_mut().enumerate() {
        let observed = records
            .iter()
            .filter_map(|r| r.aux.get(i).and_then(CellValue::kind))
            .reduce(ColumnKind::widen);
        if let Some(kind) = observed {
            column.kind = kind;
        }
        for record in records.iter_mut() {
            if let Some(cell) = record.aux.get_mut(i) {
                *cell = std::mem::take(cell).coerce(column.kind);
            }
        }
    }
}

// ── Extra files ───────────────────────────────────────────────────────────────

/// Apply the extra-file policy to a channel with `found` sequential files
/// where only `expected` are declared.
///
/// Returns whether the extras should be loaded plus the anomaly to record.
pub(crate) fn resolve_extra_files(
    policy: ExtraFilePolicy,
    channel: &str,
    expected: usize,
    found: usize,
) -> Result<(bool, Anomaly)> {
    let load = match policy {
        ExtraFilePolicy::Fail => {
            return Err(CyclerError::ExtraFragments {
                channel: channel.to_string(),
                expected,
                found,
            })
        }
        ExtraFilePolicy::Warn => true,
        ExtraFilePolicy::Skip => false,
    };
    let anomaly = Anomaly::ExtraFragments {
        channel: channel.to_string(),
        expected,
        found,
        loaded: load,
    };
    warn!("{anomaly}");
    Ok((load, anomaly))
}

// ── Ordering ──────────────────────────────────────────────────────────────────

/// Check that `timestamp` and `cycle` never decrease within `table`.
///
/// Under [`OrderingPolicy::Strict`] the first violation is returned as an
/// `Ordering` error. Under [`OrderingPolicy::Lenient`] every violation is
/// appended to the table's anomalies and the rows are kept. Row numbers are
/// 0-based positions in the channel's record list.
pub fn check_ordering(table: &mut ChannelTable, policy: OrderingPolicy) -> Result<()> {
    let mut violations = Vec::new();
    for (row, pair) in table.records.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        let mut columns = Vec::new();
        if cur.timestamp < prev.timestamp {
            columns.push("timestamp");
        }
        if cur.cycle < prev.cycle {
            columns.push("cycle");
        }
        for column in columns {
            if policy == OrderingPolicy::Strict {
                return Err(CyclerError::Ordering {
                    channel: table.id().to_string(),
                    row: row + 1,
                    column: column.to_string(),
                });
            }
            violations.push(Anomaly::NonMonotonic {
                channel: table.id().to_string(),
                row: row + 1,
                column: column.to_string(),
            });
        }
    }
    if !violations.is_empty() {
        warn!(
            "Channel {}: {} ordering violations kept (lenient)",
            table.id(),
            violations.len()
        );
        table.anomalies.extend(violations);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
