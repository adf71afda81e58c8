use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Marker used for metadata tokens that were absent from the path.
pub const UNKNOWN: &str = "unknown";

// ── Equipment ─────────────────────────────────────────────────────────────────

/// The battery cycler families the ingestion engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EquipmentType {
    /// PNE cyclers: tab-delimited SaveData fragments in micro-units.
    Pne,
    /// Toyo cyclers writing only `CAPACITY.LOG` next to the raw files.
    Toyo1,
    /// Toyo cyclers that also write an auxiliary log per channel.
    Toyo2,
}

impl EquipmentType {
    /// Display name used in logs, file names and the merged table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pne => "PNE",
            Self::Toyo1 => "TOYO1",
            Self::Toyo2 => "TOYO2",
        }
    }

    /// `true` for both Toyo layouts.
    pub fn is_toyo(&self) -> bool {
        matches!(self, Self::Toyo1 | Self::Toyo2)
    }

    /// Whether two equipment types write the same raw file layout.
    pub fn same_family(&self, other: &EquipmentType) -> bool {
        self.is_toyo() == other.is_toyo()
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── BatteryInfo ───────────────────────────────────────────────────────────────

/// Cell metadata encoded in the test directory name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryInfo {
    /// Cell manufacturer, e.g. `"LGES"`.
    pub manufacturer: String,
    /// Model designation, e.g. `"G3_MP1"`.
    pub model: String,
    /// Rated capacity in mAh.
    pub capacity_mah: f64,
    /// Free-form test condition; [`UNKNOWN`] when absent.
    pub test_condition: String,
    /// The directory name the fields were parsed from.
    pub full_name: String,
}

impl BatteryInfo {
    /// Ordered `(key, value)` pairs for reports and export columns.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("manufacturer", self.manufacturer.clone()),
            ("model", self.model.clone()),
            ("capacity_mah", format_capacity(self.capacity_mah)),
            ("test_condition", self.test_condition.clone()),
            ("full_name", self.full_name.clone()),
        ]
    }
}

/// Render a capacity without a trailing `.0` for whole numbers.
pub fn format_capacity(capacity_mah: f64) -> String {
    if capacity_mah.fract() == 0.0 && capacity_mah.abs() < 1e15 {
        format!("{}", capacity_mah as i64)
    } else {
        format!("{}", capacity_mah)
    }
}

// ── Channel discovery ─────────────────────────────────────────────────────────

/// Source files backing a single channel, as found during discovery.
///
/// Fragment lists are always sorted by their embedded sequence number.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSources {
    Pne {
        restore_dir: PathBuf,
        index_start: PathBuf,
        index_last: PathBuf,
        fragments: Vec<(u32, PathBuf)>,
        end_fragment: Option<PathBuf>,
    },
    Toyo {
        capacity_log: Option<PathBuf>,
        raw_files: Vec<(u32, PathBuf)>,
        aux_logs: Vec<PathBuf>,
    },
}

/// One physical test slot discovered under the data directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    /// Channel identifier exactly as the folder is named on disk.
    pub id: String,
    pub equipment: EquipmentType,
    pub dir: PathBuf,
    pub sources: ChannelSources,
}

impl ChannelDescriptor {
    /// Number of sequential data files (fragments or raw files).
    pub fn fragment_count(&self) -> usize {
        match &self.sources {
            ChannelSources::Pne {
                fragments,
                end_fragment,
                ..
            } => fragments.len() + usize::from(end_fragment.is_some()),
            ChannelSources::Toyo { raw_files, .. } => raw_files.len(),
        }
    }
}

// ── Cell values ───────────────────────────────────────────────────────────────

/// Logical type of an auxiliary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Int,
    Float,
    Text,
}

impl ColumnKind {
    /// Combine two kinds; integers widen to floats, text never mixes with
    /// numbers.
    pub fn unify(self, other: ColumnKind) -> Option<ColumnKind> {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Int, Float) | (Float, Int) => Some(Float),
            _ => None,
        }
    }

    /// Like [`unify`](Self::unify) but falls back to `Text` on conflict.
    pub fn widen(self, other: ColumnKind) -> ColumnKind {
        self.unify(other).unwrap_or(ColumnKind::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Float => "float",
            Self::Text => "text",
        }
    }
}

/// A single auxiliary cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Interpret a raw text token: empty → `Null`, then integer, float, text.
    pub fn parse(raw: &str) -> Self {
        let token = raw.trim();
        if token.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = token.parse::<i64>() {
            return Self::Int(i);
        }
        match token.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(token.to_string()),
        }
    }

    /// Kind of the value; `None` for `Null`.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(ColumnKind::Int),
            Self::Float(_) => Some(ColumnKind::Float),
            Self::Text(_) => Some(ColumnKind::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Convert the value so that it matches `kind`.
    pub fn coerce(self, kind: ColumnKind) -> CellValue {
        match (self, kind) {
            (Self::Int(i), ColumnKind::Float) => Self::Float(i as f64),
            (Self::Int(i), ColumnKind::Text) => Self::Text(i.to_string()),
            (Self::Float(f), ColumnKind::Text) => Self::Text(f.to_string()),
            (v, _) => v,
        }
    }

    /// Text form used by exporters; `Null` is the empty string.
    pub fn to_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Name and kind of an auxiliary (equipment-specific) column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxColumn {
    pub name: String,
    pub kind: ColumnKind,
}

impl AuxColumn {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ── Records & tables ──────────────────────────────────────────────────────────

/// One normalized measurement sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Seconds since the start of the channel's test.
    pub timestamp: f64,
    /// Terminal voltage in volts.
    pub voltage: f64,
    /// Current in milliamps; positive while charging, negative while
    /// discharging.
    pub current: f64,
    /// Capacity in mAh, cumulative within the current step.
    pub capacity: f64,
    pub step: i64,
    pub cycle: i64,
    /// Temperature in °C when the equipment reports one.
    pub temperature: Option<f64>,
    /// Equipment-specific values aligned with the owning table's
    /// `aux_columns`.
    pub aux: Vec<CellValue>,
}

/// One row of a Toyo `CAPACITY.LOG`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityLogRow {
    /// 1-based row number; matches the raw file number of the step.
    pub index: u32,
    pub condition: i64,
    pub mode: i64,
    pub cycle: i64,
    pub total_cycle: i64,
    pub capacity_mah: f64,
    /// End condition reported by the equipment (`Vol`, `Cur`, ...).
    pub finish: String,
    /// Every column of the row in header order.
    pub fields: Vec<(String, CellValue)>,
}

/// All records of one channel in fragment and row order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTable {
    pub channel: ChannelDescriptor,
    pub aux_columns: Vec<AuxColumn>,
    pub records: Vec<Record>,
    /// Capacity summary rows (Toyo only).
    pub summary: Vec<CapacityLogRow>,
    pub anomalies: Vec<Anomaly>,
}

impl ChannelTable {
    pub fn new(channel: ChannelDescriptor, aux_columns: Vec<AuxColumn>) -> Self {
        Self {
            channel,
            aux_columns,
            records: Vec::new(),
            summary: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.channel.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of an auxiliary column by name.
    pub fn aux_index(&self, name: &str) -> Option<usize> {
        self.aux_columns.iter().position(|c| c.name == name)
    }
}

// ── Anomalies ─────────────────────────────────────────────────────────────────

/// A tolerated irregularity found during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// More sequential files on disk than the index or log declares.
    ExtraFragments {
        channel: String,
        expected: usize,
        found: usize,
        loaded: bool,
    },
    /// No terminal SaveEnd fragment; the test is probably still running.
    MissingEndFragment { channel: String },
    /// A raw file disagrees with its capacity-log row.
    SummaryMismatch {
        channel: String,
        file: u32,
        expected_cycle: i64,
        found_cycle: i64,
    },
    /// A non-decreasing column decreased (lenient ordering policy).
    NonMonotonic {
        channel: String,
        row: usize,
        column: String,
    },
    /// A fragment contained no data rows.
    EmptyFragment { channel: String, file: String },
}

impl Anomaly {
    pub fn channel(&self) -> &str {
        match self {
            Self::ExtraFragments { channel, .. }
            | Self::MissingEndFragment { channel }
            | Self::SummaryMismatch { channel, .. }
            | Self::NonMonotonic { channel, .. }
            | Self::EmptyFragment { channel, .. } => channel,
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtraFragments {
                channel,
                expected,
                found,
                loaded,
            } => write!(
                f,
                "channel {channel}: {found} files present, {expected} declared ({})",
                if *loaded { "extras loaded" } else { "extras skipped" }
            ),
            Self::MissingEndFragment { channel } => {
                write!(f, "channel {channel}: no SaveEnd fragment (test in progress?)")
            }
            Self::SummaryMismatch {
                channel,
                file,
                expected_cycle,
                found_cycle,
            } => write!(
                f,
                "channel {channel}: raw file {file:06} ends in cycle {found_cycle}, capacity log says {expected_cycle}"
            ),
            Self::NonMonotonic {
                channel,
                row,
                column,
            } => write!(f, "channel {channel}: {column} decreases at row {row}"),
            Self::EmptyFragment { channel, file } => {
                write!(f, "channel {channel}: {file} contains no data rows")
            }
        }
    }
}

// ── Merged dataset ────────────────────────────────────────────────────────────

/// One row of the merged, equipment-agnostic table.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub channel_id: Arc<str>,
    pub source_equipment: EquipmentType,
    pub timestamp: f64,
    pub voltage: f64,
    pub current: f64,
    pub capacity: f64,
    pub step: i64,
    pub cycle: i64,
    pub temperature: Option<f64>,
    /// Aligned with [`MergedDataset::aux_columns`]; `Null` where the source
    /// equipment has no such column.
    pub aux: Vec<CellValue>,
}

/// Union of all channel tables under the canonical schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedDataset {
    pub battery: Option<BatteryInfo>,
    pub aux_columns: Vec<AuxColumn>,
    pub rows: Vec<MergedRow>,
}

impl MergedDataset {
    /// Mandatory columns, in output order.
    pub const CANONICAL_COLUMNS: [&'static str; 9] = [
        "channel_id",
        "source_equipment",
        "timestamp",
        "voltage",
        "current",
        "capacity",
        "step",
        "cycle",
        "temperature",
    ];

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Canonical column names followed by auxiliary column names.
    pub fn column_names(&self) -> Vec<String> {
        Self::CANONICAL_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.aux_columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    pub fn aux_index(&self, name: &str) -> Option<usize> {
        self.aux_columns.iter().position(|c| c.name == name)
    }

    /// All cells of `row` in [`column_names`](Self::column_names) order.
    pub fn row_values(&self, row: &MergedRow) -> Vec<CellValue> {
        let mut values = Vec::with_capacity(Self::CANONICAL_COLUMNS.len() + row.aux.len());
        values.push(CellValue::Text(row.channel_id.to_string()));
        values.push(CellValue::Text(row.source_equipment.as_str().to_string()));
        values.push(CellValue::Float(row.timestamp));
        values.push(CellValue::Float(row.voltage));
        values.push(CellValue::Float(row.current));
        values.push(CellValue::Float(row.capacity));
        values.push(CellValue::Int(row.step));
        values.push(CellValue::Int(row.cycle));
        values.push(row.temperature.map(CellValue::Float).unwrap_or_default());
        values.extend(row.aux.iter().cloned());
        values
    }

    /// Distinct channel ids in row order.
    pub fn channel_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for row in &self.rows {
            if ids.last() != Some(&&*row.channel_id) {
                ids.push(&row.channel_id);
            }
        }
        ids
    }

    /// Rows belonging to one channel.
    pub fn channel_rows<'a>(&'a self, channel_id: &'a str) -> impl Iterator<Item = &'a MergedRow> {
        self.rows
            .iter()
            .filter(move |r| &*r.channel_id == channel_id)
    }
}
