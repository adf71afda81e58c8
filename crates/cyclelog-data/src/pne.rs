//! PNE cycler reader.
//!
//! A PNE test folder holds one `M<module>Ch<channel>[...]` directory per
//! channel. Each channel's `Restore/` directory contains the data split into
//! numbered `*SaveData<N>.csv` fragments, a terminal `*SaveEnd*.csv`, and two
//! index files that bound the valid fragment numbers. Fragments are headerless
//! and tab-separated with a fixed 46-column layout in micro-units.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::{
    Anomaly, AuxColumn, CellValue, ChannelDescriptor, ChannelSources, ChannelTable, ColumnKind,
    EquipmentType, Record,
};
use cyclelog_core::units::{canonical_column_name, to_canonical, Unit};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::classifier::{pne_channel_pattern, RESTORE_DIR};
use crate::reader::{
    list_children, parse_field, parse_int, resolve_extra_files, settle_aux_kinds, ChannelReader,
    DelimitedRecords, ReadOptions, Utf8Lines,
};

pub const INDEX_START_FILE: &str = "savingFileIndex_start.csv";
pub const INDEX_LAST_FILE: &str = "savingFileIndex_last.csv";

/// Column names of a SaveData row, in file order.
pub const PNE_COLUMNS: [&str; 46] = [
    "index",
    "default",
    "step_type",
    "chg_dchg",
    "current_app_class",
    "cccv",
    "end_state",
    "step_count",
    "voltage_uv",
    "current_ua",
    "chg_capacity_uah",
    "dchg_capacity_uah",
    "chg_power_mw",
    "dchg_power_mw",
    "chg_wh",
    "dchg_wh",
    "repeat_pattern_count",
    "step_time_cs",
    "tot_time_day",
    "tot_time_cs",
    "impedance",
    "temp1",
    "temp2",
    "temp3",
    "temp4",
    "unknown25",
    "repeat_count",
    "total_cycle",
    "current_cycle",
    "avg_voltage_uv",
    "avg_current_ua",
    "col31",
    "col32",
    "date",
    "time",
    "col35",
    "col36",
    "col37",
    "col38",
    "col39",
    "col40",
    "col41",
    "col42",
    "cumulative_step",
    "voltage_max_uv",
    "voltage_min_uv",
];

const STEP_COUNT: usize = 7;
const VOLTAGE_UV: usize = 8;
const CURRENT_UA: usize = 9;
const CHG_CAPACITY_UAH: usize = 10;
const DCHG_CAPACITY_UAH: usize = 11;
const TOT_TIME_DAY: usize = 18;
const TOT_TIME_CS: usize = 19;
const TEMP1: usize = 21;
const TOTAL_CYCLE: usize = 27;

/// Fields folded entirely into canonical columns.
const CONSUMED: [usize; 7] = [
    STEP_COUNT,
    VOLTAGE_UV,
    CURRENT_UA,
    TOT_TIME_DAY,
    TOT_TIME_CS,
    TEMP1,
    TOTAL_CYCLE,
];

const SECONDS_PER_DAY: f64 = 86_400.0;
const CENTISECONDS_PER_SECOND: f64 = 100.0;

fn fragment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"SaveData(\d+)\.csv$").expect("regex is valid"))
}

/// Unit of a micro-unit column, judged by its name suffix.
fn native_unit(name: &str) -> Option<Unit> {
    if name.ends_with("_uah") {
        Some(Unit::MicroAmpHour)
    } else if name.ends_with("_uv") {
        Some(Unit::MicroVolt)
    } else if name.ends_with("_ua") {
        Some(Unit::MicroAmp)
    } else {
        None
    }
}

/// Where an auxiliary column comes from and how it is converted.
#[derive(Debug, Clone)]
struct AuxField {
    index: usize,
    unit: Option<Unit>,
    column: AuxColumn,
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct PneChannelReader {
    options: ReadOptions,
    aux_fields: Vec<AuxField>,
}

impl PneChannelReader {
    pub fn new(options: ReadOptions) -> Self {
        let aux_fields = PNE_COLUMNS
            .iter()
            .enumerate()
            .filter(|(i, _)| !CONSUMED.contains(i))
            .map(|(index, name)| {
                let unit = native_unit(name);
                let column = match unit {
                    Some(u) => AuxColumn::new(canonical_column_name(name, u), ColumnKind::Float),
                    None => AuxColumn::new(*name, ColumnKind::Int),
                };
                AuxField {
                    index,
                    unit,
                    column,
                }
            })
            .collect();
        Self {
            options,
            aux_fields,
        }
    }

    /// Auxiliary columns in output order, before kinds are settled.
    pub fn aux_columns(&self) -> Vec<AuxColumn> {
        self.aux_fields.iter().map(|f| f.column.clone()).collect()
    }

    fn describe_channel(&self, name: &str, dir: &Path) -> Result<Option<ChannelDescriptor>> {
        let restore_dir = dir.join(RESTORE_DIR);
        if !restore_dir.is_dir() {
            return Ok(None);
        }

        let mut fragments: Vec<(u32, PathBuf)> = Vec::new();
        let mut end_fragment = None;
        for file in list_children(&restore_dir)?.into_iter().filter(|f| !f.is_dir) {
            if let Some(caps) = fragment_pattern().captures(&file.name) {
                match caps[1].parse::<u32>() {
                    Ok(seq) => fragments.push((seq, file.path)),
                    Err(_) => warn!("Ignoring fragment with oversized number: {}", file.name),
                }
            } else if file.name.contains("SaveEnd") && file.name.ends_with(".csv") {
                if end_fragment.is_some() {
                    warn!("Channel {name}: several SaveEnd fragments, using {}", file.name);
                }
                end_fragment = Some(file.path);
            }
        }
        // Listing order is lexical; the embedded number decides.
        fragments.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        fragments.dedup_by(|later, first| {
            let dup = later.0 == first.0;
            if dup {
                warn!(
                    "Channel {name}: duplicate fragment #{}, ignoring {}",
                    later.0,
                    later.1.display()
                );
            }
            dup
        });

        Ok(Some(ChannelDescriptor {
            id: name.to_string(),
            equipment: EquipmentType::Pne,
            dir: dir.to_path_buf(),
            sources: ChannelSources::Pne {
                index_start: restore_dir.join(INDEX_START_FILE),
                index_last: restore_dir.join(INDEX_LAST_FILE),
                restore_dir,
                fragments,
                end_fragment,
            },
        }))
    }

    /// Read one fragment, appending its rows to `records`.
    fn read_fragment(&self, path: &Path, records: &mut Vec<Record>) -> Result<usize> {
        let before = records.len();
        for item in DelimitedRecords::open(path, b'\t')? {
            let (line_no, row) = item?;
            let fields: Vec<&str> = row.iter().collect();
            records.push(self.parse_row(&fields, path, line_no)?);
        }
        let count = records.len() - before;
        debug!("Read {} rows from {}", count, path.display());
        Ok(count)
    }

    fn parse_row(&self, fields: &[&str], path: &Path, line_no: usize) -> Result<Record> {
        if fields.len() != PNE_COLUMNS.len() {
            return Err(CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!(
                    "expected {} tab-separated fields, found {}",
                    PNE_COLUMNS.len(),
                    fields.len()
                ),
            });
        }
        let num = |i: usize| parse_field::<f64>(fields[i], PNE_COLUMNS[i], path, line_no);
        let int = |i: usize| parse_int(fields[i], PNE_COLUMNS[i], path, line_no);

        let temperature = match fields[TEMP1].trim() {
            "" => None,
            _ => Some(num(TEMP1)?),
        };
        let aux = self
            .aux_fields
            .iter()
            .map(|f| match (CellValue::parse(fields[f.index]), f.unit) {
                (cell, Some(unit)) => match cell.as_f64() {
                    Some(v) => CellValue::Float(to_canonical(v, unit)),
                    None => cell,
                },
                (cell, None) => cell,
            })
            .collect();

        Ok(Record {
            timestamp: num(TOT_TIME_DAY)? * SECONDS_PER_DAY
                + num(TOT_TIME_CS)? / CENTISECONDS_PER_SECOND,
            voltage: to_canonical(num(VOLTAGE_UV)?, Unit::MicroVolt),
            current: to_canonical(num(CURRENT_UA)?, Unit::MicroAmp),
            capacity: to_canonical(
                num(CHG_CAPACITY_UAH)? + num(DCHG_CAPACITY_UAH)?,
                Unit::MicroAmpHour,
            ),
            step: int(STEP_COUNT)?,
            cycle: int(TOTAL_CYCLE)?,
            temperature,
            aux,
        })
    }
}

impl ChannelReader for PneChannelReader {
    fn equipment(&self) -> EquipmentType {
        EquipmentType::Pne
    }

    fn discover_channels(&self, root: &Path) -> Result<Vec<ChannelDescriptor>> {
        let mut channels = Vec::new();
        for child in list_children(root)?.into_iter().filter(|c| c.is_dir) {
            if !pne_channel_pattern().is_match(&child.name) {
                continue;
            }
            if let Some(channel) = self.describe_channel(&child.name, &child.path)? {
                debug!(
                    "Discovered PNE channel {} with {} fragments",
                    channel.id,
                    channel.fragment_count()
                );
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    fn load_channel(&self, channel: &ChannelDescriptor) -> Result<ChannelTable> {
        let ChannelSources::Pne {
            index_start,
            index_last,
            fragments,
            end_fragment,
            ..
        } = &channel.sources
        else {
            return Err(CyclerError::Config(format!(
                "channel {} is not a PNE channel",
                channel.id
            )));
        };
        let id = channel.id.as_str();

        let first = read_index_bound(id, index_start, Bound::First)?;
        let last = read_index_bound(id, index_last, Bound::Last)?;
        if last < first {
            return Err(CyclerError::IndexBounds {
                channel: id.to_string(),
                path: index_last.clone(),
                reason: format!("last fragment #{last} precedes first #{first}"),
            });
        }

        let present: BTreeSet<u32> = fragments.iter().map(|(seq, _)| *seq).collect();
        if let Some(sequence) = (first..=last).find(|seq| !present.contains(seq)) {
            return Err(CyclerError::MissingFragment {
                channel: id.to_string(),
                sequence,
            });
        }

        let mut table = ChannelTable::new(channel.clone(), self.aux_columns());

        let stale = fragments.iter().filter(|(seq, _)| *seq < first).count();
        if stale > 0 {
            warn!("Channel {id}: ignoring {stale} fragments numbered before #{first}");
        }
        let declared = (last - first + 1) as usize;
        let extras = fragments.iter().filter(|(seq, _)| *seq > last).count();
        let load_extras = if extras > 0 {
            let (load, anomaly) =
                resolve_extra_files(self.options.extra_files, id, declared, declared + extras)?;
            table.anomalies.push(anomaly);
            load
        } else {
            false
        };

        let mut plan: Vec<&Path> = fragments
            .iter()
            .filter(|(seq, _)| *seq >= first && (*seq <= last || load_extras))
            .map(|(_, path)| path.as_path())
            .collect();
        match end_fragment {
            Some(path) => plan.push(path),
            None => {
                let anomaly = Anomaly::MissingEndFragment {
                    channel: id.to_string(),
                };
                warn!("{anomaly}");
                table.anomalies.push(anomaly);
            }
        }

        for path in &plan {
            self.options.check_cancelled(id)?;
            let count = self.read_fragment(path, &mut table.records)?;
            // SaveEnd only holds whatever was buffered when the test stopped.
            let is_end = end_fragment.as_deref() == Some(*path);
            if count == 0 && !is_end {
                table.anomalies.push(Anomaly::EmptyFragment {
                    channel: id.to_string(),
                    file: file_name(path),
                });
            }
        }
        settle_aux_kinds(&mut table.aux_columns, &mut table.records);

        info!(
            "Loaded {} rows from {} fragments for PNE channel {}",
            table.len(),
            plan.len(),
            id
        );
        Ok(table)
    }
}

// ── Index bounds ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    First,
    Last,
}

/// Read the fragment number declared by an index file.
///
/// Rows are split on tabs, commas or whitespace; rows without an integer
/// field (headers) are skipped. `First` takes the first data row, `Last` the
/// final one, and in both cases the row's first integer field.
fn read_index_bound(channel: &str, path: &Path, bound: Bound) -> Result<u32> {
    let fail = |reason: String| CyclerError::IndexBounds {
        channel: channel.to_string(),
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_file() {
        return Err(fail("file not found".to_string()));
    }

    let mut found = None;
    for item in Utf8Lines::open(path)? {
        let (_, line) = item?;
        let value = line
            .split(|c: char| c == '\t' || c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .find_map(|t| t.parse::<u32>().ok());
        if let Some(v) = value {
            found = Some(v);
            if bound == Bound::First {
                break;
            }
        }
    }
    found.ok_or_else(|| fail("no row with an integer fragment number".to_string()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
