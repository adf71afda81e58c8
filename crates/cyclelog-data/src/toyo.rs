//! Toyo cycler reader.
//!
//! Each channel is a numerically named folder holding one raw file per
//! completed step (`000001`, `000002`, ...) plus `CAPACITY.LOG`, which
//! summarizes every step in one row. Raw files are comma-separated text with
//! a short preamble before the header row and values already in V and mA.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::{
    Anomaly, AuxColumn, CapacityLogRow, CellValue, ChannelDescriptor, ChannelSources,
    ChannelTable, ColumnKind, EquipmentType, Record,
};
use tracing::{debug, info, warn};

use crate::classifier::{is_aux_log, CAPACITY_LOG};
use crate::reader::{
    is_numeric_name, list_children, parse_field, parse_int, resolve_extra_files,
    settle_aux_kinds, ChannelReader, DelimitedRecords, ReadOptions,
};

/// Condition code of a charge step.
pub const CONDITION_CHARGE: i64 = 1;
/// Condition code of a discharge step.
pub const CONDITION_DISCHARGE: i64 = 2;

const DATE_FORMATS: [&str; 2] = ["%Y/%m/%d", "%Y-%m-%d"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M:%S%.f"];

// ── Header resolution ─────────────────────────────────────────────────────────

/// Column positions of a raw file header.
#[derive(Debug)]
struct RawHeader {
    width: usize,
    date: usize,
    time: usize,
    pass_time: usize,
    voltage: usize,
    current: usize,
    condition: usize,
    mode: usize,
    total_cycle: usize,
    temperature: Option<usize>,
    capacity: Option<usize>,
    /// `(position, name)` of every column kept verbatim.
    aux: Vec<(usize, String)>,
}

/// Columns folded into canonical fields and not repeated as auxiliaries.
const CONSUMED: [&str; 9] = [
    "Date",
    "Time",
    "Voltage[V]",
    "Voltage",
    "Current[mA]",
    "Current",
    "Temp1[Deg]",
    "Mode",
    "TotlCycle",
];

fn is_header_line(fields: &[&str]) -> bool {
    fields.contains(&"Date") && fields.iter().any(|f| f.starts_with("Voltage"))
}

impl RawHeader {
    fn resolve(fields: &[&str], path: &Path, line: usize) -> Result<Self> {
        let find = |names: &[&str]| fields.iter().position(|f| names.contains(f));
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line,
                reason: format!("header has no {} column", names[0]),
            })
        };
        let capacity = find(&["Cap[mAh]"]);
        let aux = fields
            .iter()
            .enumerate()
            .filter(|(i, name)| {
                !name.is_empty() && !CONSUMED.contains(*name) && Some(*i) != capacity
            })
            .map(|(i, name)| (i, name.to_string()))
            .collect();
        Ok(Self {
            width: fields.len(),
            date: require(&["Date"])?,
            time: require(&["Time"])?,
            pass_time: require(&["PassTime[Sec]", "PassTime"])?,
            voltage: require(&["Voltage[V]", "Voltage"])?,
            current: require(&["Current[mA]", "Current"])?,
            condition: require(&["Condition"])?,
            mode: require(&["Mode"])?,
            total_cycle: require(&["TotlCycle"])?,
            temperature: find(&["Temp1[Deg]"]),
            capacity,
            aux,
        })
    }
}

/// Parse `date time` with the formats Toyo software writes.
fn parse_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(date.trim(), f).ok())?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(time.trim(), f).ok())?;
    Some(date.and_time(time))
}

// ── Channel state ─────────────────────────────────────────────────────────────

/// Running state carried across the raw files of one channel.
#[derive(Default)]
struct ChannelState {
    start: Option<NaiveDateTime>,
    aux_names: Vec<String>,
    prev_pass_time: Option<f64>,
    prev_abs_current: f64,
    integrated_capacity: f64,
}

impl ChannelState {
    /// Table position of auxiliary column `name`, appending it if new.
    fn aux_slot(&mut self, name: &str) -> usize {
        match self.aux_names.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.aux_names.push(name.to_string());
                self.aux_names.len() - 1
            }
        }
    }

    /// Trapezoidal charge in mAh since the start of the current step.
    fn integrate(&mut self, pass_time: f64, abs_current: f64) -> f64 {
        match self.prev_pass_time {
            Some(prev) if pass_time >= prev => {
                self.integrated_capacity +=
                    (self.prev_abs_current + abs_current) / 2.0 * (pass_time - prev) / 3_600.0;
            }
            _ => self.integrated_capacity = 0.0,
        }
        self.prev_pass_time = Some(pass_time);
        self.prev_abs_current = abs_current;
        self.integrated_capacity
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct ToyoChannelReader {
    equipment: EquipmentType,
    options: ReadOptions,
}

impl ToyoChannelReader {
    pub fn new(equipment: EquipmentType, options: ReadOptions) -> Self {
        Self { equipment, options }
    }

    fn describe_channel(&self, name: &str, dir: &Path) -> Result<Option<ChannelDescriptor>> {
        let mut capacity_log = None;
        let mut raw_files: Vec<(u32, PathBuf)> = Vec::new();
        let mut aux_logs = Vec::new();
        for file in list_children(dir)?.into_iter().filter(|f| !f.is_dir) {
            if file.name == CAPACITY_LOG {
                capacity_log = Some(file.path);
            } else if is_numeric_name(&file.name) {
                match file.name.parse::<u32>() {
                    Ok(n) => raw_files.push((n, file.path)),
                    Err(_) => warn!("Ignoring raw file with oversized number: {}", file.name),
                }
            } else if is_aux_log(&file.name) {
                aux_logs.push(file.path);
            }
        }
        if capacity_log.is_none() && raw_files.is_empty() {
            return Ok(None);
        }
        raw_files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        Ok(Some(ChannelDescriptor {
            id: name.to_string(),
            equipment: self.equipment,
            dir: dir.to_path_buf(),
            sources: ChannelSources::Toyo {
                capacity_log,
                raw_files,
                aux_logs,
            },
        }))
    }

    /// Read one raw file, appending its rows to `records`.
    ///
    /// Returns the number of rows read and the `TotlCycle` of the last one.
    fn read_raw_file(
        &self,
        path: &Path,
        state: &mut ChannelState,
        records: &mut Vec<Record>,
    ) -> Result<(usize, Option<i64>)> {
        let mut header: Option<(RawHeader, Vec<usize>)> = None;
        let mut count = 0;
        let mut last_cycle = None;
        let mut last_line = 0;

        for item in DelimitedRecords::open(path, b',')? {
            let (line_no, row) = item?;
            last_line = line_no;
            let fields: Vec<&str> = row.iter().collect();

            if header.is_none() {
                if is_header_line(&fields) {
                    let resolved = RawHeader::resolve(&fields, path, line_no)?;
                    let slots = resolved
                        .aux
                        .iter()
                        .map(|(_, name)| state.aux_slot(name))
                        .collect();
                    header = Some((resolved, slots));
                }
                continue;
            }
            let Some((cols, slots)) = &header else {
                continue;
            };

            let record = self.parse_row(&fields, cols, slots, state, path, line_no)?;
            last_cycle = Some(record.cycle);
            records.push(record);
            count += 1;
        }

        if header.is_none() && last_line > 0 {
            return Err(CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line: last_line,
                reason: "no header row with Date and Voltage columns".to_string(),
            });
        }
        debug!("Read {} rows from {}", count, path.display());
        Ok((count, last_cycle))
    }

    fn parse_row(
        &self,
        fields: &[&str],
        cols: &RawHeader,
        slots: &[usize],
        state: &mut ChannelState,
        path: &Path,
        line: usize,
    ) -> Result<Record> {
        // Trailing commas produce empty extra fields; anything else is a
        // width mismatch.
        let extra_empty = fields.len() > cols.width && fields[cols.width..].iter().all(|f| f.is_empty());
        if fields.len() != cols.width && !extra_empty {
            return Err(CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line,
                reason: format!("expected {} fields, found {}", cols.width, fields.len()),
            });
        }

        let at = parse_datetime(fields[cols.date], fields[cols.time]).ok_or_else(|| {
            CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line,
                reason: format!(
                    "unparseable date/time {:?} {:?}",
                    fields[cols.date], fields[cols.time]
                ),
            }
        })?;
        let start = *state.start.get_or_insert(at);

        let pass_time = parse_field::<f64>(fields[cols.pass_time], "PassTime[Sec]", path, line)?;
        let voltage = parse_field::<f64>(fields[cols.voltage], "Voltage", path, line)?;
        let raw_current = parse_field::<f64>(fields[cols.current], "Current", path, line)?;
        let condition = parse_int(fields[cols.condition], "Condition", path, line)?;
        let current = match condition {
            CONDITION_CHARGE => raw_current.abs(),
            CONDITION_DISCHARGE => -raw_current.abs(),
            _ => raw_current,
        };

        let integrated = state.integrate(pass_time, raw_current.abs());
        let capacity = match cols.capacity {
            Some(i) => parse_field::<f64>(fields[i], "Cap[mAh]", path, line)?,
            None => integrated,
        };
        let temperature = match cols.temperature.map(|i| fields[i]) {
            Some(raw) if !raw.is_empty() => {
                Some(parse_field::<f64>(raw, "Temp1[Deg]", path, line)?)
            }
            _ => None,
        };

        let mut aux = vec![CellValue::Null; state.aux_names.len()];
        for ((i, _), slot) in cols.aux.iter().zip(slots) {
            aux[*slot] = CellValue::parse(fields[*i]);
        }

        Ok(Record {
            timestamp: (at - start).num_milliseconds() as f64 / 1_000.0,
            voltage,
            current,
            capacity,
            step: parse_int(fields[cols.mode], "Mode", path, line)?,
            cycle: parse_int(fields[cols.total_cycle], "TotlCycle", path, line)?,
            temperature,
            aux,
        })
    }
}

impl ChannelReader for ToyoChannelReader {
    fn equipment(&self) -> EquipmentType {
        self.equipment
    }

    fn discover_channels(&self, root: &Path) -> Result<Vec<ChannelDescriptor>> {
        let mut dirs: Vec<(u64, String, PathBuf)> = list_children(root)?
            .into_iter()
            .filter(|c| c.is_dir && is_numeric_name(&c.name))
            .filter_map(|c| c.name.parse::<u64>().ok().map(|n| (n, c.name, c.path)))
            .collect();
        dirs.sort();

        let mut channels = Vec::new();
        for (_, name, dir) in dirs {
            match self.describe_channel(&name, &dir)? {
                Some(channel) => {
                    debug!(
                        "Discovered {} channel {} with {} raw files",
                        self.equipment,
                        channel.id,
                        channel.fragment_count()
                    );
                    channels.push(channel);
                }
                None => debug!("Skipping empty numeric folder {}", dir.display()),
            }
        }
        Ok(channels)
    }

    fn load_channel(&self, channel: &ChannelDescriptor) -> Result<ChannelTable> {
        let ChannelSources::Toyo {
            capacity_log,
            raw_files,
            aux_logs,
        } = &channel.sources
        else {
            return Err(CyclerError::Config(format!(
                "channel {} is not a Toyo channel",
                channel.id
            )));
        };
        let id = channel.id.as_str();

        let summary = match capacity_log {
            Some(path) => read_capacity_log(path)?,
            None => {
                warn!("Channel {id}: no {CAPACITY_LOG}, raw files are not cross-checked");
                Vec::new()
            }
        };
        for log in aux_logs {
            debug!("Channel {id}: auxiliary log {} is not parsed", log.display());
        }
        let found = raw_files.len();
        let declared = if capacity_log.is_some() {
            summary.len()
        } else {
            found
        };

        if let Some(pos) = raw_files
            .iter()
            .enumerate()
            .position(|(i, (n, _))| *n as usize != i + 1)
        {
            return Err(CyclerError::IncompleteChannel {
                channel: id.to_string(),
                expected: declared.max(found),
                found,
                missing: pos as u32 + 1,
            });
        }
        if declared > found {
            return Err(CyclerError::IncompleteChannel {
                channel: id.to_string(),
                expected: declared,
                found,
                missing: found as u32 + 1,
            });
        }

        let mut table = ChannelTable::new(channel.clone(), Vec::new());
        table.summary = summary;
        let mut plan = raw_files.as_slice();
        if found > declared {
            let (load, anomaly) =
                resolve_extra_files(self.options.extra_files, id, declared, found)?;
            table.anomalies.push(anomaly);
            if !load {
                plan = &raw_files[..declared];
            }
        }

        let mut state = ChannelState::default();
        for (number, path) in plan {
            self.options.check_cancelled(id)?;
            let (count, last_cycle) = self.read_raw_file(path, &mut state, &mut table.records)?;
            if count == 0 {
                table.anomalies.push(Anomaly::EmptyFragment {
                    channel: id.to_string(),
                    file: format!("{number:06}"),
                });
            }
            let expected = table.summary.get(*number as usize - 1);
            if let (Some(row), Some(found_cycle)) = (expected, last_cycle) {
                if row.total_cycle != found_cycle {
                    let anomaly = Anomaly::SummaryMismatch {
                        channel: id.to_string(),
                        file: *number,
                        expected_cycle: row.total_cycle,
                        found_cycle,
                    };
                    warn!("{anomaly}");
                    table.anomalies.push(anomaly);
                }
            }
        }

        // Columns first seen in later files are absent from earlier rows.
        let width = state.aux_names.len();
        for record in &mut table.records {
            record.aux.resize(width, CellValue::Null);
        }
        table.aux_columns = state
            .aux_names
            .into_iter()
            .map(|name| AuxColumn::new(name, ColumnKind::Int))
            .collect();
        settle_aux_kinds(&mut table.aux_columns, &mut table.records);

        info!(
            "Loaded {} rows from {} raw files for {} channel {}",
            table.len(),
            plan.len(),
            self.equipment,
            id
        );
        Ok(table)
    }
}

// ── CAPACITY.LOG ──────────────────────────────────────────────────────────────

/// Parse a Toyo `CAPACITY.LOG`; one [`CapacityLogRow`] per completed step.
pub fn read_capacity_log(path: &Path) -> Result<Vec<CapacityLogRow>> {
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for item in DelimitedRecords::open(path, b',')? {
        let (line_no, row) = item?;
        let fields: Vec<&str> = row.iter().collect();
        if header.is_none() {
            header = Some(fields.iter().map(|f| f.to_string()).collect());
            continue;
        }
        let Some(names) = &header else {
            continue;
        };
        let values: Vec<&str> = fields.iter().take(names.len()).copied().collect();
        if values.len() != names.len() {
            return Err(CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("expected {} fields, found {}", names.len(), fields.len()),
            });
        }

        let by_name: HashMap<&str, &str> = names
            .iter()
            .map(String::as_str)
            .zip(values.iter().copied())
            .collect();
        let int = |name: &str| -> Result<i64> {
            let raw = by_name.get(name).ok_or_else(|| CyclerError::MalformedRecord {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("capacity log has no {name} column"),
            })?;
            parse_int(raw, name, path, line_no)
        };
        let capacity_mah = match by_name.get("Cap[mAh]") {
            Some(raw) if !raw.is_empty() => parse_field::<f64>(raw, "Cap[mAh]", path, line_no)?,
            _ => 0.0,
        };

        rows.push(CapacityLogRow {
            index: rows.len() as u32 + 1,
            condition: int("Condition")?,
            mode: int("Mode")?,
            cycle: int("Cycle")?,
            total_cycle: int("TotlCycle")?,
            capacity_mah,
            finish: by_name.get("Finish").unwrap_or(&"").to_string(),
            fields: names
                .iter()
                .zip(&values)
                .map(|(n, v)| (n.clone(), CellValue::parse(v)))
                .collect(),
        });
    }
    debug!("Read {} capacity log rows from {}", rows.len(), path.display());
    Ok(rows)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
