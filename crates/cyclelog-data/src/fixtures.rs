//! On-disk test folders for the reader tests.

use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::{CAPACITY_LOG, RESTORE_DIR};
use crate::pne::{INDEX_LAST_FILE, INDEX_START_FILE, PNE_COLUMNS};

// ── PNE ───────────────────────────────────────────────────────────────────────

/// Values for the interesting fields of a SaveData row; every other field
/// is written as `0`.
#[derive(Debug, Clone)]
pub struct PneRow {
    pub index: i64,
    pub step: i64,
    pub cycle: i64,
    pub time_day: i64,
    pub time_cs: i64,
    pub voltage_uv: i64,
    pub current_ua: i64,
    pub chg_capacity_uah: i64,
    pub dchg_capacity_uah: i64,
    pub avg_voltage_uv: i64,
    pub temp1: f64,
}

impl Default for PneRow {
    fn default() -> Self {
        Self {
            index: 1,
            step: 1,
            cycle: 1,
            time_day: 0,
            time_cs: 0,
            voltage_uv: 3_700_000,
            current_ua: 0,
            chg_capacity_uah: 0,
            dchg_capacity_uah: 0,
            avg_voltage_uv: 3_700_000,
            temp1: 25.0,
        }
    }
}

/// Render `row` as one tab-separated SaveData line.
pub fn pne_row(row: &PneRow) -> String {
    PNE_COLUMNS
        .iter()
        .map(|name| match *name {
            "index" => row.index.to_string(),
            "step_count" => row.step.to_string(),
            "total_cycle" => row.cycle.to_string(),
            "tot_time_day" => row.time_day.to_string(),
            "tot_time_cs" => row.time_cs.to_string(),
            "voltage_uv" => row.voltage_uv.to_string(),
            "current_ua" => row.current_ua.to_string(),
            "chg_capacity_uah" => row.chg_capacity_uah.to_string(),
            "dchg_capacity_uah" => row.dchg_capacity_uah.to_string(),
            "avg_voltage_uv" => row.avg_voltage_uv.to_string(),
            "temp1" => row.temp1.to_string(),
            "date" => "20250206".to_string(),
            "time" => "101500".to_string(),
            _ => "0".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

/// Write a PNE channel folder under `root`.
///
/// `bounds` is written as the `(first, last)` index files; `end` is the
/// SaveEnd fragment, omitted when `None`.
pub fn write_pne_channel(
    root: &Path,
    name: &str,
    fragments: &[(u32, Vec<String>)],
    bounds: (u32, u32),
    end: Option<Vec<String>>,
) -> PathBuf {
    let restore = root.join(name).join(RESTORE_DIR);
    fs::create_dir_all(&restore).expect("create Restore");
    for (seq, rows) in fragments {
        write_lines(&restore.join(format!("ch_SaveData{seq:04}.csv")), rows);
    }
    if let Some(rows) = end {
        write_lines(&restore.join("ch_SaveEnd.csv"), &rows);
    }
    fs::write(
        restore.join(INDEX_START_FILE),
        format!("fileIndex\tresultIndex\n{}\t0\n", bounds.0),
    )
    .expect("write index start");
    fs::write(
        restore.join(INDEX_LAST_FILE),
        format!("fileIndex\tresultIndex\n{}\t0\n{}\t99\n", bounds.0, bounds.1),
    )
    .expect("write index last");
    root.join(name)
}

// ── Toyo ──────────────────────────────────────────────────────────────────────

pub const TOYO_HEADER: &str =
    "Date,Time,PassTime[Sec],Voltage[V],Current[mA],Temp1[Deg],Condition,Mode,Cycle,TotlCycle";

/// One Toyo raw data row.
#[derive(Debug, Clone)]
pub struct ToyoRow {
    pub time: &'static str,
    pub pass_time: f64,
    pub voltage: f64,
    pub current: f64,
    pub condition: i64,
    pub mode: i64,
    pub cycle: i64,
    pub total_cycle: i64,
}

impl ToyoRow {
    pub fn new(time: &'static str, pass_time: f64, current: f64, condition: i64) -> Self {
        Self {
            time,
            pass_time,
            voltage: 3.8,
            current,
            condition,
            mode: 1,
            cycle: 1,
            total_cycle: 1,
        }
    }

    pub fn line(&self) -> String {
        format!(
            "2025/02/06,{},{:.1},{},{},23.5,{},{},{},{}",
            self.time,
            self.pass_time,
            self.voltage,
            self.current,
            self.condition,
            self.mode,
            self.cycle,
            self.total_cycle
        )
    }
}

/// Render a raw file: a two-line preamble, the header, then `rows`.
pub fn toyo_raw_file(rows: &[ToyoRow]) -> Vec<String> {
    let mut lines = vec![
        "TOYO SYSTEM,TOSCAT-3100".to_string(),
        "Channel,86".to_string(),
        TOYO_HEADER.to_string(),
    ];
    lines.extend(rows.iter().map(ToyoRow::line));
    lines
}

/// One `CAPACITY.LOG` row: `(condition, mode, cycle, total_cycle, cap, finish)`.
pub type LogRow = (i64, i64, i64, i64, f64, &'static str);

pub fn capacity_log(rows: &[LogRow]) -> Vec<String> {
    let mut lines = vec!["Date,Time,Condition,Mode,Cycle,TotlCycle,Cap[mAh],Finish".to_string()];
    lines.extend(rows.iter().map(|(cond, mode, cycle, total, cap, finish)| {
        format!("2025/02/06,10:00:00,{cond},{mode},{cycle},{total},{cap},{finish}")
    }));
    lines
}

/// Write a Toyo channel folder with numbered raw files `000001..`.
pub fn write_toyo_channel(
    root: &Path,
    name: &str,
    raw_files: &[Vec<String>],
    log: Option<Vec<String>>,
) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create channel");
    for (i, lines) in raw_files.iter().enumerate() {
        write_lines(&dir.join(format!("{:06}", i + 1)), lines);
    }
    if let Some(lines) = log {
        write_lines(&dir.join(CAPACITY_LOG), &lines);
    }
    dir
}

pub fn write_lines(path: &Path, lines: &[String]) {
    let mut content = lines.join("\r\n");
    if !lines.is_empty() {
        content.push_str("\r\n");
    }
    fs::write(path, content).expect("write fixture file");
}
