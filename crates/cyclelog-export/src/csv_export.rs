//! CSV output of a processing run.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::format_capacity;
use cyclelog_data::labeling::{CapacityLabel, CapacityLabeler, StepSample, CONDITION_COLUMN};
use cyclelog_data::summary::DatasetSummary;
use cyclelog_runtime::processor::{ChannelMeta, ProcessingResult};
use tracing::{debug, info};

use crate::report::write_summary_report;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Columns appended to each capacity-log row by the labeler.
const LABEL_COLUMNS: [&str; 6] = [
    "computed_cycle",
    "pattern",
    "step",
    "c_rate",
    "cutoff_voltage",
    "cutoff_current",
];

/// Columns appended to each raw row of a Toyo channel.
const RAW_LABEL_COLUMNS: [&str; 3] = ["c_rate", "pattern", "step"];

// ── TableSink ─────────────────────────────────────────────────────────────────

/// Destination for a finished run.
pub trait TableSink {
    /// Write `result` and return the paths of every file produced.
    fn write_dataset(&mut self, result: &ProcessingResult) -> Result<Vec<PathBuf>>;
}

// ── CsvExporter ───────────────────────────────────────────────────────────────

/// Writes UTF-8 (with BOM) CSV files into one output directory.
///
/// All files of a run share a base name built from the battery, the
/// equipment and the export timestamp.
pub struct CsvExporter {
    output_dir: PathBuf,
    timestamp: NaiveDateTime,
    separate_channels: bool,
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_timestamp(output_dir, Local::now().naive_local())
    }

    /// Exporter with a fixed timestamp, so output names are reproducible.
    pub fn with_timestamp(output_dir: impl Into<PathBuf>, timestamp: NaiveDateTime) -> Self {
        Self {
            output_dir: output_dir.into(),
            timestamp,
            separate_channels: false,
        }
    }

    /// Also write `<base>_<channel>_raw_data.csv` for every channel.
    pub fn with_separate_channels(mut self, enabled: bool) -> Self {
        self.separate_channels = enabled;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `manufacturer_model_<cap>mAh_<EQUIP>_<yyyymmdd_HHMMSS>`
    pub fn base_name(&self, result: &ProcessingResult) -> String {
        let battery = &result.battery;
        format!(
            "{}_{}_{}mAh_{}_{}",
            battery.manufacturer,
            battery.model,
            format_capacity(battery.capacity_mah),
            result.equipment,
            self.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    fn write_merged(&self, path: &Path, result: &ProcessingResult) -> Result<()> {
        let dataset = &result.dataset;
        let battery = result.battery.fields();
        let mut writer = open_csv(path)?;

        let mut header = dataset.column_names();
        header.extend(battery.iter().map(|(key, _)| format!("battery_{key}")));
        writer.write_record(&header).map_err(|e| csv_error(path, e))?;

        for row in &dataset.rows {
            let mut record: Vec<String> =
                dataset.row_values(row).iter().map(|c| c.to_field()).collect();
            record.extend(battery.iter().map(|(_, value)| value.clone()));
            writer.write_record(&record).map_err(|e| csv_error(path, e))?;
        }
        writer
            .flush()
            .map_err(|e| CyclerError::file_read(path, e))?;
        debug!("Wrote {} rows to {}", dataset.len(), path.display());
        Ok(())
    }

    /// Capacity log of one Toyo channel with label columns appended.
    fn write_capacity_log(
        &self,
        path: &Path,
        meta: &ChannelMeta,
        labels: &[CapacityLabel],
    ) -> Result<()> {
        let mut writer = open_csv(path)?;
        let mut header: Vec<String> = meta
            .summary
            .first()
            .map(|row| row.fields.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();
        header.extend(LABEL_COLUMNS.iter().map(|c| c.to_string()));
        writer.write_record(&header).map_err(|e| csv_error(path, e))?;

        for (row, label) in meta.summary.iter().zip(labels) {
            let mut record: Vec<String> = row.fields.iter().map(|(_, v)| v.to_field()).collect();
            record.extend([
                label.computed_cycle.to_string(),
                label.pattern.to_string(),
                label.step.to_string(),
                optional(label.c_rate),
                optional(label.cutoff_voltage),
                optional(label.cutoff_current),
            ]);
            writer.write_record(&record).map_err(|e| csv_error(path, e))?;
        }
        writer
            .flush()
            .map_err(|e| CyclerError::file_read(path, e))?;
        debug!(
            "Wrote {} labelled capacity rows to {}",
            labels.len(),
            path.display()
        );
        Ok(())
    }

    /// Rows of one channel. Toyo rows carry their C-rate, pattern and step
    /// when `labels` is given.
    fn write_channel_rows(
        &self,
        path: &Path,
        result: &ProcessingResult,
        meta: &ChannelMeta,
        labels: Option<&[CapacityLabel]>,
    ) -> Result<()> {
        let dataset = &result.dataset;
        let raw_labels = labels.map(|labels| {
            let slot = dataset.aux_index(CONDITION_COLUMN);
            let samples = dataset
                .channel_rows(&meta.channel_id)
                .map(|row| StepSample::from_row(row, slot));
            CapacityLabeler::new(result.battery.capacity_mah).label_raw(
                &meta.summary,
                labels,
                samples,
            )
        });

        let mut writer = open_csv(path)?;
        let mut header = dataset.column_names();
        if raw_labels.is_some() {
            header.extend(RAW_LABEL_COLUMNS.iter().map(|c| c.to_string()));
        }
        writer.write_record(&header).map_err(|e| csv_error(path, e))?;

        let mut count = 0;
        for (i, row) in dataset.channel_rows(&meta.channel_id).enumerate() {
            let mut record: Vec<String> =
                dataset.row_values(row).iter().map(|c| c.to_field()).collect();
            if let Some(label) = raw_labels.as_ref().and_then(|l| l.get(i)) {
                record.extend([
                    label.c_rate.to_string(),
                    label.pattern.map(|p| p.to_string()).unwrap_or_default(),
                    label.step.unwrap_or_default().to_string(),
                ]);
            }
            writer.write_record(&record).map_err(|e| csv_error(path, e))?;
            count += 1;
        }
        writer
            .flush()
            .map_err(|e| CyclerError::file_read(path, e))?;
        debug!("Wrote {count} rows of channel {} to {}", meta.channel_id, path.display());
        Ok(())
    }
}

/// Capacity-log labels of one Toyo channel.
fn capacity_labels(result: &ProcessingResult, meta: &ChannelMeta) -> Vec<CapacityLabel> {
    let dataset = &result.dataset;
    let slot = dataset.aux_index(CONDITION_COLUMN);
    let samples = dataset
        .channel_rows(&meta.channel_id)
        .map(|row| StepSample::from_row(row, slot));
    CapacityLabeler::new(result.battery.capacity_mah).label(&meta.summary, samples)
}

impl TableSink for CsvExporter {
    fn write_dataset(&mut self, result: &ProcessingResult) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| CyclerError::file_read(&self.output_dir, e))?;
        let base = self.base_name(result);
        let mut exported = Vec::new();

        let merged = self.output_dir.join(format!("{base}_merged.csv"));
        self.write_merged(&merged, result)?;
        exported.push(merged);

        for meta in &result.tables_meta {
            let labels = (result.equipment.is_toyo() && !meta.summary.is_empty())
                .then(|| capacity_labels(result, meta));
            if let Some(labels) = &labels {
                let path = self
                    .output_dir
                    .join(format!("{base}_{}_capacity_log.csv", meta.channel_id));
                self.write_capacity_log(&path, meta, labels)?;
                exported.push(path);
            }
            if self.separate_channels {
                let path = self
                    .output_dir
                    .join(format!("{base}_{}_raw_data.csv", meta.channel_id));
                self.write_channel_rows(&path, result, meta, labels.as_deref())?;
                exported.push(path);
            }
        }

        let summary = DatasetSummary::from_dataset(&result.dataset);
        let report = self.output_dir.join(format!("{base}_summary.txt"));
        write_summary_report(&report, result, &summary, &exported, self.timestamp)?;
        exported.push(report);

        info!(
            "Exported {} files to {}",
            exported.len(),
            self.output_dir.display()
        );
        Ok(exported)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open_csv(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let mut file = BufWriter::new(File::create(path).map_err(|e| CyclerError::file_read(path, e))?);
    file.write_all(UTF8_BOM)
        .map_err(|e| CyclerError::file_read(path, e))?;
    Ok(csv::Writer::from_writer(file))
}

fn csv_error(path: &Path, err: csv::Error) -> CyclerError {
    CyclerError::file_read(path, err.into())
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
