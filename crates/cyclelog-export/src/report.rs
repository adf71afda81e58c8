//! Plain-text processing summary written next to the CSV files.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::formatting::{format_duration, format_number, percentage};
use cyclelog_data::summary::DatasetSummary;
use cyclelog_runtime::processor::ProcessingResult;

const RULE_WIDTH: usize = 50;

/// Render the report body.
pub fn render_summary_report(
    result: &ProcessingResult,
    summary: &DatasetSummary,
    exported: &[PathBuf],
    generated_at: NaiveDateTime,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, result, summary, exported, generated_at);
    out
}

fn write_report(
    out: &mut String,
    result: &ProcessingResult,
    summary: &DatasetSummary,
    exported: &[PathBuf],
    generated_at: NaiveDateTime,
) -> std::fmt::Result {
    writeln!(out, "Battery Test Data Processing Summary")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out)?;

    writeln!(out, "Battery Information:")?;
    for (key, value) in result.battery.fields() {
        writeln!(out, "  {key}: {value}")?;
    }
    writeln!(out)?;
    writeln!(out, "Equipment Type: {}", result.equipment)?;
    writeln!(out, "Data Path: {}", result.data_path.display())?;
    writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(
        out,
        "Processing Time: {:.2}s",
        result.elapsed.as_secs_f64()
    )?;
    writeln!(out)?;

    writeln!(out, "Channels Processed:")?;
    let loaded: usize = result.tables_meta.iter().map(|m| m.rows).sum();
    for meta in &result.tables_meta {
        write!(
            out,
            "  {}: {} rows ({:.1}%) from {} files",
            meta.channel_id,
            format_number(meta.rows as f64, 0),
            percentage(meta.rows as f64, loaded as f64, 1),
            meta.fragments
        )?;
        if !meta.summary.is_empty() {
            write!(out, ", {} capacity log rows", meta.summary.len())?;
        }
        if !meta.aux_logs.is_empty() {
            write!(out, ", auxiliary logs: {}", meta.aux_logs.join(", "))?;
        }
        writeln!(out)?;
    }
    writeln!(
        out,
        "\nMerged Data: {} total rows, {} auxiliary columns",
        format_number(summary.total_rows as f64, 0),
        summary.aux_columns
    )?;

    writeln!(out, "\nStatistics:")?;
    for channel in &summary.channels {
        writeln!(
            out,
            "  {}: max cycle {}, duration {}",
            channel.channel_id,
            channel.max_cycle,
            format_duration(channel.duration_s)
        )?;
    }
    if let (Some(lo), Some(hi)) = (summary.voltage_min, summary.voltage_max) {
        writeln!(out, "  Voltage range: {lo:.4} V to {hi:.4} V")?;
    }
    if let Some(d) = &summary.discharge {
        writeln!(
            out,
            "  Discharge capacity over {} steps: max {} mAh, min {} mAh, mean {} mAh",
            d.steps,
            format_number(d.max_mah, 2),
            format_number(d.min_mah, 2),
            format_number(d.mean_mah, 2)
        )?;
    }

    writeln!(out, "\nAnomalies:")?;
    if result.anomalies.is_empty() {
        writeln!(out, "  none")?;
    }
    for anomaly in &result.anomalies {
        writeln!(out, "  - {anomaly}")?;
    }

    writeln!(out, "\nExported Files:")?;
    for path in exported {
        writeln!(out, "  - {}", path.display())?;
    }
    Ok(())
}

/// Write the report to `path`.
pub fn write_summary_report(
    path: &Path,
    result: &ProcessingResult,
    summary: &DatasetSummary,
    exported: &[PathBuf],
    generated_at: NaiveDateTime,
) -> Result<PathBuf> {
    let body = render_summary_report(result, summary, exported, generated_at);
    fs::write(path, body).map_err(|e| CyclerError::file_read(path, e))?;
    Ok(path.to_path_buf())
}
