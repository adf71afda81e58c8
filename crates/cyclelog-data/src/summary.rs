//! Descriptive statistics over a merged dataset.

use serde::Serialize;

use cyclelog_core::models::{EquipmentType, MergedDataset, MergedRow};

// ── ChannelStats ──────────────────────────────────────────────────────────────

/// Per-channel figures, in dataset order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub channel_id: String,
    pub equipment: EquipmentType,
    pub rows: usize,
    pub max_cycle: i64,
    /// Seconds between the first and last record.
    pub duration_s: f64,
}

impl ChannelStats {
    fn new(row: &MergedRow) -> Self {
        Self {
            channel_id: row.channel_id.to_string(),
            equipment: row.source_equipment,
            rows: 0,
            max_cycle: row.cycle,
            duration_s: 0.0,
        }
    }
}

// ── DischargeStats ────────────────────────────────────────────────────────────

/// Capacity reached by each discharge step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DischargeStats {
    /// Number of discharge steps seen.
    pub steps: usize,
    pub max_mah: f64,
    pub min_mah: f64,
    pub mean_mah: f64,
}

/// Peak capacity of every contiguous run of discharging rows that share a
/// channel, cycle and step.
fn discharge_peaks(rows: &[MergedRow]) -> Vec<f64> {
    let mut peaks = Vec::new();
    let mut current: Option<(&str, i64, i64, f64)> = None;
    for row in rows {
        if row.current >= 0.0 {
            if let Some((_, _, _, peak)) = current.take() {
                peaks.push(peak);
            }
            continue;
        }
        let key = (&*row.channel_id, row.cycle, row.step);
        match &mut current {
            Some((ch, cycle, step, peak)) if (*ch, *cycle, *step) == key => {
                *peak = peak.max(row.capacity);
            }
            open => {
                if let Some((_, _, _, peak)) = open.take() {
                    peaks.push(peak);
                }
                *open = Some((key.0, key.1, key.2, row.capacity));
            }
        }
    }
    if let Some((_, _, _, peak)) = current {
        peaks.push(peak);
    }
    peaks
}

// ── DatasetSummary ────────────────────────────────────────────────────────────

/// Totals and ranges reported after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub total_rows: usize,
    pub aux_columns: usize,
    pub channels: Vec<ChannelStats>,
    pub max_cycle: Option<i64>,
    pub voltage_min: Option<f64>,
    pub voltage_max: Option<f64>,
    pub discharge: Option<DischargeStats>,
}

impl DatasetSummary {
    pub fn from_dataset(dataset: &MergedDataset) -> Self {
        let mut channels: Vec<ChannelStats> = Vec::new();
        let mut first_ts = 0.0;
        let mut voltage: Option<(f64, f64)> = None;

        for row in &dataset.rows {
            let same_channel = channels
                .last()
                .is_some_and(|c| c.channel_id.as_str() == &*row.channel_id);
            if !same_channel {
                channels.push(ChannelStats::new(row));
                first_ts = row.timestamp;
            }
            if let Some(stats) = channels.last_mut() {
                stats.rows += 1;
                stats.max_cycle = stats.max_cycle.max(row.cycle);
                stats.duration_s = row.timestamp - first_ts;
            }
            voltage = Some(match voltage {
                Some((lo, hi)) => (lo.min(row.voltage), hi.max(row.voltage)),
                None => (row.voltage, row.voltage),
            });
        }

        let peaks = discharge_peaks(&dataset.rows);
        let discharge = (!peaks.is_empty()).then(|| DischargeStats {
            steps: peaks.len(),
            max_mah: peaks.iter().copied().fold(f64::MIN, f64::max),
            min_mah: peaks.iter().copied().fold(f64::MAX, f64::min),
            mean_mah: peaks.iter().sum::<f64>() / peaks.len() as f64,
        });

        Self {
            total_rows: dataset.len(),
            aux_columns: dataset.aux_columns.len(),
            max_cycle: channels.iter().map(|c| c.max_cycle).max(),
            voltage_min: voltage.map(|(lo, _)| lo),
            voltage_max: voltage.map(|(_, hi)| hi),
            channels,
            discharge,
        }
    }
}
