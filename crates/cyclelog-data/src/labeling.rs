//! Labels for Toyo `CAPACITY.LOG` rows and raw records.
//!
//! Every summary row gets a computed cycle number, a test pattern, a
//! human-readable step name and the C-rate the step ran at. The C-rate and
//! cutoff values are looked up in the raw records of the same channel. Raw
//! records in turn get their instantaneous C-rate and the pattern and step
//! of the summary row they belong to.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use cyclelog_core::formatting::round_to;
use cyclelog_core::models::{CapacityLogRow, MergedRow, Record};

use crate::toyo::CONDITION_CHARGE;

/// Auxiliary column holding the Toyo condition code.
pub const CONDITION_COLUMN: &str = "Condition";

/// Computed cycles at which the periodic check-up pattern runs.
const WARRANTY_INTERVAL: u32 = 100;

// ── Pattern ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Reference capacity check: cycle 1 and every hundredth cycle.
    Warranty,
    Life,
}

impl Pattern {
    pub fn for_cycle(cycle: u32) -> Self {
        if cycle == 1 || (cycle > 0 && cycle % WARRANTY_INTERVAL == 0) {
            Self::Warranty
        } else {
            Self::Life
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warranty => "warranty",
            Self::Life => "life",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step name for a summary row.
pub fn step_label(pattern: Pattern, condition: i64, mode: i64) -> &'static str {
    let charging = condition == CONDITION_CHARGE;
    match (pattern, charging) {
        (Pattern::Warranty, true) => "charge",
        (Pattern::Warranty, false) => "discharge",
        (Pattern::Life, true) => match mode {
            m if m <= 2 => "step1 CC charge",
            3 => "step2 CC charge",
            4 => "step3 CCCV charge",
            _ => "step4 CCCV charge",
        },
        (Pattern::Life, false) if mode <= 5 => "step1 discharge",
        (Pattern::Life, false) => "step2 discharge",
    }
}

// ── Samples ───────────────────────────────────────────────────────────────────

/// The fields of one raw record that labelling looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSample {
    pub total_cycle: i64,
    pub condition: Option<i64>,
    pub mode: i64,
    pub voltage: f64,
    pub current: f64,
}

impl StepSample {
    /// `condition_slot` is the position of the `Condition` auxiliary column.
    pub fn from_record(record: &Record, condition_slot: Option<usize>) -> Self {
        Self {
            total_cycle: record.cycle,
            condition: condition_slot.and_then(|i| record.aux.get(i)?.as_i64()),
            mode: record.step,
            voltage: record.voltage,
            current: record.current,
        }
    }

    pub fn from_row(row: &MergedRow, condition_slot: Option<usize>) -> Self {
        Self {
            total_cycle: row.cycle,
            condition: condition_slot.and_then(|i| row.aux.get(i)?.as_i64()),
            mode: row.step,
            voltage: row.voltage,
            current: row.current,
        }
    }
}

/// Aggregates of all samples that share `(cycle, condition, mode)`.
#[derive(Debug, Default)]
struct StepStats {
    nonzero_sum: f64,
    nonzero_count: usize,
    last_voltage: f64,
    last_abs_current: f64,
}

// ── Labeler ───────────────────────────────────────────────────────────────────

/// Labels attached to one `CAPACITY.LOG` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityLabel {
    pub computed_cycle: u32,
    pub pattern: Pattern,
    pub step: &'static str,
    pub c_rate: Option<f64>,
    /// Final voltage of steps that ended on a voltage limit.
    pub cutoff_voltage: Option<f64>,
    /// Final current of steps that ended on a current limit.
    pub cutoff_current: Option<f64>,
}

/// Labels attached to one raw record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawLabel {
    /// `|current| / rated capacity`.
    pub c_rate: f64,
    /// `None` when no summary row shares the record's step.
    pub pattern: Option<Pattern>,
    pub step: Option<&'static str>,
}

pub struct CapacityLabeler {
    rated_capacity_mah: f64,
}

impl CapacityLabeler {
    pub fn new(rated_capacity_mah: f64) -> Self {
        Self { rated_capacity_mah }
    }

    /// Label `rows` in order, using `samples` for per-step electrical values.
    pub fn label<I>(&self, rows: &[CapacityLogRow], samples: I) -> Vec<CapacityLabel>
    where
        I: IntoIterator<Item = StepSample>,
    {
        let mut steps: HashMap<(i64, i64, i64), StepStats> = HashMap::new();
        for sample in samples {
            let Some(condition) = sample.condition else {
                continue;
            };
            let stats = steps
                .entry((sample.total_cycle, condition, sample.mode))
                .or_default();
            if sample.current != 0.0 {
                stats.nonzero_sum += sample.current.abs();
                stats.nonzero_count += 1;
            }
            stats.last_voltage = sample.voltage;
            stats.last_abs_current = sample.current.abs();
        }

        let mut cycle = 0;
        let mut prev_condition = None;
        rows.iter()
            .map(|row| {
                let starts_cycle = match prev_condition {
                    None => true,
                    Some(prev) => row.condition == CONDITION_CHARGE && prev != CONDITION_CHARGE,
                };
                if starts_cycle {
                    cycle += 1;
                }
                prev_condition = Some(row.condition);

                let pattern = Pattern::for_cycle(cycle);
                let stats = steps.get(&(row.total_cycle, row.condition, row.mode));
                CapacityLabel {
                    computed_cycle: cycle,
                    pattern,
                    step: step_label(pattern, row.condition, row.mode),
                    c_rate: stats.map(|s| self.c_rate(s)),
                    cutoff_voltage: stats
                        .filter(|_| row.finish == "Vol")
                        .map(|s| round_to(s.last_voltage, 4)),
                    cutoff_current: stats
                        .filter(|_| row.finish == "Cur")
                        .map(|s| round_to(s.last_abs_current, 1)),
                }
            })
            .collect()
    }

    /// Label raw `samples` using the already labelled summary `rows`.
    ///
    /// Samples are matched to rows on `(TotlCycle, Condition, Mode)`; when
    /// several rows share a key the first one wins.
    pub fn label_raw<I>(
        &self,
        rows: &[CapacityLogRow],
        labels: &[CapacityLabel],
        samples: I,
    ) -> Vec<RawLabel>
    where
        I: IntoIterator<Item = StepSample>,
    {
        let mut by_step: HashMap<(i64, i64, i64), &CapacityLabel> = HashMap::new();
        for (row, label) in rows.iter().zip(labels) {
            by_step
                .entry((row.total_cycle, row.condition, row.mode))
                .or_insert(label);
        }

        samples
            .into_iter()
            .map(|sample| {
                let label = sample
                    .condition
                    .and_then(|c| by_step.get(&(sample.total_cycle, c, sample.mode)));
                RawLabel {
                    c_rate: self.instant_c_rate(sample.current),
                    pattern: label.map(|l| l.pattern),
                    step: label.map(|l| l.step),
                }
            })
            .collect()
    }

    fn instant_c_rate(&self, current: f64) -> f64 {
        if self.rated_capacity_mah <= 0.0 {
            return 0.0;
        }
        round_to(current.abs() / self.rated_capacity_mah, 3)
    }

    fn c_rate(&self, stats: &StepStats) -> f64 {
        if stats.nonzero_count == 0 || self.rated_capacity_mah <= 0.0 {
            return 0.0;
        }
        let mean = stats.nonzero_sum / stats.nonzero_count as f64;
        round_to(mean / self.rated_capacity_mah, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{capacity_log, toyo_raw_file, write_toyo_channel, ToyoRow};
    use crate::reader::{ChannelReader, ReadOptions};
    use crate::toyo::ToyoChannelReader;
    use cyclelog_core::models::EquipmentType;
    use tempfile::TempDir;

    fn log_row(index: u32, condition: i64, mode: i64, total_cycle: i64, finish: &str) -> CapacityLogRow {
        CapacityLogRow {
            index,
            condition,
            mode,
            cycle: 1,
            total_cycle,
            capacity_mah: 1000.0,
            finish: finish.to_string(),
            fields: vec![],
        }
    }

    fn sample(total_cycle: i64, condition: i64, mode: i64, voltage: f64, current: f64) -> StepSample {
        StepSample {
            total_cycle,
            condition: Some(condition),
            mode,
            voltage,
            current,
        }
    }

    #[test]
    fn test_computed_cycle_increments_on_charge() {
        let rows = vec![
            log_row(1, 1, 1, 1, "Vol"),
            log_row(2, 2, 1, 1, "Vol"),
            log_row(3, 1, 1, 2, "Vol"),
            log_row(4, 1, 3, 2, "Vol"),
            log_row(5, 2, 1, 2, "Vol"),
            log_row(6, 1, 1, 3, "Vol"),
        ];
        let labels = CapacityLabeler::new(1730.0).label(&rows, Vec::new());
        let cycles: Vec<u32> = labels.iter().map(|l| l.computed_cycle).collect();
        assert_eq!(cycles, vec![1, 1, 2, 2, 2, 3]);
    }

    #[test]
    fn test_first_row_starts_cycle_even_when_discharging() {
        let rows = vec![log_row(1, 2, 1, 1, "Vol"), log_row(2, 1, 1, 1, "Vol")];
        let labels = CapacityLabeler::new(1730.0).label(&rows, Vec::new());
        assert_eq!(labels[0].computed_cycle, 1);
        assert_eq!(labels[1].computed_cycle, 2);
    }

    #[test]
    fn test_pattern_for_cycle() {
        assert_eq!(Pattern::for_cycle(1), Pattern::Warranty);
        assert_eq!(Pattern::for_cycle(2), Pattern::Life);
        assert_eq!(Pattern::for_cycle(99), Pattern::Life);
        assert_eq!(Pattern::for_cycle(100), Pattern::Warranty);
        assert_eq!(Pattern::for_cycle(300), Pattern::Warranty);
        assert_eq!(Pattern::for_cycle(0), Pattern::Life);
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(step_label(Pattern::Warranty, 1, 4), "charge");
        assert_eq!(step_label(Pattern::Warranty, 2, 1), "discharge");
        assert_eq!(step_label(Pattern::Life, 1, 1), "step1 CC charge");
        assert_eq!(step_label(Pattern::Life, 1, 2), "step1 CC charge");
        assert_eq!(step_label(Pattern::Life, 1, 3), "step2 CC charge");
        assert_eq!(step_label(Pattern::Life, 1, 4), "step3 CCCV charge");
        assert_eq!(step_label(Pattern::Life, 1, 7), "step4 CCCV charge");
        assert_eq!(step_label(Pattern::Life, 2, 5), "step1 discharge");
        assert_eq!(step_label(Pattern::Life, 2, 6), "step2 discharge");
    }

    #[test]
    fn test_c_rate_from_matching_samples() {
        let rows = vec![log_row(1, 1, 1, 1, "Vol"), log_row(2, 2, 1, 1, "Vol")];
        let samples = vec![
            sample(1, 1, 1, 3.9, 0.0),
            sample(1, 1, 1, 4.0, 865.0),
            sample(1, 1, 1, 4.2, 865.0),
            sample(1, 2, 1, 3.5, -346.0),
        ];
        let labels = CapacityLabeler::new(1730.0).label(&rows, samples);
        assert_eq!(labels[0].c_rate, Some(0.5));
        assert_eq!(labels[1].c_rate, Some(0.2));
    }

    #[test]
    fn test_c_rate_none_without_matching_samples() {
        let rows = vec![log_row(1, 1, 1, 7, "Vol")];
        let samples = vec![sample(1, 1, 1, 4.0, 865.0)];
        let labels = CapacityLabeler::new(1730.0).label(&rows, samples);
        assert_eq!(labels[0].c_rate, None);
        assert_eq!(labels[0].cutoff_voltage, None);
    }

    #[test]
    fn test_cutoffs_follow_finish_condition() {
        let rows = vec![log_row(1, 1, 4, 1, "Cur"), log_row(2, 2, 1, 1, "Vol")];
        let samples = vec![
            sample(1, 1, 4, 4.2, 500.0),
            sample(1, 1, 4, 4.2, 87.04),
            sample(1, 2, 1, 3.1, -500.0),
            sample(1, 2, 1, 2.750049, -500.0),
        ];
        let labels = CapacityLabeler::new(1730.0).label(&rows, samples);
        assert_eq!(labels[0].cutoff_current, Some(87.0));
        assert_eq!(labels[0].cutoff_voltage, None);
        assert_eq!(labels[1].cutoff_voltage, Some(2.75));
        assert_eq!(labels[1].cutoff_current, None);
    }

    #[test]
    fn test_samples_without_condition_are_ignored() {
        let rows = vec![log_row(1, 1, 1, 1, "Vol")];
        let samples = vec![StepSample {
            condition: None,
            ..sample(1, 1, 1, 4.0, 865.0)
        }];
        let labels = CapacityLabeler::new(1730.0).label(&rows, samples);
        assert_eq!(labels[0].c_rate, None);
    }

    #[test]
    fn test_label_raw_maps_steps_and_c_rate() {
        let rows = vec![
            log_row(1, 1, 1, 1, "Vol"),
            log_row(2, 2, 1, 1, "Vol"),
            log_row(3, 1, 3, 2, "Vol"),
        ];
        let samples = vec![
            sample(1, 1, 1, 4.0, 865.0),
            sample(1, 2, 1, 3.5, -346.0),
            sample(2, 1, 3, 4.1, 1730.0),
            sample(9, 1, 1, 4.1, 0.0),
        ];
        let labeler = CapacityLabeler::new(1730.0);
        let labels = labeler.label(&rows, samples.clone());
        let raw = labeler.label_raw(&rows, &labels, samples);

        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0].c_rate, 0.5);
        assert_eq!(raw[0].pattern, Some(Pattern::Warranty));
        assert_eq!(raw[0].step, Some("charge"));
        assert_eq!(raw[1].c_rate, 0.2);
        assert_eq!(raw[1].step, Some("discharge"));
        assert_eq!(raw[2].c_rate, 1.0);
        assert_eq!(raw[2].pattern, Some(Pattern::Life));
        assert_eq!(raw[2].step, Some("step2 CC charge"));
        assert_eq!(raw[3].c_rate, 0.0);
        assert_eq!(raw[3].pattern, None);
        assert_eq!(raw[3].step, None);
    }

    #[test]
    fn test_label_raw_without_condition_or_capacity() {
        let rows = vec![log_row(1, 1, 1, 1, "Vol")];
        let samples = vec![StepSample {
            condition: None,
            ..sample(1, 1, 1, 4.0, 865.0)
        }];
        let labeler = CapacityLabeler::new(0.0);
        let labels = labeler.label(&rows, samples.clone());
        let raw = labeler.label_raw(&rows, &labels, samples);
        assert_eq!(
            raw,
            vec![RawLabel {
                c_rate: 0.0,
                pattern: None,
                step: None,
            }]
        );
    }

    #[test]
    fn test_label_loaded_channel() {
        let tmp = TempDir::new().unwrap();
        write_toyo_channel(
            tmp.path(),
            "86",
            &[
                toyo_raw_file(&[
                    ToyoRow::new("10:00:00", 0.0, 865.0, 1),
                    ToyoRow::new("10:00:10", 10.0, 865.0, 1),
                ]),
                toyo_raw_file(&[
                    ToyoRow::new("10:01:00", 0.0, 346.0, 2),
                    ToyoRow::new("10:01:10", 10.0, 346.0, 2),
                ]),
            ],
            Some(capacity_log(&[(1, 1, 1, 1, 2.4, "Vol"), (2, 1, 1, 1, 0.96, "Vol")])),
        );
        let reader = ToyoChannelReader::new(EquipmentType::Toyo1, ReadOptions::default());
        let channel = &reader.discover_channels(tmp.path()).unwrap()[0];
        let table = reader.load_channel(channel).unwrap();

        let slot = table.aux_index(CONDITION_COLUMN);
        let samples = table.records.iter().map(|r| StepSample::from_record(r, slot));
        let labels = CapacityLabeler::new(1730.0).label(&table.summary, samples);

        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].step, "charge");
        assert_eq!(labels[1].step, "discharge");
        assert_eq!(labels[0].c_rate, Some(0.5));
        assert_eq!(labels[1].c_rate, Some(0.2));
        assert_eq!(labels[0].cutoff_voltage, Some(3.8));
    }
}
