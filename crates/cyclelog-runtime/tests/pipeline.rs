//! End-to-end runs of the processor over on-disk cycler folders.

use std::fs;
use std::path::{Path, PathBuf};

use cyclelog_core::error::CyclerError;
use cyclelog_core::models::{Anomaly, CellValue, EquipmentType, MergedDataset};
use cyclelog_core::settings::{ExtraFilePolicy, OrderingPolicy};
use cyclelog_data::merger::merge;
use cyclelog_data::pne::{PneChannelReader, INDEX_LAST_FILE, INDEX_START_FILE, PNE_COLUMNS};
use cyclelog_data::reader::{ChannelReader, ReadOptions};
use cyclelog_data::toyo::ToyoChannelReader;
use cyclelog_runtime::processor::{Processor, ProcessorConfig};
use tempfile::TempDir;

const ROWS_PER_FRAGMENT: i64 = 4;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn battery_root(tmp: &TempDir, equipment: &str) -> PathBuf {
    let root = tmp
        .path()
        .join(equipment)
        .join("LGES_G3_MP1_4352mAh_상온수명");
    fs::create_dir_all(&root).unwrap();
    root
}

/// A SaveData row whose sample number is `n`.
fn pne_line(n: i64) -> String {
    PNE_COLUMNS
        .iter()
        .map(|name| match *name {
            "index" => n.to_string(),
            "step_count" => 1.to_string(),
            "total_cycle" => (1 + n / 8).to_string(),
            "tot_time_cs" => (n * 150).to_string(),
            "voltage_uv" => (3_600_000 + n * 1_234).to_string(),
            "current_ua" => (-1_500_250 + n).to_string(),
            "dchg_capacity_uah" => (n * 1_000).to_string(),
            "avg_voltage_uv" => "3650000".to_string(),
            "temp1" => "24.5".to_string(),
            _ => "0".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

fn write_pne_channel(root: &Path, name: &str, fragments: u32) -> PathBuf {
    let restore = root.join(name).join("Restore");
    fs::create_dir_all(&restore).unwrap();
    let mut n = 0;
    for seq in 1..=fragments {
        let lines: Vec<String> = (0..ROWS_PER_FRAGMENT)
            .map(|_| {
                n += 1;
                pne_line(n)
            })
            .collect();
        fs::write(
            restore.join(format!("ch_SaveData{seq:04}.csv")),
            lines.join("\n") + "\n",
        )
        .unwrap();
    }
    fs::write(restore.join("ch_SaveEnd.csv"), pne_line(n + 1) + "\n").unwrap();
    fs::write(restore.join(INDEX_START_FILE), "fileIndex\tresultIndex\n1\t0\n").unwrap();
    fs::write(
        restore.join(INDEX_LAST_FILE),
        format!("fileIndex\tresultIndex\n1\t0\n{fragments}\t{n}\n"),
    )
    .unwrap();
    restore
}

const TOYO_HEADER: &str =
    "Date,Time,PassTime[Sec],Voltage[V],Current[mA],Temp1[Deg],Condition,Mode,Cycle,TotlCycle";

fn write_toyo_channel(root: &Path, name: &str, steps: usize) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    let mut log = vec!["Date,Time,Condition,Mode,Cycle,TotlCycle,Cap[mAh],Finish".to_string()];
    for step in 0..steps {
        let condition = if step % 2 == 0 { 1 } else { 2 };
        let cycle = step / 2 + 1;
        let minute = step * 2;
        let lines = [
            "TOYO SYSTEM,TOSCAT-3100".to_string(),
            TOYO_HEADER.to_string(),
            format!("2025/02/06,10:{minute:02}:00,0.0,3.70,865,25,{condition},1,1,{cycle}"),
            format!("2025/02/06,10:{minute:02}:30,30.0,3.80,865,25,{condition},1,1,{cycle}"),
        ];
        fs::write(dir.join(format!("{:06}", step + 1)), lines.join("\r\n") + "\r\n").unwrap();
        log.push(format!(
            "2025/02/06,10:{minute:02}:30,{condition},1,1,{cycle},7.2,Vol"
        ));
    }
    fs::write(dir.join("CAPACITY.LOG"), log.join("\r\n") + "\r\n").unwrap();
    dir
}

fn render(dataset: &MergedDataset) -> Vec<String> {
    dataset
        .rows
        .iter()
        .map(|row| {
            dataset
                .row_values(row)
                .iter()
                .map(CellValue::to_field)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect()
}

// ── PNE ───────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pne_run_normalizes_units() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "pne");
    write_pne_channel(&root, "M01Ch003[003]", 5);
    write_pne_channel(&root, "M01Ch004[004]", 3);

    let processor = Processor::open(&root, ProcessorConfig::default()).unwrap();
    assert_eq!(processor.equipment(), EquipmentType::Pne);
    let result = processor.run().await.unwrap();

    let ds = &result.dataset;
    // SaveEnd adds one row per channel.
    assert_eq!(ds.len(), (5 + 3) * ROWS_PER_FRAGMENT as usize + 2);
    assert_eq!(ds.channel_ids(), vec!["M01Ch003[003]", "M01Ch004[004]"]);
    assert_eq!(result.battery.model, "G3_MP1");
    assert_eq!(result.battery.test_condition, "상온수명");

    let first = &ds.rows[0];
    assert!((first.voltage - 3_601_234.0 / 1_000_000.0).abs() < 1e-9);
    assert!((first.current - (-1_500_249.0 / 1_000.0)).abs() < 1e-9);
    assert!((first.timestamp - 1.5).abs() < 1e-9);
    assert!((first.capacity - 1.0).abs() < 1e-9);
    assert_eq!(first.temperature, Some(24.5));

    for id in ds.channel_ids() {
        let rows: Vec<_> = ds.channel_rows(id).collect();
        for pair in rows.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
            assert!(pair[1].cycle >= pair[0].cycle);
        }
    }
    assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
    assert_eq!(result.channel_meta("M01Ch003[003]").unwrap().fragments, 6);
}

#[tokio::test]
async fn test_pne_missing_fragment_names_sequence() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "pne");
    let restore = write_pne_channel(&root, "M01Ch003[003]", 5);
    fs::remove_file(restore.join("ch_SaveData0003.csv")).unwrap();

    let err = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap_err();
    match err {
        CyclerError::MissingFragment { channel, sequence } => {
            assert_eq!(channel, "M01Ch003[003]");
            assert_eq!(sequence, 3);
        }
        other => panic!("expected MissingFragment, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pne_missing_end_fragment_is_anomaly() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "pne");
    let restore = write_pne_channel(&root, "M01Ch003[003]", 2);
    fs::remove_file(restore.join("ch_SaveEnd.csv")).unwrap();

    let result = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(result.dataset.len(), 2 * ROWS_PER_FRAGMENT as usize);
    assert_eq!(
        result.anomalies,
        vec![Anomaly::MissingEndFragment {
            channel: "M01Ch003[003]".to_string()
        }]
    );
}

#[tokio::test]
async fn test_pne_extra_fragment_fail_policy() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "pne");
    let restore = write_pne_channel(&root, "M01Ch003[003]", 2);
    fs::write(restore.join("ch_SaveData0003.csv"), pne_line(99) + "\n").unwrap();

    let config = ProcessorConfig {
        extra_files: ExtraFilePolicy::Fail,
        ..ProcessorConfig::default()
    };
    let err = Processor::open(&root, config).unwrap().run().await.unwrap_err();
    assert_eq!(err.kind(), "ExtraFragmentsError");
}

// ── Toyo ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_toyo_run_with_filter() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "toyo");
    write_toyo_channel(&root, "86", 4);
    write_toyo_channel(&root, "93", 2);
    write_toyo_channel(&root, "100", 2);

    let all = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(all.equipment, EquipmentType::Toyo1);
    assert_eq!(all.dataset.channel_ids(), vec!["86", "93", "100"]);
    assert_eq!(all.dataset.len(), 16);
    assert_eq!(all.channel_meta("86").unwrap().summary.len(), 4);

    let config = ProcessorConfig {
        channels: vec!["100".to_string(), "86".to_string()],
        max_workers: 1,
        ..ProcessorConfig::default()
    };
    let some = Processor::open(&root, config).unwrap().run().await.unwrap();
    assert_eq!(some.dataset.channel_ids(), vec!["86", "100"]);
    assert_eq!(some.dataset.len(), 12);
}

#[tokio::test]
async fn test_toyo_missing_raw_file_fails_run() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "toyo");
    write_toyo_channel(&root, "86", 2);
    let dir = write_toyo_channel(&root, "93", 4);
    fs::remove_file(dir.join("000004")).unwrap();

    let err = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CyclerError::IncompleteChannel { ref channel, missing: 4, .. } if channel == "93"
    ));
}

#[tokio::test]
async fn test_toyo2_detected_from_extra_log() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "toyo");
    let dir = write_toyo_channel(&root, "86", 2);
    fs::write(dir.join("OPTION.LOG"), "x\n").unwrap();
    let result = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(result.equipment, EquipmentType::Toyo2);
    assert!(result
        .dataset
        .rows
        .iter()
        .all(|r| r.source_equipment == EquipmentType::Toyo2));
    assert_eq!(
        result.channel_meta("86").map(|m| m.aux_logs.clone()),
        Some(vec!["OPTION.LOG".to_string()])
    );
}

#[tokio::test]
async fn test_toyo_decreasing_time_under_both_policies() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "toyo");
    let dir = write_toyo_channel(&root, "86", 2);
    // Second step recorded with a clock that went backwards.
    let step2 = fs::read_to_string(dir.join("000002")).unwrap();
    fs::write(dir.join("000002"), step2.replace("10:02:", "09:02:")).unwrap();

    let err = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, CyclerError::Ordering { row: 2, .. }));

    let config = ProcessorConfig {
        ordering: OrderingPolicy::Lenient,
        ..ProcessorConfig::default()
    };
    let result = Processor::open(&root, config).unwrap().run().await.unwrap();
    assert_eq!(result.dataset.len(), 4);
    assert!(matches!(
        result.anomalies.as_slice(),
        [Anomaly::NonMonotonic { row: 2, .. }]
    ));
}

// ── Classification ────────────────────────────────────────────────────────────

#[test]
fn test_mixed_folder_is_ambiguous() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "mixed");
    write_pne_channel(&root, "M01Ch001[001]", 1);
    write_toyo_channel(&root, "86", 1);
    let err = Processor::open(&root, ProcessorConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, CyclerError::AmbiguousEquipment { .. }));
}

#[test]
fn test_empty_folder_is_unrecognized() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "empty");
    let err = Processor::open(&root, ProcessorConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), "UnrecognizedEquipmentError");
}

// ── Merge and idempotence ─────────────────────────────────────────────────────

#[test]
fn test_pne_and_toyo_tables_merge() {
    let tmp = TempDir::new().unwrap();
    let pne_root = battery_root(&tmp, "pne");
    let toyo_root = battery_root(&tmp, "toyo");
    write_pne_channel(&pne_root, "M01Ch003[003]", 2);
    write_toyo_channel(&toyo_root, "86", 2);

    let pne = PneChannelReader::new(ReadOptions::default());
    let toyo = ToyoChannelReader::new(EquipmentType::Toyo1, ReadOptions::default());
    let pne_table = pne
        .load_channel(&pne.discover_channels(&pne_root).unwrap()[0])
        .unwrap();
    let toyo_table = toyo
        .load_channel(&toyo.discover_channels(&toyo_root).unwrap()[0])
        .unwrap();
    let expected = pne_table.len() + toyo_table.len();

    let ds = merge(vec![pne_table, toyo_table]).unwrap();
    assert_eq!(ds.len(), expected);
    let avg_v = ds.aux_index("avg_voltage_v").unwrap();
    let condition = ds.aux_index("Condition").unwrap();
    for row in &ds.rows {
        let pne_row = row.source_equipment == EquipmentType::Pne;
        assert_eq!(row.aux[avg_v].is_null(), !pne_row);
        assert_eq!(row.aux[condition].is_null(), pne_row);
    }
}

#[tokio::test]
async fn test_reprocessing_is_identical() {
    let tmp = TempDir::new().unwrap();
    let root = battery_root(&tmp, "pne");
    for ch in ["M01Ch007[007]", "M01Ch002[002]", "M02Ch001[009]"] {
        write_pne_channel(&root, ch, 3);
    }
    let first = Processor::open(&root, ProcessorConfig::default())
        .unwrap()
        .run()
        .await
        .unwrap();
    let config = ProcessorConfig {
        max_workers: 1,
        ..ProcessorConfig::default()
    };
    let second = Processor::open(&root, config).unwrap().run().await.unwrap();
    assert_eq!(first.dataset, second.dataset);
    assert_eq!(render(&first.dataset), render(&second.dataset));
    assert_eq!(
        first.dataset.channel_ids(),
        vec!["M01Ch002[002]", "M01Ch007[007]", "M02Ch001[009]"]
    );
}
