//! Processing facade.
//!
//! [`Processor`] ties the pipeline together: path metadata, equipment
//! classification, channel discovery, concurrent loading, the ordering
//! check and the merge. Callers get one [`ProcessingResult`] back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::metadata::parse_battery_info;
use cyclelog_core::models::{
    Anomaly, BatteryInfo, CapacityLogRow, ChannelDescriptor, ChannelSources, ChannelTable,
    EquipmentType, MergedDataset,
};
use cyclelog_core::settings::{ExtraFilePolicy, OrderingPolicy, Settings};
use cyclelog_data::classifier::classify;
use cyclelog_data::merger::merge;
use cyclelog_data::reader::{check_ordering, reader_for, ChannelReader, ReadOptions};
use tracing::{debug, info, warn};

use crate::loader::ChannelLoader;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Channel ids to load; empty loads every channel.
    pub channels: Vec<String>,
    pub max_workers: usize,
    pub extra_files: ExtraFilePolicy,
    pub ordering: OrderingPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            extra_files: ExtraFilePolicy::default(),
            ordering: OrderingPolicy::default(),
        }
    }
}

impl From<&Settings> for ProcessorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            channels: settings.channels.clone(),
            max_workers: settings.worker_count(),
            extra_files: settings.extra_files,
            ordering: settings.ordering_policy(),
        }
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

/// What was loaded for one channel, kept after its records are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    pub channel_id: String,
    pub equipment: EquipmentType,
    pub dir: PathBuf,
    pub rows: usize,
    /// Fragments (PNE) or raw files (Toyo) found on disk.
    pub fragments: usize,
    /// `CAPACITY.LOG` rows; empty for PNE.
    pub summary: Vec<CapacityLogRow>,
    /// Other `.LOG` files found next to Toyo raw files, such as `OPTION.LOG`.
    /// They are listed, not parsed.
    pub aux_logs: Vec<String>,
}

impl ChannelMeta {
    fn from_table(table: &mut ChannelTable) -> Self {
        Self {
            channel_id: table.channel.id.clone(),
            equipment: table.channel.equipment,
            dir: table.channel.dir.clone(),
            rows: table.len(),
            fragments: table.channel.fragment_count(),
            summary: std::mem::take(&mut table.summary),
            aux_logs: match &table.channel.sources {
                ChannelSources::Toyo { aux_logs, .. } => aux_logs
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
                ChannelSources::Pne { .. } => Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub battery: BatteryInfo,
    pub equipment: EquipmentType,
    pub data_path: PathBuf,
    pub dataset: MergedDataset,
    /// One entry per loaded channel, in dataset order.
    pub tables_meta: Vec<ChannelMeta>,
    pub anomalies: Vec<Anomaly>,
    pub elapsed: Duration,
}

impl ProcessingResult {
    pub fn channel_meta(&self, channel_id: &str) -> Option<&ChannelMeta> {
        self.tables_meta.iter().find(|m| m.channel_id == channel_id)
    }
}

// ── Processor ─────────────────────────────────────────────────────────────────

pub struct Processor {
    root: PathBuf,
    config: ProcessorConfig,
    battery: BatteryInfo,
    equipment: EquipmentType,
}

impl Processor {
    /// Validate `root` and prepare the reader for its equipment.
    pub fn open(root: impl Into<PathBuf>, config: ProcessorConfig) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CyclerError::DataPathNotFound(root));
        }
        // `.` and `..` components carry no name; the battery is named by the
        // directory they resolve to.
        let resolved = fs::canonicalize(&root).map_err(|e| CyclerError::file_read(&root, e))?;
        let battery = parse_battery_info(&resolved.to_string_lossy())?;
        let equipment = classify(&root)?;
        info!(
            "Opened {} ({} {}, {} mAh) as {} data",
            root.display(),
            battery.manufacturer,
            battery.model,
            battery.capacity_mah,
            equipment
        );

        Ok(Self {
            root,
            config,
            battery,
            equipment,
        })
    }

    /// Reader bound to `cancel`. Each run gets its own flag so a failed run
    /// never cancels the next one.
    fn reader(&self, cancel: Arc<AtomicBool>) -> Arc<dyn ChannelReader> {
        let options = ReadOptions {
            extra_files: self.config.extra_files,
            cancel,
        };
        Arc::from(reader_for(self.equipment, options))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn battery(&self) -> &BatteryInfo {
        &self.battery
    }

    pub fn equipment(&self) -> EquipmentType {
        self.equipment
    }

    /// Channels to load, after the configured channel filter.
    pub fn discover(&self) -> Result<Vec<ChannelDescriptor>> {
        self.discover_with(self.reader(Arc::default()).as_ref())
    }

    fn discover_with(&self, reader: &dyn ChannelReader) -> Result<Vec<ChannelDescriptor>> {
        let mut channels = reader.discover_channels(&self.root)?;
        if !self.config.channels.is_empty() {
            for wanted in &self.config.channels {
                if !channels.iter().any(|c| &c.id == wanted) {
                    warn!("Requested channel {wanted} not found");
                }
            }
            channels.retain(|c| self.config.channels.contains(&c.id));
        }
        if channels.is_empty() {
            return Err(CyclerError::NoChannels(self.root.clone()));
        }
        debug!("Discovered {} channels", channels.len());
        Ok(channels)
    }

    /// Load, check and merge every selected channel.
    pub async fn run(&self) -> Result<ProcessingResult> {
        let started = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let reader = self.reader(Arc::clone(&cancel));
        let channels = self.discover_with(reader.as_ref())?;
        let count = channels.len();

        let loader = ChannelLoader::new(reader, self.config.max_workers, cancel);
        let mut tables = loader.load_all(channels).await?;

        let mut anomalies = Vec::new();
        let mut tables_meta = Vec::with_capacity(tables.len());
        for table in &mut tables {
            check_ordering(table, self.config.ordering)?;
            anomalies.append(&mut table.anomalies);
            tables_meta.push(ChannelMeta::from_table(table));
        }

        let mut dataset = merge(tables)?;
        dataset.battery = Some(self.battery.clone());

        let elapsed = started.elapsed();
        info!(
            "Processed {} rows from {} channels in {:.2}s ({} anomalies)",
            dataset.len(),
            count,
            elapsed.as_secs_f64(),
            anomalies.len()
        );

        Ok(ProcessingResult {
            battery: self.battery.clone(),
            equipment: self.equipment,
            data_path: self.root.clone(),
            dataset,
            tables_meta,
            anomalies,
            elapsed,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
