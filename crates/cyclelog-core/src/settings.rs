use clap::{CommandFactory, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Policies ───────────────────────────────────────────────────────────────────

/// What to do with sequential files numbered past the declared end of a
/// channel (PNE index bound or Toyo capacity-log row count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraFilePolicy {
    /// Load the extra files in order and record an anomaly.
    #[default]
    Warn,
    /// Ignore the extra files and record an anomaly.
    Skip,
    /// Abort the run with `ExtraFragments`.
    Fail,
}

impl ExtraFilePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Skip => "skip",
            Self::Fail => "fail",
        }
    }
}

/// How a decreasing timestamp or cycle index is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderingPolicy {
    /// Reject the channel with an `Ordering` error.
    #[default]
    Strict,
    /// Keep the rows and record a `NonMonotonic` anomaly.
    Lenient,
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Battery cycler data ingestion and normalization
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cyclelog",
    about = "Battery cycler data ingestion and normalization",
    version
)]
pub struct Settings {
    /// Battery test directory, e.g. `D:/pne/LGES_G3_MP1_4352mAh_상온수명`
    pub data_path: PathBuf,

    /// Output directory (default: <DATA_PATH>/processed_data)
    #[arg(long, env = "CYCLELOG_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Only load these channel ids
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Maximum channels loaded concurrently (default: available cores)
    #[arg(long, env = "CYCLELOG_WORKERS", value_parser = clap::value_parser!(u32).range(1..=256))]
    pub workers: Option<u32>,

    /// Handling of files numbered past the declared end of a channel
    #[arg(long, value_enum, default_value_t = ExtraFilePolicy::Warn)]
    pub extra_files: ExtraFilePolicy,

    /// Record decreasing timestamps/cycles as anomalies instead of failing
    #[arg(long)]
    pub lenient_order: bool,

    /// Skip writing CSV and report files
    #[arg(long)]
    pub no_export: bool,

    /// Also write one raw-data CSV per channel
    #[arg(long)]
    pub separate_channels: bool,

    /// Print dataset statistics as JSON to stdout
    #[arg(long)]
    pub summary: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Save the current options as defaults for later runs
    #[arg(long)]
    pub save_defaults: bool,

    /// Clear saved defaults
    #[arg(long)]
    pub clear: bool,
}

// ── DefaultsParams ─────────────────────────────────────────────────────────────

/// Persisted defaults saved to `~/.cyclelog/defaults.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct DefaultsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_files: Option<ExtraFilePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lenient_order: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl DefaultsParams {
    /// Default location of the defaults file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Defaults file rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".cyclelog").join("defaults.json")
    }

    /// Load defaults from `path`; `Default` when absent or unparseable.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Write defaults to `path` via a temp file and rename.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Delete the defaults file at `path` if it exists.
    pub fn clear_at(path: &Path) -> Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse process arguments layered over the saved defaults file.
    pub fn load_with_defaults() -> Self {
        Self::load_with_defaults_impl(std::env::args_os().collect(), &DefaultsParams::config_path())
    }

    /// Same as [`load_with_defaults`](Self::load_with_defaults) with an
    /// explicit argument list and defaults path.
    pub fn load_with_defaults_impl(args: Vec<std::ffi::OsString>, config_path: &Path) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = DefaultsParams::clear_at(config_path) {
                tracing::warn!(path = %config_path.display(), error = %e, "could not clear defaults");
            }
            return settings.resolve();
        }

        let saved = DefaultsParams::load_from(config_path);

        // clap keys args by field name, not by the hyphenated flag.
        if !is_arg_explicitly_set(&matches, "output_dir") && settings.output_dir.is_none() {
            settings.output_dir = saved.output_dir;
        }
        if !is_arg_explicitly_set(&matches, "workers") && settings.workers.is_none() {
            settings.workers = saved.workers.filter(|w| *w >= 1);
        }
        if !is_arg_explicitly_set(&matches, "extra_files") {
            if let Some(v) = saved.extra_files {
                settings.extra_files = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "lenient_order") {
            if let Some(v) = saved.lenient_order {
                settings.lenient_order = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "log_level") {
            if let Some(v) = saved.log_level {
                settings.log_level = v;
            }
        }

        if settings.save_defaults {
            let params = DefaultsParams::from(&settings);
            if let Err(e) = params.save_to(config_path) {
                tracing::warn!(path = %config_path.display(), error = %e, "could not save defaults");
            }
        }

        settings.resolve()
    }

    /// Apply `--verbose` to the log level.
    fn resolve(mut self) -> Self {
        if self.verbose {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    /// Worker count to use: explicit value or the machine's parallelism.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(w) => w.max(1) as usize,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn ordering_policy(&self) -> OrderingPolicy {
        if self.lenient_order {
            OrderingPolicy::Lenient
        } else {
            OrderingPolicy::Strict
        }
    }

    /// Output directory, defaulting to `<data_path>/processed_data`.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_path.join("processed_data"))
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for DefaultsParams {
    fn from(s: &Settings) -> Self {
        DefaultsParams {
            output_dir: s.output_dir.clone(),
            workers: s.workers,
            extra_files: Some(s.extra_files),
            lenient_order: Some(s.lenient_order),
            // --verbose is per-run, never persisted as DEBUG.
            log_level: Some(s.log_level.clone()),
        }
    }
}

/// `true` when `name` came from the command line or its environment
/// variable rather than a default.
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(clap::parser::ValueSource::CommandLine) | Some(clap::parser::ValueSource::EnvVariable)
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────────
