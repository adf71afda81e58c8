use std::path::PathBuf;
use thiserror::Error;

/// All errors produced while ingesting cycler data.
#[derive(Error, Debug)]
pub enum CyclerError {
    /// The battery directory name did not follow the metadata grammar.
    #[error("Cannot parse battery metadata from {path:?}: {reason}")]
    MetadataParse { path: String, reason: String },

    /// No equipment signature matched the directory layout.
    #[error("Unrecognized equipment layout in {}", path.display())]
    UnrecognizedEquipment { path: PathBuf },

    /// More than one equipment signature matched and no tiebreak applied.
    #[error("Ambiguous equipment layout in {}: matches {}", path.display(), candidates.join(", "))]
    AmbiguousEquipment {
        path: PathBuf,
        candidates: Vec<String>,
    },

    /// A PNE fragment declared by the index bounds is not on disk.
    #[error("Channel {channel}: missing SaveData fragment #{sequence}")]
    MissingFragment { channel: String, sequence: u32 },

    /// A PNE index-bounds file is missing or unreadable.
    #[error("Channel {channel}: bad index bounds file {}: {reason}", path.display())]
    IndexBounds {
        channel: String,
        path: PathBuf,
        reason: String,
    },

    /// A Toyo channel has fewer raw files than its capacity log declares,
    /// or a gap in the numbering.
    #[error(
        "Channel {channel}: incomplete raw file sequence (expected {expected}, found {found}, first missing #{missing})"
    )]
    IncompleteChannel {
        channel: String,
        expected: usize,
        found: usize,
        missing: u32,
    },

    /// More sequential files exist than declared and the policy is `fail`.
    #[error("Channel {channel}: {found} sequential files present but only {expected} declared")]
    ExtraFragments {
        channel: String,
        expected: usize,
        found: usize,
    },

    /// A data row could not be parsed.
    #[error("Malformed record in {}:{line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Two tables declare the same column with incompatible kinds.
    #[error("Schema conflict on column {column:?}: {left} vs {right}")]
    SchemaConflict {
        column: String,
        left: String,
        right: String,
    },

    /// Timestamps or cycle indices decreased within a channel.
    #[error("Channel {channel}: {column} decreases at row {row}")]
    Ordering {
        channel: String,
        row: usize,
        column: String,
    },

    /// File content or a file name was not valid UTF-8.
    #[error("Invalid UTF-8 in {} at line {line}", path.display())]
    Encoding { path: PathBuf, line: usize },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The data directory does not exist or is not a directory.
    #[error("Data path not found: {}", .0.display())]
    DataPathNotFound(PathBuf),

    /// Discovery produced no channels to load.
    #[error("No channel folders found in {}", .0.display())]
    NoChannels(PathBuf),

    /// The load was aborted because another channel failed.
    #[error("Channel {0}: load cancelled")]
    Cancelled(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CyclerError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MetadataParse { .. } => "MetadataParseError",
            Self::UnrecognizedEquipment { .. } => "UnrecognizedEquipmentError",
            Self::AmbiguousEquipment { .. } => "AmbiguousEquipmentError",
            Self::MissingFragment { .. } => "MissingFragmentError",
            Self::IndexBounds { .. } => "IndexBoundsError",
            Self::IncompleteChannel { .. } => "IncompleteChannelError",
            Self::ExtraFragments { .. } => "ExtraFragmentsError",
            Self::MalformedRecord { .. } => "MalformedRecordError",
            Self::SchemaConflict { .. } => "SchemaConflictError",
            Self::Ordering { .. } => "OrderingError",
            Self::Encoding { .. } => "EncodingError",
            Self::FileRead { .. } => "FileReadError",
            Self::DataPathNotFound(_) => "DataPathNotFound",
            Self::NoChannels(_) => "NoChannels",
            Self::Cancelled(_) => "Cancelled",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Other(_) => "Error",
        }
    }

    /// Wrap an I/O error together with the path that produced it.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the cyclelog crates.
pub type Result<T> = std::result::Result<T, CyclerError>;
