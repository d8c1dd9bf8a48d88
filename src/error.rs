use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Engine error taxonomy
// ---------------------------------------------------------------------------

/// A filter or parameter edit that cannot be applied to the datasets at hand.
///
/// Raised before any mask or statistics record is produced, so callers never
/// see partial results built from a broken configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("filter references feature '{feature}' which dataset '{dataset}' does not provide")]
    MissingFeature { feature: String, dataset: String },

    #[error("option '{key}' has an invalid value: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("polygon filter '{name}' is malformed: {reason}")]
    MalformedPolygon { name: String, reason: String },

    #[error("contour color {0} is assigned to more than one dataset")]
    DuplicateColor(String),

    #[error("dataset index {index} out of range (analysis holds {len})")]
    DatasetIndex { index: usize, len: usize },

    #[error("configuration kind '{0}' cannot be shared across datasets")]
    NotShared(String),
}

/// The session document could not be interpreted. Fatal for `load`.
#[derive(Error, Debug)]
pub enum SessionFormatError {
    #[error("session is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("unsupported session version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u64, supported: u64 },

    #[error("session entry {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Umbrella error for every fallible engine operation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    SessionFormat(#[from] SessionFormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot open measurement {path}: {message}")]
    Measurement { path: PathBuf, message: String },

    #[error("no analysis is loaded")]
    NoAnalysis,

    #[error("dataset '{0}' has no file on disk and cannot be referenced from a session")]
    UnsavableSource(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Non-fatal warnings
// ---------------------------------------------------------------------------

/// A referenced measurement whose content no longer matches the recorded
/// fingerprint. Collected, never raised; the data is used as found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashComparisonWarning {
    pub source: String,
    pub expected: String,
    /// `None` when the source could not be read at all.
    pub found: Option<String>,
}

impl fmt::Display for HashComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.found {
            Some(found) => write!(
                f,
                "hash mismatch for {}: expected {}, found {}",
                self.source, self.expected, found
            ),
            None => write!(
                f,
                "could not verify {}: file is unreadable (expected hash {})",
                self.source, self.expected
            ),
        }
    }
}
