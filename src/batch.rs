use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Writer, WriterBuilder};

use crate::analysis::Analysis;
use crate::config::{ConfigKind, ConfigSection};
use crate::data::filter::{FilterConfig, evaluate_config};
use crate::data::loader::open_measurement;
use crate::data::stats::{ReportLayout, StatisticsRecord, summarize_features};
use crate::error::{ConfigurationError, Result};

/// Marker written into every metric column of a failed row.
pub const ERROR_MARKER: &str = "error";

const STATUS_COLUMN: &str = "status";
const STATUS_OK: &str = "ok";

// ---------------------------------------------------------------------------
// BatchRunner – one filtering/calculation setup replayed over many files
// ---------------------------------------------------------------------------

/// Replays one filtering and calculation configuration over a list of
/// measurement files, one report row per file.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    filter: FilterConfig,
    layout: ReportLayout,
}

impl BatchRunner {
    /// Take the configuration in effect for the first dataset of
    /// `reference` (the shared sections if it holds none).
    pub fn new(reference: &Analysis) -> std::result::Result<Self, ConfigurationError> {
        let (filtering, calculation, features) = if reference.is_empty() {
            (
                reference.get_parameters(ConfigKind::Filtering),
                reference.get_parameters(ConfigKind::Calculation),
                Vec::new(),
            )
        } else {
            (
                reference.effective_parameters(0, ConfigKind::Filtering)?,
                reference.effective_parameters(0, ConfigKind::Calculation)?,
                reference.datasets()[0].source().features().to_vec(),
            )
        };
        Self::from_sections(&filtering, &calculation, &features)
    }

    /// Build from explicit sections. `default_features` is used when the
    /// calculation section names no features.
    pub fn from_sections(
        filtering: &ConfigSection,
        calculation: &ConfigSection,
        default_features: &[String],
    ) -> std::result::Result<Self, ConfigurationError> {
        Ok(BatchRunner {
            filter: FilterConfig::from_section(filtering)?,
            layout: ReportLayout::from_calculation(calculation, default_features)?,
        })
    }

    /// Report header: the statistics layout followed by a status column.
    pub fn header(&self) -> Vec<String> {
        let mut header = self.layout.header();
        header.push(STATUS_COLUMN.to_string());
        header
    }

    pub fn layout(&self) -> &ReportLayout {
        &self.layout
    }

    /// Open one file and compute its statistics under the batch filters.
    pub fn process(&self, path: &Path) -> Result<StatisticsRecord> {
        let source = open_measurement(path)?;
        let mask = evaluate_config(source.as_ref(), &self.filter)?;
        Ok(summarize_features(source.as_ref(), &mask, &self.layout.features))
    }

    /// Create `output` and write the header. Files are then fed one at a
    /// time through [`BatchJob::process_file`]; stopping between calls
    /// leaves a well-formed report of the rows written so far.
    pub fn start(&self, output: &Path) -> Result<BatchJob<'_>> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .from_path(output)?;
        writer.write_record(self.header().iter().map(|h| single_field(h)))?;
        writer.flush()?;
        log::info!("batch report started at {}", output.display());
        Ok(BatchJob {
            runner: self,
            writer,
            summary: BatchSummary {
                output: output.to_path_buf(),
                rows: 0,
                failures: Vec::new(),
            },
        })
    }

    /// Process every file in order and write the report to `output`.
    pub fn run<P: AsRef<Path>>(&self, files: &[P], output: &Path) -> Result<BatchSummary> {
        let mut job = self.start(output)?;
        for (i, file) in files.iter().enumerate() {
            log::info!("batch {}/{}: {}", i + 1, files.len(), file.as_ref().display());
            job.process_file(file.as_ref())?;
        }
        job.finish()
    }
}

/// Run a batch with the configuration of `reference`.
pub fn run<P: AsRef<Path>>(reference: &Analysis, files: &[P], output: &Path) -> Result<BatchSummary> {
    BatchRunner::new(reference)?.run(files, output)
}

// ---------------------------------------------------------------------------
// BatchJob – an open report being filled row by row
// ---------------------------------------------------------------------------

pub struct BatchJob<'a> {
    runner: &'a BatchRunner,
    writer: Writer<File>,
    summary: BatchSummary,
}

impl BatchJob<'_> {
    /// Append the row for one file. A file that fails to open or filter
    /// becomes an error row; only failures writing the report itself are
    /// returned. Returns whether the file succeeded.
    pub fn process_file(&mut self, path: &Path) -> Result<bool> {
        let (row, ok) = match self.runner.process(path) {
            Ok(record) => {
                let mut row = self.runner.layout.row(&record);
                row[0] = single_field(&path.display().to_string());
                row.push(STATUS_OK.to_string());
                (row, true)
            }
            Err(e) => {
                let message = e.to_string();
                log::warn!("batch: {} failed: {message}", path.display());
                let row = error_row(path, &message, self.runner.layout.width());
                self.summary.failures.push((path.to_path_buf(), message));
                (row, false)
            }
        };
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.summary.rows += 1;
        Ok(ok)
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.summary.rows
    }

    pub fn finish(mut self) -> Result<BatchSummary> {
        self.writer.flush()?;
        log::info!(
            "batch report {} complete: {} row(s), {} failed",
            self.summary.output.display(),
            self.summary.rows,
            self.summary.failures.len()
        );
        Ok(self.summary)
    }
}

fn error_row(path: &Path, message: &str, width: usize) -> Vec<String> {
    let mut row = Vec::with_capacity(width + 1);
    row.push(single_field(&path.display().to_string()));
    row.extend((1..width).map(|_| ERROR_MARKER.to_string()));
    row.push(format!("{ERROR_MARKER}: {}", single_field(message)));
    row
}

/// Fields are written unquoted: tabs and line breaks become spaces.
fn single_field(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Outcome of a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub output: PathBuf,
    /// Data rows written, successful or not.
    pub rows: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.rows - self.failures.len()
    }
}
