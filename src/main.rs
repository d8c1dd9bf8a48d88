//! Command-line front end for rusty-shape.
//!
//! ```bash
//! # statistics of a fresh analysis with default configuration
//! rusty-shape stats m1.tsv m2.tsv --set "filtering.area min=50"
//!
//! # replay the configuration of a saved session over many files
//! rusty-shape batch --session gating.zmso --out report.tsv data/*.tsv
//!
//! # verify that the files a session references are unchanged
//! rusty-shape check gating.zmso
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rusty_shape::config::{ConfigBundle, ConfigKind, ConfigValue};
use rusty_shape::data::loader::open_measurement;
use rusty_shape::{Analysis, BatchRunner, MeasurementSource, Workspace, session};

#[derive(Parser)]
#[command(name = "rusty-shape")]
#[command(about = "Filtering and statistics for flow-microfluidics measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statistics table of the given measurements
    Stats {
        /// Measurement files (.tsv, .csv, .json, .parquet)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override an option, e.g. "filtering.area min=50"
        #[arg(long = "set", value_name = "KIND.KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// Apply one filtering configuration to many files and write a report
    Batch {
        /// Session whose configuration is replayed (defaults otherwise)
        #[arg(long)]
        session: Option<PathBuf>,

        /// Output report (tab-separated)
        #[arg(long, short)]
        out: PathBuf,

        /// Override an option, e.g. "filtering.remove invalid events=false"
        #[arg(long = "set", value_name = "KIND.KEY=VALUE")]
        overrides: Vec<String>,

        /// Measurement files, processed in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Check the fingerprints of the files a session references
    Check {
        /// Session file (.zmso)
        session: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Stats { files, overrides } => print_stats(&files, &overrides),
        Commands::Batch {
            session,
            out,
            overrides,
            files,
        } => run_batch(session.as_deref(), &out, &overrides, &files),
        Commands::Check { session } => check_session(&session),
    }
}

/// Parse `kind.key=value` into a bundle of shared sections.
fn parse_overrides(items: &[String]) -> Result<ConfigBundle> {
    let mut bundle = ConfigBundle::new();
    for item in items {
        let (lhs, value) = item
            .split_once('=')
            .with_context(|| format!("'{item}' is not of the form kind.key=value"))?;
        let (kind, key) = lhs
            .split_once('.')
            .with_context(|| format!("'{lhs}' does not name a section, e.g. filtering.area min"))?;
        let kind: ConfigKind = kind.parse().map_err(anyhow::Error::msg)?;
        if !kind.is_shared() {
            bail!("section '{kind}' is recorded with the data and cannot be overridden");
        }
        bundle
            .section_mut(kind)
            .set(key, ConfigValue::parse_text(value));
    }
    Ok(bundle)
}

fn apply_overrides(analysis: &mut Analysis, overrides: &ConfigBundle) -> Result<()> {
    for (kind, over) in overrides.iter() {
        let section = analysis.get_parameters(kind).merged(over);
        analysis.set_parameters(kind, section)?;
    }
    Ok(())
}

fn print_stats(files: &[PathBuf], overrides: &[String]) -> Result<()> {
    let overrides = parse_overrides(overrides)?;
    let mut sources: Vec<Arc<dyn MeasurementSource>> = Vec::with_capacity(files.len());
    for path in files {
        sources.push(open_measurement(path)?);
    }

    let mut workspace = Workspace::new();
    workspace.new_analysis(sources);
    let Some(analysis) = workspace.analysis_mut() else {
        bail!("no analysis was created");
    };
    apply_overrides(analysis, &overrides)?;

    let (header, rows) = analysis.statistics_table()?;
    println!("{}", header.join("\t"));
    for row in rows {
        println!("{}", row.join("\t"));
    }
    Ok(())
}

fn run_batch(
    session_path: Option<&Path>,
    out: &Path,
    overrides: &[String],
    files: &[PathBuf],
) -> Result<()> {
    let overrides = parse_overrides(overrides)?;

    // Only the configuration of a session is replayed; its data files are
    // opened just to supply a default feature list.
    let (mut config, first_source) = match session_path {
        Some(path) => {
            let loaded = session::load(path)?;
            for w in &loaded.warnings {
                eprintln!("warning: {w}");
            }
            let source = loaded.datasets.first().and_then(|ds| match open_measurement(&ds.path) {
                Ok(source) => Some(source),
                Err(e) => {
                    log::warn!("session data not available, using the batch files: {e}");
                    None
                }
            });
            (loaded.effective_config(), source)
        }
        None => (ConfigBundle::shared_defaults(), None),
    };
    for (kind, over) in overrides.iter() {
        config.section_mut(kind).update(over);
    }

    let features: Vec<String> = first_source
        .or_else(|| files.iter().find_map(|path| open_measurement(path).ok()))
        .map(|source| source.features().to_vec())
        .unwrap_or_default();

    let filtering = config.get(ConfigKind::Filtering).cloned().unwrap_or_default();
    let calculation = config.get(ConfigKind::Calculation).cloned().unwrap_or_default();
    let runner = BatchRunner::from_sections(&filtering, &calculation, &features)?;
    let summary = runner.run(files, out)?;
    println!(
        "Wrote {} row(s) to {} ({} failed)",
        summary.rows,
        summary.output.display(),
        summary.failures.len()
    );
    for (path, message) in &summary.failures {
        eprintln!("  {}: {message}", path.display());
    }
    Ok(())
}

fn check_session(path: &Path) -> Result<()> {
    let loaded = session::load(path)?;
    if loaded.warnings.is_empty() {
        println!("All {} referenced file(s) are unchanged", loaded.datasets.len());
        return Ok(());
    }
    for w in &loaded.warnings {
        println!("{w}");
    }
    bail!(
        "{} of {} referenced file(s) changed or unreadable",
        loaded.warnings.len(),
        loaded.datasets.len()
    )
}
