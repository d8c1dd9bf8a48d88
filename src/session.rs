//! Session files (`.zmso`).
//!
//! A session records everything needed to rebuild an [`Analysis`]: the
//! shared sections, and for each dataset in order its file, the file's
//! SHA-256 at save time, per-dataset overrides and contour colour.
//!
//! ```json
//! {
//!   "version": 1,
//!   "config": { "filtering": { "area min": 50.0, ... }, ... },
//!   "datasets": [
//!     { "path": "m1.tsv", "fingerprint": "ba78…", "overrides": {}, "color": "#bf2e2e" }
//!   ]
//! }
//! ```
//!
//! Loading never rejects changed data: each mismatching file yields a
//! [`HashComparisonWarning`] and the data is used as found.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::analysis::Analysis;
use crate::color::ContourColor;
use crate::config::{ConfigBundle, ConfigKind, ConfigSection};
use crate::data::loader::open_measurement;
use crate::data::model::{MeasurementSource, fingerprint_file};
use crate::error::{EngineError, HashComparisonWarning, Result, SessionFormatError};

pub const SESSION_VERSION: u64 = 1;
pub const SESSION_EXTENSION: &str = "zmso";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SessionDocument {
    version: u64,
    /// Kind name → section. Kept as strings so unknown kinds do not fail.
    config: BTreeMap<String, ConfigSection>,
    datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DatasetEntry {
    path: String,
    fingerprint: String,
    #[serde(default)]
    overrides: BTreeMap<String, ConfigSection>,
    #[serde(default)]
    color: Option<ContourColor>,
}

/// A dataset reference read back from a session.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRef {
    /// Resolved against the session's directory.
    pub path: PathBuf,
    /// Fingerprint recorded at save time.
    pub fingerprint: String,
    pub overrides: ConfigBundle,
    pub color: Option<ContourColor>,
}

/// Result of [`load`]: configuration, dataset references and the
/// fingerprint warnings collected while checking them.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub config: ConfigBundle,
    pub datasets: Vec<DatasetRef>,
    pub warnings: Vec<HashComparisonWarning>,
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// Write `analysis` to `path`, adding the `.zmso` extension if missing.
/// Returns the path actually written.
pub fn save(analysis: &Analysis, path: &Path) -> Result<PathBuf> {
    let path = with_session_extension(path);
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let config = analysis
        .shared_parameters()
        .iter()
        .map(|(kind, section)| (kind.name().to_string(), section.clone()))
        .collect();

    let colors = analysis.get_contour_colors();
    let mut datasets = Vec::with_capacity(analysis.len());
    for (index, ds) in analysis.datasets().iter().enumerate() {
        let source_path = ds
            .source()
            .path()
            .ok_or_else(|| EngineError::UnsavableSource(ds.name().to_string()))?;
        datasets.push(DatasetEntry {
            path: reference_for(source_path, &base),
            fingerprint: ds.fingerprint().to_string(),
            overrides: ds
                .overrides()
                .iter()
                .map(|(kind, section)| (kind.name().to_string(), section.clone()))
                .collect(),
            color: colors.get(index).copied(),
        });
    }

    let doc = SessionDocument {
        version: SESSION_VERSION,
        config,
        datasets,
    };
    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(&path, json)?;
    log::info!("saved session with {} dataset(s) to {}", analysis.len(), path.display());
    Ok(path)
}

fn with_session_extension(path: &Path) -> PathBuf {
    let has_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SESSION_EXTENSION));
    if has_ext {
        path.to_path_buf()
    } else {
        let mut s = path.as_os_str().to_os_string();
        s.push(".");
        s.push(SESSION_EXTENSION);
        PathBuf::from(s)
    }
}

/// Relative to `base` when the file lives below it, absolute otherwise.
fn reference_for(source: &Path, base: &Path) -> String {
    let absolute = fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    let base_abs = fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
    match absolute.strip_prefix(&base_abs) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => absolute.to_string_lossy().into_owned(),
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read a session and check every referenced file against its recorded
/// fingerprint.
///
/// Structural problems are fatal ([`SessionFormatError`]); changed or
/// unreadable data files only produce warnings.
pub fn load(path: &Path) -> Result<LoadedSession> {
    let text = fs::read_to_string(path)?;
    let doc = parse_document(&text)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let config = bundle_from_names(&doc.config, "config");

    let mut datasets = Vec::with_capacity(doc.datasets.len());
    let mut warnings = Vec::new();
    for (index, entry) in doc.datasets.into_iter().enumerate() {
        if entry.path.trim().is_empty() {
            return Err(SessionFormatError::InvalidEntry {
                index,
                reason: "empty path".to_string(),
            }
            .into());
        }
        let reference = PathBuf::from(&entry.path);
        let resolved = if reference.is_absolute() {
            reference
        } else {
            base.join(reference)
        };

        let found = fingerprint_file(&resolved).ok();
        if found.as_deref() != Some(entry.fingerprint.as_str()) {
            let warning = HashComparisonWarning {
                source: resolved.display().to_string(),
                expected: entry.fingerprint.clone(),
                found,
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }

        datasets.push(DatasetRef {
            path: resolved,
            fingerprint: entry.fingerprint,
            overrides: bundle_from_names(&entry.overrides, &format!("dataset {index}")),
            color: entry.color,
        });
    }

    log::info!(
        "loaded session {} ({} dataset(s), {} warning(s))",
        path.display(),
        datasets.len(),
        warnings.len()
    );
    Ok(LoadedSession {
        config,
        datasets,
        warnings,
    })
}

fn parse_document(text: &str) -> std::result::Result<SessionDocument, SessionFormatError> {
    let root: JsonValue = serde_json::from_str(text)?;
    let obj = root.as_object().ok_or(SessionFormatError::MissingKey("version"))?;

    let version = obj
        .get("version")
        .ok_or(SessionFormatError::MissingKey("version"))?
        .as_u64()
        .ok_or(SessionFormatError::UnsupportedVersion {
            found: 0,
            supported: SESSION_VERSION,
        })?;
    if version != SESSION_VERSION {
        return Err(SessionFormatError::UnsupportedVersion {
            found: version,
            supported: SESSION_VERSION,
        });
    }
    for key in ["config", "datasets"] {
        if !obj.contains_key(key) {
            return Err(SessionFormatError::MissingKey(key));
        }
    }
    Ok(serde_json::from_value(root)?)
}

/// Keep the kinds this build knows; unknown ones are logged and skipped.
fn bundle_from_names(sections: &BTreeMap<String, ConfigSection>, context: &str) -> ConfigBundle {
    sections
        .iter()
        .filter_map(|(name, section)| match name.parse::<ConfigKind>() {
            Ok(kind) => Some((kind, section.clone())),
            Err(_) => {
                log::warn!("{context}: ignoring unknown section '{name}'");
                None
            }
        })
        .collect()
}

impl LoadedSession {
    /// Shared sections in effect for the first dataset: built-in defaults,
    /// then the session's shared sections, then that dataset's overrides.
    /// Needs none of the referenced files.
    pub fn effective_config(&self) -> ConfigBundle {
        let first = self.datasets.first().map(|ds| &ds.overrides);
        ConfigBundle::shared_defaults()
            .iter()
            .map(|(kind, base)| {
                let mut section = base.clone();
                if let Some(saved) = self.config.get(kind) {
                    section.update(saved);
                }
                if let Some(over) = first.and_then(|o| o.get(kind)) {
                    section.update(over);
                }
                (kind, section)
            })
            .collect()
    }

    /// Open every referenced file and rebuild the analysis in saved order.
    pub fn into_analysis(self) -> Result<Analysis> {
        let mut sources: Vec<Arc<dyn MeasurementSource>> = Vec::with_capacity(self.datasets.len());
        for ds in &self.datasets {
            sources.push(open_measurement(&ds.path)?);
        }

        let mut analysis = Analysis::create(sources, &self.config);
        for (index, ds) in self.datasets.iter().enumerate() {
            if !ds.overrides.is_empty() {
                analysis.restore_overrides(index, ds.overrides.clone());
            }
        }

        // A cycled palette repeats; the distinct prefix reproduces it.
        let mut preset: Vec<ContourColor> = Vec::new();
        for color in self.datasets.iter().map_while(|ds| ds.color) {
            if preset.contains(&color) {
                break;
            }
            preset.push(color);
        }
        analysis.set_contour_colors(Some(&preset))?;
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_appended_once() {
        assert_eq!(with_session_extension(Path::new("a/b")), PathBuf::from("a/b.zmso"));
        assert_eq!(with_session_extension(Path::new("a/b.zmso")), PathBuf::from("a/b.zmso"));
        assert_eq!(with_session_extension(Path::new("a/b.ZMSO")), PathBuf::from("a/b.ZMSO"));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_document(r#"{"version": 7, "config": {}, "datasets": []}"#).unwrap_err();
        assert!(matches!(
            err,
            SessionFormatError::UnsupportedVersion { found: 7, supported: 1 }
        ));
    }

    #[test]
    fn rejects_missing_keys_and_bad_json() {
        assert!(matches!(
            parse_document(r#"{"config": {}, "datasets": []}"#),
            Err(SessionFormatError::MissingKey("version"))
        ));
        assert!(matches!(
            parse_document(r#"{"version": 1, "config": {}}"#),
            Err(SessionFormatError::MissingKey("datasets"))
        ));
        assert!(matches!(parse_document("not json"), Err(SessionFormatError::Json(_))));
        assert!(matches!(
            parse_document(r#"{"version": 1, "config": {}, "datasets": [{"path": 3}]}"#),
            Err(SessionFormatError::Json(_))
        ));
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let mut sections = BTreeMap::new();
        sections.insert("filtering".to_string(), ConfigSection::new());
        sections.insert("hologram".to_string(), ConfigSection::new());
        let bundle = bundle_from_names(&sections, "test");
        assert!(bundle.get(ConfigKind::Filtering).is_some());
        assert_eq!(bundle.iter().count(), 1);
    }

    #[test]
    fn effective_config_layers_defaults_session_and_first_overrides() {
        let mut config = ConfigBundle::new();
        config.section_mut(ConfigKind::Filtering).set("area min", 50.0);
        config.section_mut(ConfigKind::Filtering).set("area max", 200.0);

        let mut first = ConfigBundle::new();
        first.section_mut(ConfigKind::Filtering).set("deformation max", 0.1);
        first.section_mut(ConfigKind::Filtering).set("area max", f64::NAN);
        let mut second = ConfigBundle::new();
        second.section_mut(ConfigKind::Filtering).set("area min", 150.0);

        let loaded = LoadedSession {
            config,
            datasets: vec![
                DatasetRef {
                    path: PathBuf::from("/nowhere/a.tsv"),
                    fingerprint: String::new(),
                    overrides: first,
                    color: None,
                },
                DatasetRef {
                    path: PathBuf::from("/nowhere/b.tsv"),
                    fingerprint: String::new(),
                    overrides: second,
                    color: None,
                },
            ],
            warnings: Vec::new(),
        };

        let bundle = loaded.effective_config();
        let filtering = bundle.get(ConfigKind::Filtering).unwrap();
        assert_eq!(filtering.get_float("area min"), Some(50.0));
        assert_eq!(filtering.get_float("area max"), None);
        assert_eq!(filtering.get_float("deformation max"), Some(0.1));
        assert_eq!(
            filtering.get_bool("enable filters"),
            ConfigSection::defaults(ConfigKind::Filtering).get_bool("enable filters")
        );
        for kind in ConfigKind::SHARED {
            assert!(bundle.get(kind).is_some(), "{kind}");
        }
    }

    #[test]
    fn reference_is_relative_below_base() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("data");
        fs::create_dir(&sub).unwrap();
        let file = sub.join("m.tsv");
        fs::write(&file, "area\n1\n").unwrap();
        let rel = reference_for(&file, dir.path());
        assert_eq!(PathBuf::from(rel), PathBuf::from("data").join("m.tsv"));

        let other = tempfile::tempdir().unwrap();
        let abs = reference_for(&file, other.path());
        assert!(Path::new(&abs).is_absolute());
    }
}
