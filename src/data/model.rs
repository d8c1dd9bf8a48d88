use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::config::{ConfigBundle, ConfigKind, ConfigSection, ConfigValue};

// ---------------------------------------------------------------------------
// MeasurementSource – the opaque per-event data capability
// ---------------------------------------------------------------------------

/// A measurement as seen by the engine: named numeric event columns, a
/// content fingerprint and the intrinsic configuration recorded with it.
///
/// Implementations are owned by whoever opened them; the engine only holds
/// shared references.
pub trait MeasurementSource: fmt::Debug + Send + Sync {
    /// Display name (file stem for files).
    fn name(&self) -> &str;

    /// File the data was read from, if any.
    fn path(&self) -> Option<&Path>;

    fn event_count(&self) -> usize;

    /// Feature names in column order, lower-cased.
    fn features(&self) -> &[String];

    fn column(&self, feature: &str) -> Option<&[f64]>;

    /// Content-derived identifier. Stable as long as the data is.
    fn fingerprint(&self) -> String;

    /// Mask recorded at acquisition time, if the measurement carries one.
    fn online_filter(&self) -> Option<&[bool]> {
        None
    }

    /// Sections recorded with the data: experiment, imaging, setup,
    /// online_filter.
    fn intrinsic_config(&self) -> &ConfigBundle;

    fn has_feature(&self, feature: &str) -> bool {
        self.column(feature).is_some()
    }
}

// ---------------------------------------------------------------------------
// EventTable – column-oriented in-memory measurement
// ---------------------------------------------------------------------------

/// The loaded measurement with a pre-computed column index.
#[derive(Debug, Clone)]
pub struct EventTable {
    name: String,
    path: Option<PathBuf>,
    /// Ordered list of feature names.
    column_names: Vec<String>,
    columns: BTreeMap<String, Vec<f64>>,
    online_filter: Option<Vec<bool>>,
    config: ConfigBundle,
    /// File digest for file-backed tables; computed from columns otherwise.
    file_fingerprint: Option<String>,
}

impl EventTable {
    /// Build a table from named columns. All columns must have equal length.
    pub fn new(name: &str, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut column_names = Vec::with_capacity(columns.len());
        let mut map = BTreeMap::new();
        let mut len: Option<usize> = None;

        for (col, values) in columns {
            let col = col.trim().to_lowercase();
            match len {
                Some(n) if n != values.len() => {
                    bail!("column '{col}' has {} events, expected {n}", values.len())
                }
                _ => len = Some(values.len()),
            }
            if map.insert(col.clone(), values).is_some() {
                bail!("duplicate column '{col}'");
            }
            column_names.push(col);
        }

        Ok(EventTable {
            name: name.to_string(),
            path: None,
            column_names,
            columns: map,
            online_filter: None,
            config: ConfigBundle::new(),
            file_fingerprint: None,
        })
    }

    /// Attach the file the table was read from, together with its digest.
    pub fn with_file(mut self, path: &Path, fingerprint: String) -> Self {
        self.path = Some(path.to_path_buf());
        self.file_fingerprint = Some(fingerprint);
        self
    }

    pub fn with_online_filter(mut self, mask: Vec<bool>) -> Result<Self> {
        if mask.len() != self.len() {
            bail!(
                "online filter has {} entries but the table holds {} events",
                mask.len(),
                self.len()
            );
        }
        self.online_filter = Some(mask);
        Ok(self)
    }

    /// Record an intrinsic section (experiment, imaging, setup, online_filter).
    pub fn with_section(mut self, kind: ConfigKind, section: ConfigSection) -> Self {
        self.config.insert(kind, section);
        self
    }

    pub fn set_option(&mut self, kind: ConfigKind, key: &str, value: impl Into<ConfigValue>) {
        self.config.section_mut(kind).set(key, value);
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.column_names
            .first()
            .and_then(|c| self.columns.get(c))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MeasurementSource for EventTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn event_count(&self) -> usize {
        self.len()
    }

    fn features(&self) -> &[String] {
        &self.column_names
    }

    fn column(&self, feature: &str) -> Option<&[f64]> {
        self.columns
            .get(&feature.trim().to_lowercase())
            .map(Vec::as_slice)
    }

    fn fingerprint(&self) -> String {
        match &self.file_fingerprint {
            Some(fp) => fp.clone(),
            None => fingerprint_columns(
                self.column_names
                    .iter()
                    .filter_map(|c| self.columns.get(c).map(|v| (c.as_str(), v.as_slice()))),
            ),
        }
    }

    fn online_filter(&self) -> Option<&[bool]> {
        self.online_filter.as_deref()
    }

    fn intrinsic_config(&self) -> &ConfigBundle {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// SHA-256 of a file's bytes, lower-case hex.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 over column names and their little-endian values.
pub fn fingerprint_columns<'a>(columns: impl Iterator<Item = (&'a str, &'a [f64])>) -> String {
    let mut hasher = Sha256::new();
    for (name, values) in columns {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        for v in values {
            hasher.update(v.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
