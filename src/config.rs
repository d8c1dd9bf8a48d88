use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// ConfigValue – a single option value
// ---------------------------------------------------------------------------

/// A dynamically-typed option value.
///
/// Serialised untagged so session documents stay readable:
/// `true`, `3`, `0.12`, `"area,deformation"`, `[0.0, 1.5, ...]`, `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Ranges and polygon vertices. Non-finite entries are written as `null`.
    Floats(#[serde(with = "finite_or_null")] Vec<f64>),
    /// An option cleared on purpose. Laid over another section it removes
    /// the key there.
    Unset,
}

/// `Vec<f64>` with non-finite entries as `null`, read back as NaN.
mod finite_or_null {
    use super::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

impl ConfigValue {
    /// Interpret the value as a float (ints and numeric strings coerce).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as an integer. Floats coerce only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as a bool. Accepts 0/1 and "true"/"false".
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Int(0) => Some(false),
            ConfigValue::Int(1) => Some(true),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            ConfigValue::Floats(v) => Some(v),
            _ => None,
        }
    }

    /// Parse a textual value the way measurement headers spell them.
    pub fn parse_text(s: &str) -> ConfigValue {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return ConfigValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return ConfigValue::Float(f);
        }
        match s.to_ascii_lowercase().as_str() {
            "true" => ConfigValue::Bool(true),
            "false" => ConfigValue::Bool(false),
            _ => ConfigValue::String(s.to_string()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::String(s) => write!(f, "{s}"),
            ConfigValue::Floats(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            ConfigValue::Unset => f.write_str("unset"),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<Vec<f64>> for ConfigValue {
    fn from(v: Vec<f64>) -> Self {
        ConfigValue::Floats(v)
    }
}

// ---------------------------------------------------------------------------
// ConfigKind – the eight section kinds of a dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    Experiment,
    Imaging,
    Setup,
    OnlineFilter,
    Filtering,
    Analysis,
    Calculation,
    Plotting,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 8] = [
        ConfigKind::Experiment,
        ConfigKind::Imaging,
        ConfigKind::Setup,
        ConfigKind::OnlineFilter,
        ConfigKind::Filtering,
        ConfigKind::Analysis,
        ConfigKind::Calculation,
        ConfigKind::Plotting,
    ];

    /// Kinds the user edits once for the whole analysis.
    pub const SHARED: [ConfigKind; 4] = [
        ConfigKind::Analysis,
        ConfigKind::Calculation,
        ConfigKind::Filtering,
        ConfigKind::Plotting,
    ];

    pub fn is_shared(self) -> bool {
        Self::SHARED.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigKind::Experiment => "experiment",
            ConfigKind::Imaging => "imaging",
            ConfigKind::Setup => "setup",
            ConfigKind::OnlineFilter => "online_filter",
            ConfigKind::Filtering => "filtering",
            ConfigKind::Analysis => "analysis",
            ConfigKind::Calculation => "calculation",
            ConfigKind::Plotting => "plotting",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase().replace(' ', "_");
        ConfigKind::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or_else(|| format!("unknown configuration kind '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// ConfigSection – option name → value
// ---------------------------------------------------------------------------

/// A named set of options. Keys are stored lower-cased so lookups are
/// case-insensitive; unknown keys are kept as-is and carried along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ConfigValue>", into = "BTreeMap<String, ConfigValue>")]
pub struct ConfigSection {
    values: BTreeMap<String, ConfigValue>,
}

impl From<BTreeMap<String, ConfigValue>> for ConfigSection {
    fn from(map: BTreeMap<String, ConfigValue>) -> Self {
        let mut section = ConfigSection::new();
        for (key, value) in map {
            section.set(&key, value);
        }
        section
    }
}

impl From<ConfigSection> for BTreeMap<String, ConfigValue> {
    fn from(section: ConfigSection) -> Self {
        section.values
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl ConfigSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults for a kind. Intrinsic kinds start empty.
    pub fn defaults(kind: ConfigKind) -> Self {
        let mut section = ConfigSection::new();
        match kind {
            ConfigKind::Filtering => {
                section.set("enable filters", true);
                section.set("remove invalid events", true);
                section.set("limit events", 0i64);
            }
            ConfigKind::Calculation => {
                section.set("statistics features", "");
                section.set("statistics", "mean, median, sd");
            }
            ConfigKind::Plotting => {
                section.set("axis x", "area");
                section.set("axis y", "deformation");
                section.set("kde", "none");
                section.set("scatter events", 5000i64);
            }
            _ => {}
        }
        section
    }

    /// Set an option. A non-finite float means "unset": the key reads as
    /// absent and, when this section is laid over another, clears it there.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) {
        let value = match value.into() {
            ConfigValue::Float(v) if !v.is_finite() => ConfigValue::Unset,
            value => value,
        };
        self.values.insert(normalize_key(key), value);
    }

    /// Forget an option entirely, including an unset marker.
    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.values.remove(&normalize_key(key))
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values
            .get(&normalize_key(key))
            .filter(|v| !matches!(v, ConfigValue::Unset))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_i64)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ConfigValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    /// A comma-separated string option split into trimmed, lower-cased items.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_str(key)
            .map(|s| {
                s.split(',')
                    .map(|item| item.trim().to_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Options that hold a value; unset markers are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values
            .iter()
            .filter(|(_, v)| !matches!(v, ConfigValue::Unset))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    /// Stored entries, unset markers included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay every option of `other` onto `self`. Keys unset in `other`
    /// are removed.
    pub fn update(&mut self, other: &ConfigSection) {
        for (key, value) in &other.values {
            match value {
                ConfigValue::Unset => {
                    self.values.remove(key);
                }
                _ => {
                    self.values.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Return `self` with `overrides` laid on top.
    pub fn merged(&self, overrides: &ConfigSection) -> ConfigSection {
        let mut out = self.clone();
        out.update(overrides);
        out
    }

    /// Options of `self` that are absent from or different in `base`.
    pub fn difference(&self, base: &ConfigSection) -> ConfigSection {
        let values = self
            .values
            .iter()
            .filter(|(k, v)| base.values.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ConfigSection { values }
    }
}

// ---------------------------------------------------------------------------
// ConfigBundle – kind → section
// ---------------------------------------------------------------------------

/// One section per kind. Missing kinds read as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigBundle {
    sections: BTreeMap<ConfigKind, ConfigSection>,
}

impl ConfigBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults for the shared kinds.
    pub fn shared_defaults() -> Self {
        let sections = ConfigKind::SHARED
            .into_iter()
            .map(|kind| (kind, ConfigSection::defaults(kind)))
            .collect();
        ConfigBundle { sections }
    }

    pub fn get(&self, kind: ConfigKind) -> Option<&ConfigSection> {
        self.sections.get(&kind)
    }

    pub fn section_mut(&mut self, kind: ConfigKind) -> &mut ConfigSection {
        self.sections.entry(kind).or_default()
    }

    /// Replace a whole section.
    pub fn insert(&mut self, kind: ConfigKind, section: ConfigSection) {
        self.sections.insert(kind, section);
    }

    pub fn remove(&mut self, kind: ConfigKind) -> Option<ConfigSection> {
        self.sections.remove(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConfigKind, &ConfigSection)> {
        self.sections.iter().map(|(k, s)| (*k, s))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl FromIterator<(ConfigKind, ConfigSection)> for ConfigBundle {
    fn from_iter<I: IntoIterator<Item = (ConfigKind, ConfigSection)>>(iter: I) -> Self {
        ConfigBundle {
            sections: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut section = ConfigSection::new();
        section.set("Area Min", 50.0);
        assert_eq!(section.get_float("area min"), Some(50.0));
        assert_eq!(section.get_float("AREA MIN"), Some(50.0));
        section.set("area min", 60.0);
        assert_eq!(section.len(), 1);
    }

    #[test]
    fn coercion_and_fallback() {
        let mut section = ConfigSection::new();
        section.set("limit events", "250");
        section.set("flag", 1i64);
        section.set("rate", 3i64);
        assert_eq!(section.get_int("limit events"), Some(250));
        assert_eq!(section.get_bool("flag"), Some(true));
        assert_eq!(section.get_float("rate"), Some(3.0));
        assert_eq!(section.get_float("missing"), None);
        assert_eq!(section.get_bool("rate"), None);
    }

    #[test]
    fn non_finite_float_unsets() {
        let mut section = ConfigSection::new();
        section.set("area max", 200.0);
        section.set("area max", f64::NAN);
        assert!(!section.contains("area max"));
        assert_eq!(section.get_float("area max"), None);
        assert_eq!(section.iter().count(), 0);
        assert!(!section.is_empty());
    }

    #[test]
    fn unset_override_clears_base_option() {
        let mut base = ConfigSection::new();
        base.set("area max", 60.0);
        base.set("area min", 10.0);
        let mut over = ConfigSection::new();
        over.set("area max", f64::INFINITY);
        let merged = base.merged(&over);
        assert_eq!(merged.get_float("area max"), None);
        assert_eq!(merged.get_float("area min"), Some(10.0));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn unset_marker_and_nan_list_survive_json() {
        let mut section = ConfigSection::new();
        section.set("area max", f64::NAN);
        section.set("range x", vec![f64::NAN, 100.0]);
        let json = serde_json::to_string(&section).unwrap();
        assert_eq!(json, r#"{"area max":null,"range x":[null,100.0]}"#);

        let back: ConfigSection = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert!(!back.contains("area max"));
        let range = back.get("range x").and_then(ConfigValue::as_floats).unwrap();
        assert!(range[0].is_nan());
        assert_eq!(range[1], 100.0);
    }

    #[test]
    fn unknown_keys_survive_json() {
        let mut section = ConfigSection::defaults(ConfigKind::Filtering);
        section.set("some future option", "kept");
        section.set("polygon a points", vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let json = serde_json::to_string(&section).unwrap();
        let back: ConfigSection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, section);
    }

    #[test]
    fn deserialized_keys_are_lowercased() {
        let back: ConfigSection = serde_json::from_str(r#"{"Flow Rate": 0.12}"#).unwrap();
        assert_eq!(back.get_float("flow rate"), Some(0.12));
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["flow rate"]);
    }

    #[test]
    fn difference_keeps_changed_options() {
        let base = ConfigSection::defaults(ConfigKind::Filtering);
        let mut edited = base.clone();
        edited.set("remove invalid events", false);
        edited.set("area min", 10.0);
        let diff = edited.difference(&base);
        assert_eq!(diff.len(), 2);
        assert_eq!(base.merged(&diff), edited);
    }

    #[test]
    fn list_option_splits() {
        let mut section = ConfigSection::new();
        section.set("statistics features", " Area, deformation ,");
        assert_eq!(section.get_list("statistics features"), vec!["area", "deformation"]);
    }

    #[test]
    fn kind_parses_from_name() {
        assert_eq!("online filter".parse::<ConfigKind>(), Ok(ConfigKind::OnlineFilter));
        assert_eq!("Filtering".parse::<ConfigKind>(), Ok(ConfigKind::Filtering));
        assert!("bogus".parse::<ConfigKind>().is_err());
    }
}
