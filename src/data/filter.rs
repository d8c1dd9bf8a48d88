use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ConfigSection, ConfigValue};
use crate::error::ConfigurationError;

use super::model::MeasurementSource;

// ---------------------------------------------------------------------------
// SelectionMask – which events pass the filters
// ---------------------------------------------------------------------------

/// One flag per event. Derived from the filtering section, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask(Vec<bool>);

impl SelectionMask {
    pub fn all(len: usize) -> Self {
        SelectionMask(vec![true; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of selected events.
    pub fn selected_count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Indices of the selected events.
    pub fn indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
            .collect()
    }
}

impl From<Vec<bool>> for SelectionMask {
    fn from(v: Vec<bool>) -> Self {
        SelectionMask(v)
    }
}

// ---------------------------------------------------------------------------
// Filter configuration parsed from the filtering section
// ---------------------------------------------------------------------------

/// Inclusive range on one feature. `None` bounds are open.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub feature: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RangeFilter {
    fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn accepts(&self, v: f64) -> bool {
        self.min.map_or(true, |m| v >= m) && self.max.map_or(true, |m| v <= m)
    }
}

/// Closed region in the plane spanned by two features.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFilter {
    pub name: String,
    pub x_feature: String,
    pub y_feature: String,
    pub points: Vec<(f64, f64)>,
    /// Select the events outside the polygon instead.
    pub inverted: bool,
}

impl PolygonFilter {
    /// Point-in-polygon by ray casting; points on an edge count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i];
            let (xj, yj) = self.points[j];
            if on_segment((xi, yi), (xj, yj), (x, y)) {
                return true;
            }
            if (yi > y) != (yj > y) {
                let x_cross = xj + (y - yj) * (xi - xj) / (yi - yj);
                if x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let scale = (b.0 - a.0).abs() + (b.1 - a.1).abs();
    if cross.abs() > 1e-12 * scale.max(1.0) {
        return false;
    }
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

const POLYGON_PREFIX: &str = "polygon ";

/// Typed view of a filtering section.
///
/// Recognised options:
/// * `enable filters` – master switch for range, polygon and invalid filtering
/// * `remove invalid events` – drop events with non-finite values in filtered features
/// * `limit events` – keep only the first N selected events (0 = all)
/// * `<feature> min` / `<feature> max` – inclusive range bounds
/// * `polygon <name> axes` / `points` / `inverted` – polygon filters
///
/// Everything else is carried in the section but ignored here.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub enabled: bool,
    pub remove_invalid: bool,
    pub limit_events: usize,
    pub ranges: Vec<RangeFilter>,
    pub polygons: Vec<PolygonFilter>,
}

impl FilterConfig {
    pub fn from_section(section: &ConfigSection) -> Result<Self, ConfigurationError> {
        let enabled = bool_option(section, "enable filters", true)?;
        let remove_invalid = bool_option(section, "remove invalid events", true)?;
        let limit_events = match section.get("limit events") {
            None => 0,
            Some(v) => match v.as_i64() {
                Some(n) if n >= 0 => n as usize,
                _ => return Err(invalid("limit events", "expected a non-negative integer")),
            },
        };

        let mut ranges: BTreeMap<String, RangeFilter> = BTreeMap::new();
        let mut polygon_keys: BTreeMap<String, PolygonParts> = BTreeMap::new();

        for (key, value) in section.iter() {
            if let Some(rest) = key.strip_prefix(POLYGON_PREFIX) {
                collect_polygon_part(&mut polygon_keys, rest, key, value)?;
                continue;
            }
            let (feature, is_min) = if let Some(f) = key.strip_suffix(" min") {
                (f, true)
            } else if let Some(f) = key.strip_suffix(" max") {
                (f, false)
            } else {
                continue;
            };
            let bound = value
                .as_f64()
                .ok_or_else(|| invalid(key, &format!("expected a number, got '{value}'")))?;
            let bound = bound.is_finite().then_some(bound);
            let entry = ranges.entry(feature.to_string()).or_insert_with(|| RangeFilter {
                feature: feature.to_string(),
                min: None,
                max: None,
            });
            if is_min {
                entry.min = bound;
            } else {
                entry.max = bound;
            }
        }

        for range in ranges.values() {
            if let (Some(lo), Some(hi)) = (range.min, range.max) {
                if lo > hi {
                    return Err(invalid(
                        &format!("{} min", range.feature),
                        &format!("lower bound {lo} exceeds upper bound {hi}"),
                    ));
                }
            }
        }

        let polygons = polygon_keys
            .into_iter()
            .map(|(name, parts)| parts.build(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilterConfig {
            enabled,
            remove_invalid,
            limit_events,
            ranges: ranges.into_values().filter(RangeFilter::is_active).collect(),
            polygons,
        })
    }

    /// Features that active filters read.
    pub fn referenced_features(&self) -> BTreeSet<String> {
        if !self.enabled {
            return BTreeSet::new();
        }
        let mut out: BTreeSet<String> = self.ranges.iter().map(|r| r.feature.clone()).collect();
        for p in &self.polygons {
            out.insert(p.x_feature.clone());
            out.insert(p.y_feature.clone());
        }
        out
    }

    /// Fail if the measurement lacks a feature an active filter needs.
    pub fn validate(&self, source: &dyn MeasurementSource) -> Result<(), ConfigurationError> {
        match self
            .referenced_features()
            .into_iter()
            .find(|f| !source.has_feature(f))
        {
            Some(feature) => Err(ConfigurationError::MissingFeature {
                feature,
                dataset: source.name().to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct PolygonParts {
    axes: Option<(String, String)>,
    points: Option<Vec<f64>>,
    inverted: bool,
}

impl PolygonParts {
    fn build(self, name: String) -> Result<PolygonFilter, ConfigurationError> {
        let malformed = |reason: &str| ConfigurationError::MalformedPolygon {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let (x_feature, y_feature) = self.axes.ok_or_else(|| malformed("missing axes"))?;
        let flat = self.points.ok_or_else(|| malformed("missing points"))?;
        if flat.len() % 2 != 0 {
            return Err(malformed("odd number of coordinates"));
        }
        if flat.len() < 6 {
            return Err(malformed("fewer than three vertices"));
        }
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(malformed("non-finite vertex"));
        }
        let points = flat.chunks_exact(2).map(|c| (c[0], c[1])).collect();
        Ok(PolygonFilter {
            name,
            x_feature,
            y_feature,
            points,
            inverted: self.inverted,
        })
    }
}

fn collect_polygon_part(
    parts: &mut BTreeMap<String, PolygonParts>,
    rest: &str,
    key: &str,
    value: &ConfigValue,
) -> Result<(), ConfigurationError> {
    if let Some(name) = rest.strip_suffix(" axes") {
        let axes: Vec<String> = value
            .as_str()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let [x, y] = <[String; 2]>::try_from(axes)
            .map_err(|_| invalid(key, "expected two comma-separated feature names"))?;
        parts.entry(name.to_string()).or_default().axes = Some((x, y));
    } else if let Some(name) = rest.strip_suffix(" points") {
        let points = value
            .as_floats()
            .ok_or_else(|| invalid(key, "expected a list of coordinates"))?;
        parts.entry(name.to_string()).or_default().points = Some(points.to_vec());
    } else if let Some(name) = rest.strip_suffix(" inverted") {
        let inverted = value
            .as_bool()
            .ok_or_else(|| invalid(key, "expected true or false"))?;
        parts.entry(name.to_string()).or_default().inverted = inverted;
    }
    Ok(())
}

fn bool_option(section: &ConfigSection, key: &str, default: bool) -> Result<bool, ConfigurationError> {
    match section.get(key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| invalid(key, "expected true or false")),
    }
}

fn invalid(key: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Compute the selection mask of a measurement under a filtering section.
///
/// All active constraints are AND-ed together with the online filter. The
/// configuration is checked against the measurement before any work is done.
pub fn evaluate(
    source: &dyn MeasurementSource,
    filtering: &ConfigSection,
) -> Result<SelectionMask, ConfigurationError> {
    let config = FilterConfig::from_section(filtering)?;
    evaluate_config(source, &config)
}

/// [`evaluate`] with an already parsed configuration.
pub fn evaluate_config(
    source: &dyn MeasurementSource,
    config: &FilterConfig,
) -> Result<SelectionMask, ConfigurationError> {
    config.validate(source)?;

    let n = source.event_count();
    let mut mask = match source.online_filter() {
        Some(online) => online.to_vec(),
        None => vec![true; n],
    };

    if config.enabled {
        for range in &config.ranges {
            let col = feature_column(source, &range.feature)?;
            for (keep, &v) in mask.iter_mut().zip(col) {
                *keep = *keep && range.accepts(v);
            }
        }

        for polygon in &config.polygons {
            let xs = feature_column(source, &polygon.x_feature)?;
            let ys = feature_column(source, &polygon.y_feature)?;
            for ((keep, &x), &y) in mask.iter_mut().zip(xs).zip(ys) {
                *keep = *keep && (polygon.contains(x, y) != polygon.inverted);
            }
        }

        if config.remove_invalid {
            for feature in config.referenced_features() {
                let col = feature_column(source, &feature)?;
                for (keep, &v) in mask.iter_mut().zip(col) {
                    *keep = *keep && v.is_finite();
                }
            }
        }

        if config.limit_events > 0 {
            let mut seen = 0usize;
            for keep in mask.iter_mut().filter(|k| **k) {
                seen += 1;
                if seen > config.limit_events {
                    *keep = false;
                }
            }
        }
    }

    let mask = SelectionMask(mask);
    log::debug!(
        "{}: {} of {} events selected",
        source.name(),
        mask.selected_count(),
        n
    );
    Ok(mask)
}

fn feature_column<'a>(
    source: &'a dyn MeasurementSource,
    feature: &str,
) -> Result<&'a [f64], ConfigurationError> {
    source
        .column(feature)
        .ok_or_else(|| ConfigurationError::MissingFeature {
            feature: feature.to_string(),
            dataset: source.name().to_string(),
        })
}
