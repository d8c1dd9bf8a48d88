use std::fmt;
use std::str::FromStr;

use crate::config::{ConfigKind, ConfigSection};
use crate::error::ConfigurationError;

use super::filter::SelectionMask;
use super::model::MeasurementSource;

// ---------------------------------------------------------------------------
// Metric – a computed number or an explicit "no data"
// ---------------------------------------------------------------------------

/// A summary value. Empty selections and missing inputs yield `NoData`
/// instead of a NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Value(f64),
    NoData,
}

impl Metric {
    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::NoData => None,
        }
    }

    pub fn is_no_data(self) -> bool {
        matches!(self, Metric::NoData)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{v}"),
            Metric::NoData => f.write_str("n/a"),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistic – which per-feature summaries exist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Mean,
    Median,
    Sd,
    Min,
    Max,
}

impl Statistic {
    pub fn name(self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::Sd => "sd",
            Statistic::Min => "min",
            Statistic::Max => "max",
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Statistic::Mean),
            "median" => Ok(Statistic::Median),
            "sd" | "std" => Ok(Statistic::Sd),
            "min" => Ok(Statistic::Min),
            "max" => Ok(Statistic::Max),
            other => Err(format!("unknown statistic '{other}'")),
        }
    }
}

/// Summaries of one feature over the selected events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSummary {
    pub mean: Metric,
    pub median: Metric,
    pub sd: Metric,
    pub min: Metric,
    pub max: Metric,
}

impl FeatureSummary {
    const EMPTY: FeatureSummary = FeatureSummary {
        mean: Metric::NoData,
        median: Metric::NoData,
        sd: Metric::NoData,
        min: Metric::NoData,
        max: Metric::NoData,
    };

    /// Summaries over the finite values of `values`.
    fn compute(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        if values.is_empty() {
            return Self::EMPTY;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };
        FeatureSummary {
            mean: Metric::Value(mean),
            median: Metric::Value(median),
            sd: Metric::Value(var.sqrt()),
            min: Metric::Value(values[0]),
            max: Metric::Value(values[values.len() - 1]),
        }
    }

    pub fn get(&self, stat: Statistic) -> Metric {
        match stat {
            Statistic::Mean => self.mean,
            Statistic::Median => self.median,
            Statistic::Sd => self.sd,
            Statistic::Min => self.min,
            Statistic::Max => self.max,
        }
    }
}

// ---------------------------------------------------------------------------
// StatisticsRecord
// ---------------------------------------------------------------------------

/// Computed statistics of one measurement under one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRecord {
    pub name: String,
    /// Events before filtering.
    pub event_count: usize,
    pub selected_count: usize,
    /// `NoData` for a measurement without events.
    pub percent_gated: Metric,
    /// Taken from the setup section.
    pub flow_rate: Metric,
    /// Per-feature summaries in the requested order.
    pub features: Vec<(String, FeatureSummary)>,
}

impl StatisticsRecord {
    pub fn feature(&self, name: &str) -> Option<&FeatureSummary> {
        let name = name.trim().to_lowercase();
        self.features
            .iter()
            .find(|(f, _)| *f == name)
            .map(|(_, s)| s)
    }
}

/// Summarise every feature of a measurement.
pub fn summarize(source: &dyn MeasurementSource, mask: &SelectionMask) -> StatisticsRecord {
    summarize_features(source, mask, source.features())
}

/// Summarise the named features. Features the measurement lacks are
/// reported as `NoData`. Mask entries beyond the event count are ignored.
pub fn summarize_features(
    source: &dyn MeasurementSource,
    mask: &SelectionMask,
    features: &[String],
) -> StatisticsRecord {
    let event_count = source.event_count();
    let flags = mask.as_slice();
    let selected = |i: usize| flags.get(i).copied().unwrap_or(false);
    let selected_count = (0..event_count).filter(|&i| selected(i)).count();

    let percent_gated = if event_count == 0 {
        Metric::NoData
    } else {
        Metric::Value(100.0 * selected_count as f64 / event_count as f64)
    };

    let flow_rate = source
        .intrinsic_config()
        .get(ConfigKind::Setup)
        .and_then(|s| s.get_float("flow rate"))
        .map_or(Metric::NoData, Metric::Value);

    let features = features
        .iter()
        .map(|feature| {
            let summary = match source.column(feature) {
                Some(col) => FeatureSummary::compute(
                    col.iter()
                        .enumerate()
                        .filter(|(i, _)| selected(*i))
                        .map(|(_, v)| *v)
                        .collect(),
                ),
                None => FeatureSummary::EMPTY,
            };
            (feature.to_lowercase(), summary)
        })
        .collect();

    StatisticsRecord {
        name: source.name().to_string(),
        event_count,
        selected_count,
        percent_gated,
        flow_rate,
        features,
    }
}

// ---------------------------------------------------------------------------
// ReportLayout – column layout of statistics tables
// ---------------------------------------------------------------------------

/// Columns of a statistics table: fixed leading metrics followed by one
/// column per (statistic, feature) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub features: Vec<String>,
    pub statistics: Vec<Statistic>,
}

impl ReportLayout {
    pub const LEADING: [&'static str; 4] = ["data set", "%-gated", "events", "flow rate"];

    /// Read `statistics features` and `statistics` from a calculation
    /// section. An empty feature list falls back to `default_features`.
    pub fn from_calculation(
        calculation: &ConfigSection,
        default_features: &[String],
    ) -> Result<Self, ConfigurationError> {
        let mut features = calculation.get_list("statistics features");
        if features.is_empty() {
            features = default_features.iter().map(|f| f.to_lowercase()).collect();
        }
        let statistics = calculation
            .get_list("statistics")
            .iter()
            .map(|s| s.parse::<Statistic>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ConfigurationError::InvalidValue {
                key: "statistics".to_string(),
                reason,
            })?;
        Ok(ReportLayout { features, statistics })
    }

    /// Lower-cased column names.
    pub fn header(&self) -> Vec<String> {
        let mut out: Vec<String> = Self::LEADING.iter().map(|s| s.to_string()).collect();
        for feature in &self.features {
            for stat in &self.statistics {
                out.push(format!("{} {}", stat.name(), feature));
            }
        }
        out
    }

    /// One table row; fields line up with [`ReportLayout::header`].
    pub fn row(&self, record: &StatisticsRecord) -> Vec<String> {
        let mut out = vec![
            record.name.clone(),
            record.percent_gated.to_string(),
            record.event_count.to_string(),
            record.flow_rate.to_string(),
        ];
        for feature in &self.features {
            let summary = record.feature(feature).copied().unwrap_or(FeatureSummary::EMPTY);
            for stat in &self.statistics {
                out.push(summary.get(*stat).to_string());
            }
        }
        out
    }

    pub fn width(&self) -> usize {
        Self::LEADING.len() + self.features.len() * self.statistics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::evaluate;
    use crate::data::model::EventTable;

    fn series() -> EventTable {
        let mut t = EventTable::new(
            "series",
            vec![("area".to_string(), (0..10).map(|i| i as f64 * 30.0).collect())],
        )
        .unwrap();
        t.set_option(ConfigKind::Setup, "flow rate", 0.12);
        t
    }

    #[test]
    fn percent_gated_matches_selection() {
        let mut section = ConfigSection::new();
        section.set("area min", 50.0);
        section.set("area max", 200.0);
        let table = series();
        let mask = evaluate(&table, &section).unwrap();
        let rec = summarize(&table, &mask);
        assert_eq!(rec.event_count, 10);
        assert_eq!(rec.selected_count, 5);
        assert_eq!(rec.percent_gated, Metric::Value(50.0));
        assert_eq!(rec.flow_rate, Metric::Value(0.12));
        let area = rec.feature("area").unwrap();
        assert_eq!(area.mean, Metric::Value(120.0));
        assert_eq!(area.median, Metric::Value(120.0));
        assert_eq!(area.min, Metric::Value(60.0));
        assert_eq!(area.max, Metric::Value(180.0));
    }

    #[test]
    fn empty_selection_reports_no_data() {
        let table = series();
        let mask = SelectionMask::from(vec![false; 10]);
        let rec = summarize(&table, &mask);
        assert_eq!(rec.percent_gated, Metric::Value(0.0));
        assert!(rec.feature("area").unwrap().mean.is_no_data());
    }

    #[test]
    fn empty_dataset_has_sentinel_percentage() {
        let table = EventTable::new("empty", vec![("area".to_string(), vec![])]).unwrap();
        let rec = summarize(&table, &SelectionMask::all(0));
        assert_eq!(rec.percent_gated, Metric::NoData);
        assert_eq!(rec.flow_rate, Metric::NoData);
        assert_eq!(rec.percent_gated.to_string(), "n/a");
    }

    #[test]
    fn even_median_and_population_sd() {
        let table = EventTable::new("m", vec![("x".to_string(), vec![4.0, 1.0, 3.0, 2.0])]).unwrap();
        let rec = summarize(&table, &SelectionMask::all(4));
        let x = rec.feature("x").unwrap();
        assert_eq!(x.median, Metric::Value(2.5));
        let sd = x.sd.value().unwrap();
        assert!((sd - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn layout_header_and_row() {
        let mut calc = ConfigSection::defaults(ConfigKind::Calculation);
        calc.set("statistics", "mean, median");
        let layout = ReportLayout::from_calculation(&calc, &["Area".to_string()]).unwrap();
        assert_eq!(
            layout.header(),
            vec!["data set", "%-gated", "events", "flow rate", "mean area", "median area"]
        );
        let table = series();
        let rec = summarize(&table, &SelectionMask::all(10));
        let row = layout.row(&rec);
        assert_eq!(row, vec!["series", "100", "10", "0.12", "135", "135"]);
        assert_eq!(row.len(), layout.width());
    }

    #[test]
    fn unknown_statistic_is_a_configuration_error() {
        let mut calc = ConfigSection::new();
        calc.set("statistics", "mean, mode");
        assert!(ReportLayout::from_calculation(&calc, &[]).is_err());
    }
}
