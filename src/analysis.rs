use std::sync::Arc;

use crate::color::{ContourColor, assign_colors};
use crate::config::{ConfigBundle, ConfigKind, ConfigSection};
use crate::data::filter::{FilterConfig, SelectionMask, evaluate};
use crate::data::model::MeasurementSource;
use crate::data::stats::{ReportLayout, StatisticsRecord, summarize};
use crate::error::ConfigurationError;

// ---------------------------------------------------------------------------
// DatasetAdapter – one attached measurement
// ---------------------------------------------------------------------------

/// A measurement attached to an analysis, with its fingerprint taken at
/// attach time and any per-dataset overrides of the shared sections.
#[derive(Debug, Clone)]
pub struct DatasetAdapter {
    source: Arc<dyn MeasurementSource>,
    fingerprint: String,
    overrides: ConfigBundle,
}

impl DatasetAdapter {
    fn attach(source: Arc<dyn MeasurementSource>) -> Self {
        let fingerprint = source.fingerprint();
        DatasetAdapter {
            source,
            fingerprint,
            overrides: ConfigBundle::new(),
        }
    }

    pub fn source(&self) -> &dyn MeasurementSource {
        self.source.as_ref()
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Options that differ from the analysis-wide sections.
    pub fn overrides(&self) -> &ConfigBundle {
        &self.overrides
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// An ordered set of measurements sharing one configuration.
///
/// Masks and statistics are computed lazily and cached until the sections
/// they depend on change.
#[derive(Debug)]
pub struct Analysis {
    datasets: Vec<DatasetAdapter>,
    shared: ConfigBundle,
    colors: Vec<ContourColor>,
    masks: Vec<Option<SelectionMask>>,
    records: Vec<Option<StatisticsRecord>>,
}

impl Analysis {
    /// Attach `sources` in order. Each shared kind starts from the built-in
    /// defaults with `inherited[kind]` laid on top, if present.
    pub fn create(
        sources: impl IntoIterator<Item = Arc<dyn MeasurementSource>>,
        inherited: &ConfigBundle,
    ) -> Self {
        let datasets: Vec<DatasetAdapter> = sources.into_iter().map(DatasetAdapter::attach).collect();

        let shared = ConfigKind::SHARED
            .into_iter()
            .map(|kind| {
                let base = ConfigSection::defaults(kind);
                let section = match inherited.get(kind) {
                    Some(prior) => base.merged(prior),
                    None => base,
                };
                (kind, section)
            })
            .collect();

        let n = datasets.len();
        log::info!("new analysis with {n} dataset(s)");
        Analysis {
            datasets,
            shared,
            colors: assign_colors(n, None).unwrap_or_default(),
            masks: vec![None; n],
            records: vec![None; n],
        }
    }

    /// Attach per-dataset overrides without validating them; used when
    /// restoring a saved state whose data may have changed since.
    pub(crate) fn restore_overrides(&mut self, index: usize, overrides: ConfigBundle) {
        if let Some(ds) = self.datasets.get_mut(index) {
            ds.overrides = overrides
                .iter()
                .filter(|(kind, _)| kind.is_shared())
                .map(|(kind, section)| (kind, section.clone()))
                .collect();
            self.invalidate(index);
        }
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn datasets(&self) -> &[DatasetAdapter] {
        &self.datasets
    }

    pub fn dataset(&self, index: usize) -> Result<&DatasetAdapter, ConfigurationError> {
        self.datasets.get(index).ok_or(ConfigurationError::DatasetIndex {
            index,
            len: self.datasets.len(),
        })
    }

    // -- parameters --

    /// Snapshot of a section, used to seed the next analysis.
    ///
    /// Shared kinds return the analysis-wide section; intrinsic kinds return
    /// the first dataset's recorded section.
    pub fn get_parameters(&self, kind: ConfigKind) -> ConfigSection {
        if kind.is_shared() {
            return self.shared.get(kind).cloned().unwrap_or_default();
        }
        self.datasets
            .first()
            .and_then(|ds| ds.source.intrinsic_config().get(kind))
            .cloned()
            .unwrap_or_default()
    }

    /// All shared sections.
    pub fn shared_parameters(&self) -> &ConfigBundle {
        &self.shared
    }

    /// The section in effect for one dataset: shared section plus overrides
    /// for shared kinds, the recorded section for intrinsic ones.
    pub fn effective_parameters(
        &self,
        index: usize,
        kind: ConfigKind,
    ) -> Result<ConfigSection, ConfigurationError> {
        let ds = self.dataset(index)?;
        if !kind.is_shared() {
            return Ok(ds.source.intrinsic_config().get(kind).cloned().unwrap_or_default());
        }
        let base = self.shared.get(kind).cloned().unwrap_or_default();
        Ok(match ds.overrides.get(kind) {
            Some(over) => base.merged(over),
            None => base,
        })
    }

    /// Replace a shared section for the whole analysis.
    ///
    /// The section is checked against every dataset first; on error nothing
    /// changes.
    pub fn set_parameters(
        &mut self,
        kind: ConfigKind,
        section: ConfigSection,
    ) -> Result<(), ConfigurationError> {
        if !kind.is_shared() {
            return Err(ConfigurationError::NotShared(kind.to_string()));
        }
        for ds in &self.datasets {
            let effective = match ds.overrides.get(kind) {
                Some(over) => section.merged(over),
                None => section.clone(),
            };
            check_section(kind, &effective, ds.source())?;
        }
        self.shared.insert(kind, section);
        for index in 0..self.datasets.len() {
            self.invalidate(index);
        }
        log::info!("updated {kind} parameters for {} dataset(s)", self.datasets.len());
        Ok(())
    }

    /// Override options of a shared section for one dataset. An empty
    /// section drops the override; a key set to a non-finite value clears
    /// the shared option for this dataset only.
    pub fn set_dataset_parameters(
        &mut self,
        index: usize,
        kind: ConfigKind,
        overrides: ConfigSection,
    ) -> Result<(), ConfigurationError> {
        if !kind.is_shared() {
            return Err(ConfigurationError::NotShared(kind.to_string()));
        }
        let ds = self.dataset(index)?;
        let base = self.shared.get(kind).cloned().unwrap_or_default();
        check_section(kind, &base.merged(&overrides), ds.source())?;

        let ds = &mut self.datasets[index];
        if overrides.is_empty() {
            ds.overrides.remove(kind);
        } else {
            ds.overrides.insert(kind, overrides);
        }
        self.invalidate(index);
        Ok(())
    }

    // -- results --

    /// Selection mask of one dataset under its effective filtering section.
    pub fn selection(&mut self, index: usize) -> Result<&SelectionMask, ConfigurationError> {
        self.ensure_mask(index)?;
        self.masks[index]
            .as_ref()
            .ok_or(ConfigurationError::DatasetIndex { index, len: self.datasets.len() })
    }

    /// Statistics of one dataset over its selected events.
    pub fn statistics(&mut self, index: usize) -> Result<&StatisticsRecord, ConfigurationError> {
        self.ensure_mask(index)?;
        if self.records[index].is_none() {
            let record = match &self.masks[index] {
                Some(mask) => summarize(self.datasets[index].source(), mask),
                None => return Err(ConfigurationError::DatasetIndex { index, len: self.datasets.len() }),
            };
            self.records[index] = Some(record);
        }
        self.records[index]
            .as_ref()
            .ok_or(ConfigurationError::DatasetIndex { index, len: self.datasets.len() })
    }

    /// Statistics of every dataset, in dataset order.
    pub fn all_statistics(&mut self) -> Result<Vec<StatisticsRecord>, ConfigurationError> {
        (0..self.datasets.len())
            .map(|i| self.statistics(i).cloned())
            .collect()
    }

    /// Header and rows of the statistics table, laid out by the first
    /// dataset's calculation section.
    pub fn statistics_table(&mut self) -> Result<(Vec<String>, Vec<Vec<String>>), ConfigurationError> {
        let layout = self.report_layout()?;
        let rows = self
            .all_statistics()?
            .iter()
            .map(|record| layout.row(record))
            .collect();
        Ok((layout.header(), rows))
    }

    pub(crate) fn report_layout(&self) -> Result<ReportLayout, ConfigurationError> {
        let (calculation, features) = match self.datasets.first() {
            Some(ds) => (
                self.effective_parameters(0, ConfigKind::Calculation)?,
                ds.source.features().to_vec(),
            ),
            None => (self.get_parameters(ConfigKind::Calculation), Vec::new()),
        };
        ReportLayout::from_calculation(&calculation, &features)
    }

    // -- contour colours --

    /// Assign contour colours in dataset order. `None` (or a short list)
    /// auto-assigns the remainder from the palette.
    pub fn set_contour_colors(
        &mut self,
        colors: Option<&[ContourColor]>,
    ) -> Result<(), ConfigurationError> {
        self.colors = assign_colors(self.datasets.len(), colors)?;
        Ok(())
    }

    pub fn get_contour_colors(&self) -> &[ContourColor] {
        &self.colors
    }

    /// Tear the analysis down. Attached sources and cached results are
    /// released; the value cannot be used afterwards.
    pub fn clear(mut self) {
        log::info!("clearing analysis with {} dataset(s)", self.datasets.len());
        self.masks.clear();
        self.records.clear();
        self.datasets.clear();
    }

    fn invalidate(&mut self, index: usize) {
        if let Some(m) = self.masks.get_mut(index) {
            *m = None;
        }
        if let Some(r) = self.records.get_mut(index) {
            *r = None;
        }
    }

    fn ensure_mask(&mut self, index: usize) -> Result<(), ConfigurationError> {
        let filtering = self.effective_parameters(index, ConfigKind::Filtering)?;
        if self.masks[index].is_none() {
            let mask = evaluate(self.datasets[index].source(), &filtering)?;
            self.masks[index] = Some(mask);
        }
        Ok(())
    }
}

/// Validate a shared section against one measurement.
fn check_section(
    kind: ConfigKind,
    section: &ConfigSection,
    source: &dyn MeasurementSource,
) -> Result<(), ConfigurationError> {
    match kind {
        ConfigKind::Filtering => FilterConfig::from_section(section)?.validate(source),
        ConfigKind::Calculation => ReportLayout::from_calculation(section, source.features()).map(|_| ()),
        _ => Ok(()),
    }
}
