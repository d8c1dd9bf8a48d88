use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::Analysis;
use crate::color::ContourColor;
use crate::config::{ConfigBundle, ConfigKind};
use crate::data::model::MeasurementSource;
use crate::error::{EngineError, HashComparisonWarning, Result};
use crate::session;

// ---------------------------------------------------------------------------
// Workspace – the session-scoped owner of the current analysis
// ---------------------------------------------------------------------------

/// Holds at most one live [`Analysis`], independent of any front end.
///
/// Replacing the analysis builds the new one completely before the old one
/// is cleared and swapped out.
#[derive(Debug, Default)]
pub struct Workspace {
    analysis: Option<Analysis>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn analysis_mut(&mut self) -> Option<&mut Analysis> {
        self.analysis.as_mut()
    }

    /// Shared sections and contour colours of the current analysis, if any.
    fn inheritance(&self) -> (ConfigBundle, Option<Vec<ContourColor>>) {
        match &self.analysis {
            Some(current) => {
                let config = ConfigKind::SHARED
                    .into_iter()
                    .map(|kind| (kind, current.get_parameters(kind)))
                    .collect();
                (config, Some(current.get_contour_colors().to_vec()))
            }
            None => (ConfigBundle::new(), None),
        }
    }

    /// Start a new analysis for `sources`, keeping the filtering, plotting,
    /// analysis and calculation settings and the contour colours of the
    /// current one.
    pub fn new_analysis(&mut self, sources: Vec<Arc<dyn MeasurementSource>>) {
        let (inherited, colors) = self.inheritance();
        let mut next = Analysis::create(sources, &inherited);
        if let Some(colors) = colors {
            let mut preset: Vec<ContourColor> = Vec::with_capacity(colors.len());
            for c in colors {
                // a cycled palette repeats colours; keep the first of each
                if !preset.contains(&c) {
                    preset.push(c);
                }
            }
            if let Err(e) = next.set_contour_colors(Some(&preset)) {
                log::warn!("could not carry over contour colours: {e}");
            }
        }
        self.replace(next);
    }

    /// Restore a saved session. Fingerprint mismatches are returned, not
    /// raised; the data is used as found on disk.
    pub fn open_session(&mut self, path: &Path) -> Result<Vec<HashComparisonWarning>> {
        let loaded = session::load(path)?;
        let warnings = loaded.warnings.clone();
        let next = loaded.into_analysis()?;
        self.replace(next);
        Ok(warnings)
    }

    /// Save the current analysis. Returns the path written, which always
    /// carries the session extension.
    pub fn save_session(&self, path: &Path) -> Result<PathBuf> {
        match &self.analysis {
            Some(analysis) => session::save(analysis, path),
            None => Err(EngineError::NoAnalysis),
        }
    }

    /// Drop the current analysis.
    pub fn close(&mut self) {
        if let Some(old) = self.analysis.take() {
            old.clear();
        }
    }

    fn replace(&mut self, next: Analysis) {
        if let Some(old) = self.analysis.replace(next) {
            old.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::EventTable;

    fn series(name: &str) -> Arc<dyn MeasurementSource> {
        Arc::new(
            EventTable::new(
                name,
                vec![("area".to_string(), (0..10).map(|i| i as f64 * 30.0).collect())],
            )
            .unwrap(),
        )
    }

    #[test]
    fn new_analysis_inherits_settings_and_colors() {
        let mut ws = Workspace::new();
        ws.new_analysis(vec![series("a"), series("b")]);

        let red = ContourColor::new(255, 0, 0);
        let current = ws.analysis_mut().unwrap();
        current.set_contour_colors(Some(&[red])).unwrap();
        let mut filtering = current.get_parameters(ConfigKind::Filtering);
        filtering.set("area max", 100.0);
        current.set_parameters(ConfigKind::Filtering, filtering).unwrap();

        ws.new_analysis(vec![series("c"), series("d"), series("e")]);
        let next = ws.analysis_mut().unwrap();
        assert_eq!(next.len(), 3);
        assert_eq!(next.get_contour_colors()[0], red);
        assert_eq!(
            next.get_parameters(ConfigKind::Filtering).get_float("area max"),
            Some(100.0)
        );
        assert_eq!(next.selection(2).unwrap().selected_count(), 4);
    }

    #[test]
    fn many_datasets_keep_working_after_cycling() {
        let mut ws = Workspace::new();
        ws.new_analysis((0..12).map(|i| series(&format!("s{i}"))).collect());
        ws.new_analysis((0..12).map(|i| series(&format!("t{i}"))).collect());
        assert_eq!(ws.analysis().unwrap().get_contour_colors().len(), 12);
    }

    #[test]
    fn close_and_save_without_analysis() {
        let mut ws = Workspace::new();
        ws.new_analysis(vec![series("a")]);
        ws.close();
        assert!(ws.analysis().is_none());
        assert!(ws.save_session(Path::new("nowhere.zmso")).is_err());
    }
}
