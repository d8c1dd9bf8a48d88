use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusty_shape::data::loader::{open_measurement, write_tsv};
use rusty_shape::{
    BatchRunner, ConfigKind, ConfigSection, ContourColor, EngineError, EventTable,
    MeasurementSource, SessionFormatError, Workspace, session,
};

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/m156.tsv")
}

/// Two measurement files inside `dir`: a copy of the fixture and a small
/// generated one.
fn measurements(dir: &Path) -> Vec<PathBuf> {
    let a = dir.join("m156.tsv");
    fs::copy(fixture(), &a).unwrap();

    let b = dir.join("small.tsv");
    let mut table = EventTable::new(
        "small",
        vec![
            ("area".to_string(), (0..10).map(|i| i as f64 * 30.0).collect()),
            ("deformation".to_string(), (0..10).map(|i| 0.01 + i as f64 * 0.02).collect()),
        ],
    )
    .unwrap();
    table.set_option(ConfigKind::Setup, "flow rate", 0.04);
    write_tsv(&table, &b).unwrap();
    vec![a, b]
}

fn open_all(paths: &[PathBuf]) -> Vec<Arc<dyn MeasurementSource>> {
    paths
        .iter()
        .map(|p| open_measurement(p).unwrap() as Arc<dyn MeasurementSource>)
        .collect()
}

/// Workspace with gating, an override and a custom colour applied.
fn configured_workspace(paths: &[PathBuf]) -> Workspace {
    let mut ws = Workspace::new();
    ws.new_analysis(open_all(paths));
    let analysis = ws.analysis_mut().unwrap();

    let mut filtering = analysis.get_parameters(ConfigKind::Filtering);
    filtering.set("area min", 50.0);
    filtering.set("area max", 200.0);
    analysis.set_parameters(ConfigKind::Filtering, filtering).unwrap();

    let mut over = ConfigSection::new();
    over.set("deformation max", 0.1);
    analysis.set_dataset_parameters(1, ConfigKind::Filtering, over).unwrap();

    let mut analysis_section = analysis.get_parameters(ConfigKind::Analysis);
    analysis_section.set("contour accuracy", 0.05);
    analysis.set_parameters(ConfigKind::Analysis, analysis_section).unwrap();

    analysis
        .set_contour_colors(Some(&[ContourColor::new(10, 20, 30)]))
        .unwrap();
    ws
}

#[test]
fn save_then_open_restores_the_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let mut ws = configured_workspace(&paths);

    let written = ws.save_session(&dir.path().join("gating")).unwrap();
    assert_eq!(written, dir.path().join("gating.zmso"));

    let before = ws.analysis_mut().unwrap().all_statistics().unwrap();
    let colors = ws.analysis().unwrap().get_contour_colors().to_vec();

    let mut restored = Workspace::new();
    let warnings = restored.open_session(&written).unwrap();
    assert!(warnings.is_empty(), "{warnings:?}");

    let analysis = restored.analysis_mut().unwrap();
    assert_eq!(analysis.len(), 2);
    assert_eq!(analysis.datasets()[0].name(), "m156");
    assert_eq!(analysis.datasets()[1].name(), "small");
    assert_eq!(analysis.get_contour_colors(), &colors[..]);
    assert_eq!(
        analysis.get_parameters(ConfigKind::Analysis).get_float("contour accuracy"),
        Some(0.05)
    );
    assert_eq!(
        analysis
            .effective_parameters(1, ConfigKind::Filtering)
            .unwrap()
            .get_float("deformation max"),
        Some(0.1)
    );
    assert_eq!(analysis.all_statistics().unwrap(), before);
}

#[test]
fn auto_bounds_and_cleared_overrides_survive_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let mut ws = configured_workspace(&paths);
    let analysis = ws.analysis_mut().unwrap();

    let mut plotting = analysis.get_parameters(ConfigKind::Plotting);
    plotting.set("range x", vec![f64::NAN, 100.0]);
    analysis.set_parameters(ConfigKind::Plotting, plotting).unwrap();

    let mut over = ConfigSection::new();
    over.set("deformation max", 0.1);
    over.set("area min", f64::NAN);
    analysis.set_dataset_parameters(1, ConfigKind::Filtering, over).unwrap();
    let before = analysis.all_statistics().unwrap();

    let written = ws.save_session(&dir.path().join("auto")).unwrap();
    let mut restored = Workspace::new();
    restored.open_session(&written).unwrap();
    let analysis = restored.analysis_mut().unwrap();

    let range = analysis
        .get_parameters(ConfigKind::Plotting)
        .get("range x")
        .and_then(|v| v.as_floats().map(<[f64]>::to_vec))
        .unwrap();
    assert_eq!(range.len(), 2);
    assert!(range[0].is_nan());
    assert_eq!(range[1], 100.0);

    let first = analysis.effective_parameters(0, ConfigKind::Filtering).unwrap();
    assert_eq!(first.get_float("area min"), Some(50.0));
    let second = analysis.effective_parameters(1, ConfigKind::Filtering).unwrap();
    assert_eq!(second.get_float("area min"), None);
    assert_eq!(second.get_float("area max"), Some(200.0));
    assert_eq!(analysis.all_statistics().unwrap(), before);
}

#[test]
fn session_configuration_is_usable_without_its_data() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let ws = configured_workspace(&paths);
    let written = ws.save_session(&dir.path().join("s")).unwrap();
    for path in &paths {
        fs::remove_file(path).unwrap();
    }

    let loaded = session::load(&written).unwrap();
    assert_eq!(loaded.warnings.len(), 2);
    let config = loaded.effective_config();
    let filtering = config.get(ConfigKind::Filtering).unwrap();
    assert_eq!(filtering.get_float("area min"), Some(50.0));
    assert_eq!(filtering.get_float("area max"), Some(200.0));

    let runner = BatchRunner::from_sections(
        filtering,
        config.get(ConfigKind::Calculation).unwrap(),
        &["area".to_string()],
    )
    .unwrap();
    let record = runner.process(&fixture()).unwrap();
    assert_eq!(record.event_count, 156);
}

#[test]
fn sources_are_stored_relative_to_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let ws = configured_workspace(&paths);
    let written = ws.save_session(&dir.path().join("s.zmso")).unwrap();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&written).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["datasets"][0]["path"], "m156.tsv");
    assert_eq!(doc["datasets"][1]["path"], "small.tsv");

    // moving the whole directory keeps the session usable
    let moved = tempfile::tempdir().unwrap();
    for name in ["s.zmso", "m156.tsv", "small.tsv"] {
        fs::copy(dir.path().join(name), moved.path().join(name)).unwrap();
    }
    let loaded = session::load(&moved.path().join("s.zmso")).unwrap();
    assert!(loaded.warnings.is_empty());
    assert_eq!(loaded.datasets[0].path, moved.path().join("m156.tsv"));
}

#[test]
fn modified_source_yields_a_warning_but_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let ws = configured_workspace(&paths);
    let written = ws.save_session(&dir.path().join("s")).unwrap();

    let mut f = fs::OpenOptions::new().append(true).open(&paths[1]).unwrap();
    writeln!(f, "300\t0.2").unwrap();
    drop(f);

    let mut restored = Workspace::new();
    let warnings = restored.open_session(&written).unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].source.ends_with("small.tsv"));
    assert!(warnings[0].found.is_some());
    assert_ne!(warnings[0].found.as_deref(), Some(warnings[0].expected.as_str()));

    let analysis = restored.analysis().unwrap();
    assert_eq!(analysis.datasets()[1].source().event_count(), 11);
}

#[test]
fn missing_source_warns_then_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let paths = measurements(dir.path());
    let ws = configured_workspace(&paths);
    let written = ws.save_session(&dir.path().join("s")).unwrap();
    fs::remove_file(&paths[0]).unwrap();

    let loaded = session::load(&written).unwrap();
    assert_eq!(loaded.warnings.len(), 1);
    assert_eq!(loaded.warnings[0].found, None);

    let mut other = configured_workspace(&[fixture(), paths[1].clone()]);
    assert!(matches!(
        other.open_session(&written),
        Err(EngineError::Measurement { .. })
    ));
    // the live analysis survives a failed open
    assert_eq!(other.analysis().unwrap().len(), 2);
    assert_eq!(other.analysis_mut().unwrap().statistics(0).unwrap().event_count, 156);
}

#[test]
fn corrupt_sessions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.zmso");

    fs::write(&path, "{ this is not json").unwrap();
    assert!(matches!(
        session::load(&path),
        Err(EngineError::SessionFormat(SessionFormatError::Json(_)))
    ));

    fs::write(&path, r#"{"version": 2, "config": {}, "datasets": []}"#).unwrap();
    assert!(matches!(
        session::load(&path),
        Err(EngineError::SessionFormat(SessionFormatError::UnsupportedVersion { found: 2, .. }))
    ));

    fs::write(&path, r#"{"version": 1, "datasets": []}"#).unwrap();
    assert!(matches!(
        session::load(&path),
        Err(EngineError::SessionFormat(SessionFormatError::MissingKey("config")))
    ));
}

#[test]
fn in_memory_sources_cannot_be_saved() {
    let dir = tempfile::tempdir().unwrap();
    let table = EventTable::new("mem", vec![("area".to_string(), vec![1.0, 2.0])]).unwrap();
    let mut ws = Workspace::new();
    ws.new_analysis(vec![Arc::new(table) as Arc<dyn MeasurementSource>]);
    assert!(matches!(
        ws.save_session(&dir.path().join("s")),
        Err(EngineError::UnsavableSource(name)) if name == "mem"
    ));
}
