use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use crate::config::{ConfigKind, ConfigValue};
use crate::error::EngineError;

use super::model::{EventTable, MeasurementSource, fingerprint_file};

/// Column holding the acquisition-time selection, if present.
const ONLINE_FILTER_COLUMN: &str = "online_filter";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a measurement from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.tsv` / `.csv` – `# section.key = value` preamble, header row, one row per event
/// * `.json`    – `{ "config": {..}, "events": { "area": [...], ... }, "online_filter": [..] }`
/// * `.parquet` – one numeric column per feature, config in the key-value metadata
pub fn load_file(path: &Path) -> Result<EventTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let fingerprint = fingerprint_file(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let table = match ext.as_str() {
        "tsv" | "txt" => load_delimited(path, b'\t'),
        "csv" => load_delimited(path, b','),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    log::debug!(
        "loaded {} ({} events, {} features)",
        path.display(),
        table.len(),
        table.features().len()
    );
    Ok(table.with_file(path, fingerprint))
}

/// [`load_file`] for callers on the engine side of the boundary.
pub fn open_measurement(path: &Path) -> std::result::Result<Arc<EventTable>, EngineError> {
    load_file(path)
        .map(Arc::new)
        .map_err(|e| EngineError::Measurement {
            path: path.to_path_buf(),
            message: format!("{e:#}"),
        })
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("measurement")
        .to_string()
}

/// Split columns into features and the optional online-filter mask.
fn assemble(
    path: &Path,
    columns: Vec<(String, Vec<f64>)>,
    online: Option<Vec<bool>>,
    config: Vec<(ConfigKind, String, ConfigValue)>,
) -> Result<EventTable> {
    let mut online = online;
    let mut features = Vec::with_capacity(columns.len());
    for (name, values) in columns {
        if name.eq_ignore_ascii_case(ONLINE_FILTER_COLUMN) {
            online = Some(values.iter().map(|v| *v != 0.0).collect());
        } else {
            features.push((name, values));
        }
    }

    let mut table = EventTable::new(&stem(path), features)?;
    if let Some(mask) = online {
        table = table.with_online_filter(mask)?;
    }
    for (kind, key, value) in config {
        table.set_option(kind, &key, value);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Delimited text loader
// ---------------------------------------------------------------------------

/// Layout:
///
/// ```text
/// # setup.flow rate = 0.12
/// # experiment.sample = blood
/// area	deformation
/// 31.5	0.021
/// ...
/// ```
///
/// Comment lines that do not follow the `section.key = value` pattern are ignored.
fn load_delimited(path: &Path, delimiter: u8) -> Result<EventTable> {
    let text = std::fs::read_to_string(path).context("reading measurement file")?;

    let mut config = Vec::new();
    let mut body_start = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        let Some(comment) = trimmed.strip_prefix('#') else {
            break;
        };
        body_start += line.len();
        if let Some(entry) = parse_config_line(comment) {
            config.push(entry);
        }
    }
    let body = &text[body_start..];

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("reading header row")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        bail!("measurement has no header row");
    }

    let mut values: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "row {row_no}: {} fields, header has {}",
                record.len(),
                headers.len()
            );
        }
        for (col, field) in record.iter().enumerate() {
            let v = if field.is_empty() {
                f64::NAN
            } else {
                field
                    .parse::<f64>()
                    .with_context(|| format!("row {row_no}, {}: '{field}' is not a number", headers[col]))?
            };
            values[col].push(v);
        }
    }

    let columns = headers.into_iter().zip(values).collect();
    assemble(path, columns, None, config)
}

/// `setup.flow rate = 0.12` → (Setup, "flow rate", 0.12)
fn parse_config_line(line: &str) -> Option<(ConfigKind, String, ConfigValue)> {
    let (lhs, rhs) = line.split_once('=')?;
    let (section, key) = lhs.trim().split_once('.')?;
    let kind = section.parse::<ConfigKind>().ok()?;
    Some((kind, key.trim().to_string(), ConfigValue::parse_text(rhs)))
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema:
///
/// ```json
/// {
///   "config": { "setup": { "flow rate": 0.12 } },
///   "events": { "area": [31.5, 40.2], "deformation": [0.021, 0.034] },
///   "online_filter": [true, false]
/// }
/// ```
///
/// `null` entries in event arrays read as NaN.
fn load_json(path: &Path) -> Result<EventTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let events = root
        .get("events")
        .and_then(JsonValue::as_object)
        .context("Expected an 'events' object")?;

    let mut columns = Vec::with_capacity(events.len());
    for (name, val) in events {
        let arr = val
            .as_array()
            .with_context(|| format!("events.{name} is not an array"))?;
        let values = arr
            .iter()
            .enumerate()
            .map(|(j, v)| match v {
                JsonValue::Null => Ok(f64::NAN),
                other => other
                    .as_f64()
                    .with_context(|| format!("events.{name}[{j}]: not a number")),
            })
            .collect::<Result<Vec<f64>>>()?;
        columns.push((name.clone(), values));
    }

    let online = match root.get("online_filter") {
        None | Some(JsonValue::Null) => None,
        Some(val) => Some(
            val.as_array()
                .context("online_filter is not an array")?
                .iter()
                .map(|v| v.as_bool().context("online_filter entries must be booleans"))
                .collect::<Result<Vec<bool>>>()?,
        ),
    };

    let mut config = Vec::new();
    if let Some(sections) = root.get("config").and_then(JsonValue::as_object) {
        for (section, entries) in sections {
            let kind = section
                .parse::<ConfigKind>()
                .map_err(anyhow::Error::msg)?;
            let entries = entries
                .as_object()
                .with_context(|| format!("config.{section} is not an object"))?;
            for (key, value) in entries {
                let value: ConfigValue = serde_json::from_value(value.clone())
                    .with_context(|| format!("config.{section}.{key}"))?;
                config.push((kind, key.clone(), value));
            }
        }
    }

    assemble(path, columns, online, config)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one numeric column per feature.
///
/// Float64, Float32, Int64 and Int32 columns are read as features; a Boolean
/// `online_filter` column becomes the online-filter mask. Key-value metadata
/// entries named `section.key` are read as configuration.
fn load_parquet(path: &Path) -> Result<EventTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;

    let mut config = Vec::new();
    if let Some(kvs) = builder.metadata().file_metadata().key_value_metadata() {
        for kv in kvs {
            let Some(value) = &kv.value else { continue };
            if let Some(entry) = parse_config_line(&format!("{} = {}", kv.key, value)) {
                config.push(entry);
            }
        }
    }

    let reader = builder.build().context("building parquet reader")?;

    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut online: Option<Vec<bool>> = None;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        if names.is_empty() && columns.is_empty() {
            for field in schema.fields().iter() {
                if field.name().eq_ignore_ascii_case(ONLINE_FILTER_COLUMN) {
                    continue;
                }
                names.push(field.name().clone());
                columns.push(Vec::new());
            }
        }

        for (idx, field) in schema.fields().iter().enumerate() {
            let col = batch.column(idx);
            if field.name().eq_ignore_ascii_case(ONLINE_FILTER_COLUMN) {
                let arr = col
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .context("online_filter column must be Boolean")?;
                online
                    .get_or_insert_with(Vec::new)
                    .extend(arr.iter().map(|v| v.unwrap_or(false)));
                continue;
            }
            let slot = names
                .iter()
                .position(|n| n == field.name())
                .with_context(|| format!("column '{}' missing from first batch", field.name()))?;
            extend_f64(&mut columns[slot], col)
                .with_context(|| format!("column '{}'", field.name()))?;
        }
    }

    assemble(path, names.into_iter().zip(columns).collect(), online, config)
}

/// Append a numeric Arrow column as `f64`, nulls as NaN.
fn extend_f64(out: &mut Vec<f64>, col: &Arc<dyn Array>) -> Result<()> {
    match col.data_type() {
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            out.extend(arr.iter().map(|v| v.unwrap_or(f64::NAN)));
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)));
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, |i| i as f64)));
        }
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)));
        }
        other => bail!("unsupported column type {other:?}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write a measurement in the tab-separated layout [`load_file`] reads.
pub fn write_tsv(source: &dyn MeasurementSource, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for (kind, section) in source.intrinsic_config().iter() {
        for (key, value) in section.iter() {
            writeln!(file, "# {kind}.{key} = {value}")?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(file);
    let mut header: Vec<String> = source.features().to_vec();
    let online = source.online_filter();
    if online.is_some() {
        header.push(ONLINE_FILTER_COLUMN.to_string());
    }
    writer.write_record(&header)?;

    let columns: Vec<&[f64]> = source
        .features()
        .iter()
        .filter_map(|f| source.column(f))
        .collect();
    for i in 0..source.event_count() {
        let mut row: Vec<String> = columns.iter().map(|c| c[i].to_string()).collect();
        if let Some(mask) = online {
            row.push(if mask[i] { "1" } else { "0" }.to_string());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSection;

    #[test]
    fn tsv_with_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m1.tsv");
        std::fs::write(
            &path,
            "# setup.flow rate = 0.04\n# a free comment\nArea\tDeformation\tonline_filter\n1\t0.1\t1\n2\t\t0\n",
        )
        .unwrap();
        let table = load_file(&path).unwrap();
        assert_eq!(table.name(), "m1");
        assert_eq!(table.event_count(), 2);
        assert_eq!(table.features().to_vec(), vec!["area".to_string(), "deformation".to_string()]);
        assert!(table.column("deformation").unwrap()[1].is_nan());
        assert_eq!(table.online_filter(), Some(&[true, false][..]));
        let setup = table.intrinsic_config().get(ConfigKind::Setup).unwrap();
        assert_eq!(setup.get_float("flow rate"), Some(0.04));
        assert_eq!(table.fingerprint(), fingerprint_file(&path).unwrap());
        assert_eq!(table.path(), Some(path.as_path()));
    }

    #[test]
    fn csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("m.csv");
        std::fs::write(&csv_path, "area,deformation\n1,0.5\n3,0.7\n").unwrap();
        let table = load_file(&csv_path).unwrap();
        assert_eq!(table.column("area"), Some(&[1.0, 3.0][..]));

        let json_path = dir.path().join("m.json");
        std::fs::write(
            &json_path,
            r#"{"config": {"setup": {"flow rate": 0.16}},
                "events": {"area": [1, 2, null]},
                "online_filter": [true, true, false]}"#,
        )
        .unwrap();
        let table = load_file(&json_path).unwrap();
        assert_eq!(table.event_count(), 3);
        assert!(table.column("area").unwrap()[2].is_nan());
        assert_eq!(
            table.intrinsic_config().get(ConfigKind::Setup).unwrap().get_float("flow rate"),
            Some(0.16)
        );
    }

    #[test]
    fn json_features_keep_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ordered.json");
        std::fs::write(
            &path,
            r#"{"events": {"zeta": [1.0, 2.0], "area": [3.0, 4.0], "brightness": [5.0, 6.0]}}"#,
        )
        .unwrap();
        let table = load_file(&path).unwrap();
        assert_eq!(table.features(), ["zeta", "area", "brightness"]);
    }

    #[test]
    fn rejects_unknown_extension_and_bad_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.xyz");
        std::fs::write(&path, "whatever").unwrap();
        assert!(load_file(&path).is_err());

        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "area\nabc\n").unwrap();
        assert!(open_measurement(&path).is_err());
    }

    #[test]
    fn tsv_writer_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let mut setup = ConfigSection::new();
        setup.set("flow rate", 0.12);
        let table = EventTable::new(
            "out",
            vec![
                ("area".to_string(), vec![10.5, 20.25]),
                ("deformation".to_string(), vec![0.125, 0.0625]),
            ],
        )
        .unwrap()
        .with_online_filter(vec![true, false])
        .unwrap()
        .with_section(ConfigKind::Setup, setup);
        write_tsv(&table, &path).unwrap();

        let back = load_file(&path).unwrap();
        assert_eq!(back.column("area"), table.column("area"));
        assert_eq!(back.column("deformation"), table.column("deformation"));
        assert_eq!(back.online_filter(), table.online_filter());
        assert_eq!(back.intrinsic_config(), table.intrinsic_config());
    }
}
