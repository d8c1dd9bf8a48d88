//! Writes synthetic measurements for trying out the CLI:
//! three `.tsv` files and one `.parquet` file in the current directory.

use std::sync::Arc;

use anyhow::Result;
use arrow::array::{BooleanArray, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use rusty_shape::config::ConfigKind;
use rusty_shape::data::loader::write_tsv;
use rusty_shape::data::model::{EventTable, MeasurementSource};

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// One synthetic cell population; feature spreads are (mean, sd).
struct Population {
    name: &'static str,
    events: usize,
    area: (f64, f64),
    deformation: (f64, f64),
    flow_rate: f64,
}

fn measurement(pop: &Population, rng: &mut SimpleRng) -> Result<EventTable> {
    let mut area = Vec::with_capacity(pop.events);
    let mut deformation = Vec::with_capacity(pop.events);
    let mut brightness = Vec::with_capacity(pop.events);
    for i in 0..pop.events {
        area.push(rng.gauss(pop.area.0, pop.area.1).max(1.0));
        deformation.push(rng.gauss(pop.deformation.0, pop.deformation.1).abs());
        // a few events without a brightness reading
        brightness.push(if i % 97 == 13 { f64::NAN } else { rng.gauss(120.0, 15.0) });
    }
    let mut table = EventTable::new(
        pop.name,
        vec![
            ("area".to_string(), area),
            ("deformation".to_string(), deformation),
            ("brightness".to_string(), brightness),
        ],
    )?;
    table.set_option(ConfigKind::Setup, "flow rate", pop.flow_rate);
    table.set_option(ConfigKind::Experiment, "sample", pop.name);
    Ok(table)
}

fn write_parquet(table: &EventTable, online: &[bool], path: &str) -> Result<()> {
    let mut fields = Vec::new();
    let mut arrays: Vec<arrow::array::ArrayRef> = Vec::new();
    for feature in table.features() {
        if let Some(col) = table.column(feature) {
            fields.push(Field::new(feature.as_str(), DataType::Float64, false));
            arrays.push(Arc::new(Float64Array::from(col.to_vec())));
        }
    }
    fields.push(Field::new("online_filter", DataType::Boolean, false));
    arrays.push(Arc::new(BooleanArray::from(online.to_vec())));

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let metadata = table
        .intrinsic_config()
        .iter()
        .flat_map(|(kind, section)| {
            section
                .iter()
                .map(move |(key, value)| KeyValue::new(format!("{kind}.{key}"), value.to_string()))
                .collect::<Vec<_>>()
        })
        .collect();
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(metadata))
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    let populations = [
        Population { name: "healthy_1", events: 2000, area: (60.0, 12.0), deformation: (0.02, 0.008), flow_rate: 0.04 },
        Population { name: "healthy_2", events: 1500, area: (62.0, 11.0), deformation: (0.021, 0.008), flow_rate: 0.04 },
        Population { name: "treated_1", events: 1800, area: (75.0, 18.0), deformation: (0.045, 0.015), flow_rate: 0.12 },
    ];

    for pop in &populations {
        let table = measurement(pop, &mut rng)?;
        let path = format!("{}.tsv", pop.name);
        write_tsv(&table, std::path::Path::new(&path))?;
        println!("Wrote {} events to {path}", pop.events);
    }

    let pop = Population { name: "treated_2", events: 1200, area: (78.0, 17.0), deformation: (0.05, 0.016), flow_rate: 0.12 };
    let table = measurement(&pop, &mut rng)?;
    let online: Vec<bool> = (0..pop.events).map(|_| rng.next_f64() > 0.1).collect();
    let path = "treated_2.parquet";
    write_parquet(&table, &online, path)?;
    println!("Wrote {} events to {path}", pop.events);
    Ok(())
}
