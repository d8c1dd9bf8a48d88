/// Data layer: measurements, loading, filtering and statistics.
///
/// Architecture:
/// ```text
///  .tsv / .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → EventTable (+ SHA-256 fingerprint)
///   └──────────┘
///        │
///        ▼
///   ┌───────────────────┐
///   │ MeasurementSource │  named columns, intrinsic config, online filter
///   └───────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  filtering section → SelectionMask
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  stats    │  mask → StatisticsRecord → report rows
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
pub mod stats;
