//! Analysis and batch-filtering engine for flow-microfluidics measurements.
//!
//! An [`Analysis`] holds an ordered set of measurements that share one
//! configuration. Filters turn each measurement into a [`SelectionMask`],
//! statistics summarise the selected events, the [`batch`] runner replays a
//! configuration over many files, and [`session`] files persist the whole
//! state together with content fingerprints of the referenced data.

pub mod analysis;
pub mod batch;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod session;
pub mod state;

pub use analysis::{Analysis, DatasetAdapter};
pub use batch::{BatchRunner, BatchSummary};
pub use color::ContourColor;
pub use config::{ConfigBundle, ConfigKind, ConfigSection, ConfigValue};
pub use data::filter::SelectionMask;
pub use data::model::{EventTable, MeasurementSource};
pub use data::stats::{Metric, StatisticsRecord};
pub use error::{ConfigurationError, EngineError, HashComparisonWarning, SessionFormatError};
pub use state::Workspace;
