//! Gold Loss Core - shared engine for the parser CLI and the API
//!
//! Responsibilities:
//! - Convert karat masses to pure gold equivalents
//! - Normalize weight and loss uploads (CSV or workbook)
//! - Ingest records into a store in batches, append or replace
//! - Aggregate loss by item, karigar, process and month

pub mod analytics;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod purity;
pub mod store;

pub use analytics::Analytics;
pub use config::Config;
pub use error::{EngineError, InputError, StoreError};
pub use ingest::{IngestReport, Ingestor};
pub use model::{LossRecord, RecordKind, Records, UploadMode, WeightRecord};
pub use normalize::FileFormat;
pub use store::{MemoryStore, PgStore, Store};
