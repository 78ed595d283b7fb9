pub mod annotator;
pub mod batch;
pub mod cli;
pub mod clusters;
pub mod color;
pub mod config;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod ranker;
pub mod record;
pub mod sink;
pub mod utils;

pub use batch::{BatchOutput, BatchRunner, FailurePolicy};
pub use color::{ColorHex, ColorOptions, ColorSignature};
pub use config::Opts;
pub use error::{ColorError, ItemFailure, ServiceError, Stage};
pub use manifest::{ImageRecord, Manifest};
pub use ranker::{EmbeddingRanker, Ranking, TemperamentEntry};
pub use record::AnalysisRecord;
pub use sink::{SinkOutcome, TableSink};
