//! netinsight -- anomaly detection and batch analytics for network device telemetry.
//!
//! This crate provides the feature pipeline, the outlier models and their
//! score normalization, anomaly explanations, model persistence, and the
//! grouped aggregation views over record batches.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod storage;
pub mod telemetry;

use anyhow::Result;
use std::path::Path;
use telemetry::{JsonlSource, RecordSource, SqliteSource};

/// Pick the record source for a run: a JSON-lines file when given,
/// otherwise the SQLite record store at `db_path`.
pub fn open_source(input: Option<&Path>, db_path: &str) -> Result<Box<dyn RecordSource>> {
    match input {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Reading records from file");
            Ok(Box::new(JsonlSource::new(path)))
        }
        None => {
            tracing::debug!(%db_path, "Reading records from database");
            let pool = storage::open_pool(db_path)?;
            Ok(Box::new(SqliteSource::new(pool)))
        }
    }
}
