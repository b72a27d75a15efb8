//! Record sources: where a batch of telemetry comes from.

use super::Record;
use crate::storage::{self, Pool};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

/// Trait for anything that can hand the engine a finite in-memory batch.
pub trait RecordSource {
    /// Fetch at most `limit` records.
    fn fetch(&self, limit: usize) -> Result<Vec<Record>>;
}

/// Most recent records from the SQLite `network_logs` table.
pub struct SqliteSource {
    pool: Pool,
}

impl SqliteSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl RecordSource for SqliteSource {
    fn fetch(&self, limit: usize) -> Result<Vec<Record>> {
        let records = storage::load_recent(&self.pool, limit)?;
        info!(count = records.len(), limit, "Fetched records from database");
        Ok(records)
    }
}

/// Newline-delimited JSON file, one record per line.
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RecordSource for JsonlSource {
    fn fetch(&self, limit: usize) -> Result<Vec<Record>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            if records.len() >= limit {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line).with_context(|| {
                format!("invalid record at {}:{}", self.path.display(), line_no + 1)
            })?;
            records.push(record);
        }

        info!(path = %self.path.display(), count = records.len(), "Read records from file");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_jsonl_skips_blank_lines_and_honours_limit() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{"device_id":"AP0001","latency_ms":10.0}}"#)?;
        writeln!(file)?;
        writeln!(file, r#"{{"device_id":"AP0002","latency_ms":20.0}}"#)?;
        writeln!(file, r#"{{"device_id":"AP0003","latency_ms":30.0}}"#)?;

        let source = JsonlSource::new(file.path());
        let all = source.fetch(100)?;
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].device_id, "AP0002");

        let first_two = source.fetch(2)?;
        assert_eq!(first_two.len(), 2);
        Ok(())
    }

    #[test]
    fn test_jsonl_reports_bad_line() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{"device_id":"AP0001"}}"#)?;
        writeln!(file, "not json")?;

        let err = JsonlSource::new(file.path()).fetch(10).unwrap_err();
        assert!(err.to_string().contains(":2"));
        Ok(())
    }
}
