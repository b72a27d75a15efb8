//! SQLite record store -- schema, queries, migrations.

pub mod schema;

use crate::telemetry::Record;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Row};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Insert a batch of records in one transaction. Returns the number stored.
pub fn save_records(pool: &Pool, records: &[Record]) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO network_logs (
                timestamp, device_id, device_type, device_model, location,
                event_category, event_type, source_ip, destination_ip, protocol,
                bytes_sent, bytes_received, latency_ms, jitter_ms, packet_loss,
                throughput_mbps, cpu_utilization, memory_utilization, tcp_retransmissions,
                wireless_signal_strength, client_count, success, error_code,
                anomaly_score, tags_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        )?;

        for r in records {
            let tags_json = serde_json::to_string(&r.tags)?;
            stmt.execute(params![
                r.timestamp.map(|t| t.to_rfc3339()),
                r.device_id,
                r.device_type,
                r.device_model,
                r.location,
                r.event_category,
                r.event_type,
                r.source_ip,
                r.destination_ip,
                r.protocol,
                r.bytes_sent.map(|b| b as i64),
                r.bytes_received.map(|b| b as i64),
                r.latency_ms,
                r.jitter_ms,
                r.packet_loss,
                r.throughput_mbps,
                r.cpu_utilization,
                r.memory_utilization,
                r.tcp_retransmissions,
                r.wireless_signal_strength,
                r.client_count,
                r.success,
                r.error_code,
                r.anomaly_score,
                tags_json,
            ])?;
        }
    }
    tx.commit().context("Failed to commit record batch")?;

    Ok(records.len())
}

/// Fetch the `limit` most recent records, newest first.
pub fn load_recent(pool: &Pool, limit: usize) -> Result<Vec<Record>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, device_id, device_type, device_model, location,
                event_category, event_type, source_ip, destination_ip, protocol,
                bytes_sent, bytes_received, latency_ms, jitter_ms, packet_loss,
                throughput_mbps, cpu_utilization, memory_utilization, tcp_retransmissions,
                wireless_signal_strength, client_count, success, error_code,
                anomaly_score, tags_json
         FROM network_logs
         ORDER BY timestamp DESC, id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit as i64], record_from_row)?;

    let mut records = Vec::new();
    for r in rows {
        records.push(r.context("Failed to decode stored record")?);
    }
    Ok(records)
}

/// A text column that failed to parse is a conversion error, not a missing value.
fn conversion_failure<E>(column: usize) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let timestamp = row
        .get::<_, Option<String>>(1)?
        .map(|t| DateTime::parse_from_rfc3339(&t).map_err(conversion_failure(1)))
        .transpose()?
        .map(|t| t.with_timezone(&Utc));
    let tags: Vec<String> = row
        .get::<_, Option<String>>(25)?
        .map(|t| serde_json::from_str(&t).map_err(conversion_failure(25)))
        .transpose()?
        .unwrap_or_default();

    Ok(Record {
        id: row.get(0)?,
        timestamp,
        device_id: row.get(2)?,
        device_type: row.get(3)?,
        device_model: row.get(4)?,
        location: row.get(5)?,
        event_category: row.get(6)?,
        event_type: row.get(7)?,
        source_ip: row.get(8)?,
        destination_ip: row.get(9)?,
        protocol: row.get(10)?,
        bytes_sent: row.get::<_, Option<i64>>(11)?.map(|b| b.max(0) as u64),
        bytes_received: row.get::<_, Option<i64>>(12)?.map(|b| b.max(0) as u64),
        latency_ms: row.get(13)?,
        jitter_ms: row.get(14)?,
        packet_loss: row.get(15)?,
        throughput_mbps: row.get(16)?,
        cpu_utilization: row.get(17)?,
        memory_utilization: row.get(18)?,
        tcp_retransmissions: row.get(19)?,
        wireless_signal_strength: row.get(20)?,
        client_count: row.get(21)?,
        success: row.get(22)?,
        error_code: row.get(23)?,
        anomaly_score: row.get(24)?,
        tags,
    })
}
