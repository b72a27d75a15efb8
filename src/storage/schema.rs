//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS network_logs (
            id INTEGER PRIMARY KEY,
            timestamp TEXT,
            device_id TEXT NOT NULL,
            device_type TEXT NOT NULL,
            device_model TEXT NOT NULL DEFAULT '',
            location TEXT NOT NULL DEFAULT '',
            event_category TEXT NOT NULL DEFAULT '',
            event_type TEXT NOT NULL DEFAULT '',
            source_ip TEXT,
            destination_ip TEXT,
            protocol TEXT,
            bytes_sent INTEGER,
            bytes_received INTEGER,
            latency_ms REAL,
            jitter_ms REAL,
            packet_loss REAL,
            throughput_mbps REAL,
            cpu_utilization REAL,
            memory_utilization REAL,
            tcp_retransmissions INTEGER,
            wireless_signal_strength INTEGER,
            client_count INTEGER,
            success INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            anomaly_score REAL,
            tags_json TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_network_logs_timestamp ON network_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_network_logs_device_id ON network_logs(device_id);
        CREATE INDEX IF NOT EXISTS idx_network_logs_device_type ON network_logs(device_type);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        [],
    )?;

    Ok(())
}
