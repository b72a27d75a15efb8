//! Device telemetry records and the numeric features derived from them.

pub mod source;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use self::source::{JsonlSource, RecordSource, SqliteSource};

/// One observation reported by a network device.
///
/// Records are read-only inputs: detection and aggregation never modify them,
/// they only produce derived values alongside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub event_category: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub destination_ip: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub bytes_sent: Option<u64>,
    #[serde(default)]
    pub bytes_received: Option<u64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub jitter_ms: Option<f64>,
    /// Fraction of packets lost (0.05 = 5%).
    #[serde(default)]
    pub packet_loss: Option<f64>,
    #[serde(default)]
    pub throughput_mbps: Option<f64>,
    #[serde(default)]
    pub cpu_utilization: Option<f64>,
    #[serde(default)]
    pub memory_utilization: Option<f64>,
    #[serde(default)]
    pub tcp_retransmissions: Option<u32>,
    /// RSSI in dBm.
    #[serde(default)]
    pub wireless_signal_strength: Option<i32>,
    #[serde(default)]
    pub client_count: Option<u32>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Score supplied by the upstream source, not by this crate's detectors.
    #[serde(default)]
    pub anomaly_score: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record {
    /// Numeric value of `feature`, if the record carries one.
    pub fn feature(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::LatencyMs => self.latency_ms,
            Feature::JitterMs => self.jitter_ms,
            Feature::PacketLoss => self.packet_loss,
            Feature::ThroughputMbps => self.throughput_mbps,
            Feature::CpuUtilization => self.cpu_utilization,
            Feature::MemoryUtilization => self.memory_utilization,
            Feature::TcpRetransmissions => self.tcp_retransmissions.map(f64::from),
            Feature::WirelessSignalStrength => self.wireless_signal_strength.map(f64::from),
            Feature::ClientCount => self.client_count.map(f64::from),
        }
    }

    /// An error code counts as present only when it is non-blank.
    pub fn has_error_code(&self) -> bool {
        self.error_code
            .as_deref()
            .is_some_and(|code| !code.trim().is_empty())
    }
}

/// Numeric telemetry dimensions usable by the detection models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    LatencyMs,
    JitterMs,
    PacketLoss,
    ThroughputMbps,
    CpuUtilization,
    MemoryUtilization,
    TcpRetransmissions,
    WirelessSignalStrength,
    ClientCount,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::LatencyMs,
        Feature::JitterMs,
        Feature::PacketLoss,
        Feature::ThroughputMbps,
        Feature::CpuUtilization,
        Feature::MemoryUtilization,
        Feature::TcpRetransmissions,
        Feature::WirelessSignalStrength,
        Feature::ClientCount,
    ];

    /// The ordered feature list the detectors use unless configured otherwise.
    pub const MODEL_DEFAULT: [Feature; 8] = [
        Feature::LatencyMs,
        Feature::JitterMs,
        Feature::PacketLoss,
        Feature::CpuUtilization,
        Feature::MemoryUtilization,
        Feature::TcpRetransmissions,
        Feature::ClientCount,
        Feature::ThroughputMbps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::LatencyMs => "latency_ms",
            Feature::JitterMs => "jitter_ms",
            Feature::PacketLoss => "packet_loss",
            Feature::ThroughputMbps => "throughput_mbps",
            Feature::CpuUtilization => "cpu_utilization",
            Feature::MemoryUtilization => "memory_utilization",
            Feature::TcpRetransmissions => "tcp_retransmissions",
            Feature::WirelessSignalStrength => "wireless_signal_strength",
            Feature::ClientCount => "client_count",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Feature::LatencyMs => "Network latency in milliseconds",
            Feature::JitterMs => "Packet delay variation in milliseconds",
            Feature::PacketLoss => "Fraction of packets lost",
            Feature::ThroughputMbps => "Network throughput in Mbps",
            Feature::CpuUtilization => "Device CPU usage percentage",
            Feature::MemoryUtilization => "Device memory usage percentage",
            Feature::TcpRetransmissions => "Number of TCP retransmissions",
            Feature::WirelessSignalStrength => "Wireless signal strength in dBm",
            Feature::ClientCount => "Number of connected clients",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("unknown feature: {}", s))
    }
}
