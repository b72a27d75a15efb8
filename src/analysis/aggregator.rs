use crate::analysis::stats::Series;
use crate::telemetry::Record;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Per-device performance over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePerformance {
    pub device_id: String,
    pub device_type: String,
    pub location: String,
    pub event_count: usize,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub avg_cpu_utilization: Option<f64>,
    pub avg_memory_utilization: Option<f64>,
    pub avg_throughput_mbps: Option<f64>,
    pub total_tcp_retransmissions: u64,
    pub avg_packet_loss: Option<f64>,
    pub success_count: usize,
    /// `success_count / event_count * 100`.
    pub success_rate: f64,
}

/// Traffic for one device type in one hour of the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyTraffic {
    /// Hour of day, 0-23 (UTC).
    pub hour: u32,
    pub device_type: String,
    pub event_count: usize,
    pub avg_latency_ms: Option<f64>,
    pub avg_throughput_mbps: Option<f64>,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

/// Percentage of `part` in `whole`, 0 for an empty whole.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Descending by value, missing values last.
pub(crate) fn desc_none_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Grouped batch views over telemetry records.
pub struct TrafficAggregator;

impl TrafficAggregator {
    /// Group by (device id, device type, location), slowest device first.
    pub fn device_performance(batch: &[Record]) -> Vec<DevicePerformance> {
        let mut groups: BTreeMap<(&str, &str, &str), Vec<&Record>> = BTreeMap::new();
        for r in batch {
            groups
                .entry((r.device_id.as_str(), r.device_type.as_str(), r.location.as_str()))
                .or_default()
                .push(r);
        }

        let mut rows: Vec<DevicePerformance> = groups
            .into_iter()
            .map(|((device_id, device_type, location), records)| {
                let latency = Series::from_options(records.iter().map(|r| r.latency_ms));
                let success_count = records.iter().filter(|r| r.success).count();
                DevicePerformance {
                    device_id: device_id.to_string(),
                    device_type: device_type.to_string(),
                    location: location.to_string(),
                    event_count: records.len(),
                    avg_latency_ms: latency.mean(),
                    max_latency_ms: latency.max(),
                    avg_cpu_utilization: Series::from_options(records.iter().map(|r| r.cpu_utilization)).mean(),
                    avg_memory_utilization: Series::from_options(records.iter().map(|r| r.memory_utilization))
                        .mean(),
                    avg_throughput_mbps: Series::from_options(records.iter().map(|r| r.throughput_mbps)).mean(),
                    total_tcp_retransmissions: records
                        .iter()
                        .filter_map(|r| r.tcp_retransmissions)
                        .map(u64::from)
                        .sum(),
                    avg_packet_loss: Series::from_options(records.iter().map(|r| r.packet_loss)).mean(),
                    success_count,
                    success_rate: percentage(success_count, records.len()),
                }
            })
            .collect();

        // Stable sort keeps key order among equal latencies.
        rows.sort_by(|a, b| desc_none_last(a.avg_latency_ms, b.avg_latency_ms));
        rows
    }

    /// Group by (hour of day, device type), earliest hour first. Records
    /// without a timestamp are left out of this view.
    pub fn hourly_traffic(batch: &[Record]) -> Vec<HourlyTraffic> {
        let mut groups: BTreeMap<(u32, &str), Vec<&Record>> = BTreeMap::new();
        for r in batch {
            if let Some(ts) = r.timestamp {
                groups
                    .entry((ts.hour(), r.device_type.as_str()))
                    .or_default()
                    .push(r);
            }
        }

        groups
            .into_iter()
            .map(|((hour, device_type), records)| HourlyTraffic {
                hour,
                device_type: device_type.to_string(),
                event_count: records.len(),
                avg_latency_ms: Series::from_options(records.iter().map(|r| r.latency_ms)).mean(),
                avg_throughput_mbps: Series::from_options(records.iter().map(|r| r.throughput_mbps)).mean(),
                total_bytes_sent: records.iter().filter_map(|r| r.bytes_sent).sum(),
                total_bytes_received: records.iter().filter_map(|r| r.bytes_received).sum(),
            })
            .collect()
    }
}
