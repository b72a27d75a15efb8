//! Dashboard-level summary of a record batch.

use crate::analysis::aggregator::{desc_none_last, percentage};
use crate::analysis::stats::Series;
use crate::config::AnalysisConfig;
use crate::telemetry::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub device_id: String,
    pub device_type: String,
    pub total_logs: usize,
    pub avg_latency_ms: Option<f64>,
    pub avg_cpu_utilization: Option<f64>,
    pub max_anomaly_score: Option<f64>,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_logs: usize,
    pub success_rate: f64,
    pub device_distribution: BTreeMap<String, usize>,
    pub latency_by_device_type: BTreeMap<String, LatencyStats>,
    /// Records whose source anomaly score exceeds the cutoff.
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    /// Highest anomaly score first.
    pub device_health: Vec<DeviceHealth>,
}

pub fn summarize(batch: &[Record], config: &AnalysisConfig) -> DashboardSummary {
    let cutoff = config.anomaly_score_cutoff;
    let total_logs = batch.len();
    let successes = batch.iter().filter(|r| r.success).count();
    let anomaly_count = batch
        .iter()
        .filter(|r| r.anomaly_score.is_some_and(|s| s > cutoff))
        .count();

    let mut device_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_type: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
    let mut by_device: BTreeMap<(&str, &str), Vec<&Record>> = BTreeMap::new();
    for r in batch {
        *device_distribution.entry(r.device_type.clone()).or_insert(0) += 1;
        by_type.entry(r.device_type.as_str()).or_default().push(r);
        by_device
            .entry((r.device_id.as_str(), r.device_type.as_str()))
            .or_default()
            .push(r);
    }

    let latency_by_device_type = by_type
        .into_iter()
        .map(|(device_type, records)| {
            let latency = Series::from_options(records.iter().map(|r| r.latency_ms));
            (
                device_type.to_string(),
                LatencyStats {
                    avg: latency.mean(),
                    max: latency.max(),
                    min: latency.min(),
                },
            )
        })
        .collect();

    let mut device_health: Vec<DeviceHealth> = by_device
        .into_iter()
        .map(|((device_id, device_type), records)| {
            let max_anomaly_score = Series::from_options(records.iter().map(|r| r.anomaly_score)).max();
            DeviceHealth {
                device_id: device_id.to_string(),
                device_type: device_type.to_string(),
                total_logs: records.len(),
                avg_latency_ms: Series::from_options(records.iter().map(|r| r.latency_ms)).mean(),
                avg_cpu_utilization: Series::from_options(records.iter().map(|r| r.cpu_utilization)).mean(),
                max_anomaly_score,
                status: if max_anomaly_score.unwrap_or(0.0) < cutoff {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Warning
                },
            }
        })
        .collect();
    device_health.sort_by(|a, b| desc_none_last(a.max_anomaly_score, b.max_anomaly_score));

    DashboardSummary {
        total_logs,
        success_rate: percentage(successes, total_logs),
        device_distribution,
        latency_by_device_type,
        anomaly_count,
        anomaly_percentage: percentage(anomaly_count, total_logs),
        device_health,
    }
}
