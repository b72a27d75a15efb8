use crate::analysis::aggregator::{DevicePerformance, HourlyTraffic, TrafficAggregator};
use crate::analysis::issues::{detect_issues, ProblematicDevice};
use crate::analysis::security::{security_summary, SecurityEventSummary};
use crate::config::AnalysisConfig;
use crate::telemetry::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

/// Provenance of an aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub records_analyzed: usize,
    pub total_devices: usize,
    /// `None` when no record carries a timestamp.
    pub time_range: Option<TimeRange>,
    pub generated_at: DateTime<Utc>,
    pub high_latency_count: usize,
    pub high_cpu_count: usize,
    pub high_packet_loss_count: usize,
    pub high_retransmissions_count: usize,
    pub total_issues: usize,
}

/// The four aggregate views of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub metadata: ReportMetadata,
    pub device_performance: Vec<DevicePerformance>,
    pub hourly_traffic: Vec<HourlyTraffic>,
    pub problematic_devices: Vec<ProblematicDevice>,
    pub security_summary: Vec<SecurityEventSummary>,
}

/// Run every aggregate view over `batch`. Nothing carries between calls.
pub fn aggregate(batch: &[Record], config: &AnalysisConfig) -> AggregateReport {
    info!(records = batch.len(), "Starting batch aggregation");

    let device_performance = TrafficAggregator::device_performance(batch);
    info!(rows = device_performance.len(), "Device performance analysis complete");

    let hourly_traffic = TrafficAggregator::hourly_traffic(batch);
    info!(rows = hourly_traffic.len(), "Hourly traffic analysis complete");

    let issues = detect_issues(batch, config);
    info!(
        total_issues = issues.total_issues,
        devices = issues.problematic_devices.len(),
        "Performance issue detection complete"
    );

    let security = security_summary(batch);
    info!(rows = security.len(), "Security summary complete");

    let timestamps = batch.iter().filter_map(|r| r.timestamp);
    let time_range = timestamps
        .clone()
        .min()
        .zip(timestamps.max())
        .map(|(min, max)| TimeRange { min, max });

    let metadata = ReportMetadata {
        records_analyzed: batch.len(),
        total_devices: batch
            .iter()
            .map(|r| r.device_id.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
        time_range,
        generated_at: Utc::now(),
        high_latency_count: issues.high_latency_count,
        high_cpu_count: issues.high_cpu_count,
        high_packet_loss_count: issues.high_packet_loss_count,
        high_retransmissions_count: issues.high_retransmissions_count,
        total_issues: issues.total_issues,
    };

    AggregateReport {
        metadata,
        device_performance,
        hourly_traffic,
        problematic_devices: issues.problematic_devices,
        security_summary: security,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metadata_describes_batch() {
        let at = |h| Some(Utc.with_ymd_and_hms(2024, 5, 2, h, 0, 0).unwrap());
        let batch = vec![
            Record {
                device_id: "a".into(),
                timestamp: at(8),
                latency_ms: Some(250.0),
                ..Default::default()
            },
            Record {
                device_id: "b".into(),
                timestamp: at(3),
                ..Default::default()
            },
            Record {
                device_id: "a".into(),
                ..Default::default()
            },
        ];

        let report = aggregate(&batch, &AnalysisConfig::default());
        let meta = &report.metadata;
        assert_eq!(meta.records_analyzed, 3);
        assert_eq!(meta.total_devices, 2);
        assert_eq!(
            meta.time_range,
            Some(TimeRange {
                min: at(3).unwrap(),
                max: at(8).unwrap(),
            })
        );
        assert_eq!(meta.high_latency_count, 1);
        assert_eq!(meta.total_issues, 1);
        assert_eq!(report.problematic_devices.len(), 1);
    }

    #[test]
    fn test_empty_batch_has_no_time_range() {
        let report = aggregate(&[], &AnalysisConfig::default());
        assert_eq!(report.metadata.time_range, None);
        assert!(report.device_performance.is_empty());
        assert!(report.security_summary.is_empty());
    }
}
