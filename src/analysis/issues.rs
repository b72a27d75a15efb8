//! Policy-threshold violations: per-category counts and the devices that
//! break the most rules.

use crate::config::AnalysisConfig;
use crate::telemetry::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblematicDevice {
    pub device_id: String,
    pub device_type: String,
    /// Records from this device exceeding at least one threshold.
    pub issue_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssues {
    pub high_latency_count: usize,
    pub high_cpu_count: usize,
    pub high_packet_loss_count: usize,
    pub high_retransmissions_count: usize,
    /// Sum of the four counts; a record may count more than once.
    pub total_issues: usize,
    pub problematic_devices: Vec<ProblematicDevice>,
}

/// Which thresholds one record exceeds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Violations {
    latency: bool,
    cpu: bool,
    packet_loss: bool,
    retransmissions: bool,
}

impl Violations {
    fn of(r: &Record, limits: &AnalysisConfig) -> Self {
        let over = |v: Option<f64>, limit: f64| v.is_some_and(|v| v > limit);
        Self {
            latency: over(r.latency_ms, limits.latency_ms),
            cpu: over(r.cpu_utilization, limits.cpu_utilization),
            packet_loss: over(r.packet_loss, limits.packet_loss),
            retransmissions: r
                .tcp_retransmissions
                .is_some_and(|v| v > limits.tcp_retransmissions),
        }
    }

    fn any(&self) -> bool {
        self.latency || self.cpu || self.packet_loss || self.retransmissions
    }
}

/// Count threshold violations in `batch` and rank the worst devices.
pub fn detect_issues(batch: &[Record], limits: &AnalysisConfig) -> PerformanceIssues {
    let mut issues = PerformanceIssues::default();
    let mut per_device: BTreeMap<(&str, &str), usize> = BTreeMap::new();

    for r in batch {
        let v = Violations::of(r, limits);
        issues.high_latency_count += usize::from(v.latency);
        issues.high_cpu_count += usize::from(v.cpu);
        issues.high_packet_loss_count += usize::from(v.packet_loss);
        issues.high_retransmissions_count += usize::from(v.retransmissions);
        if v.any() {
            *per_device
                .entry((r.device_id.as_str(), r.device_type.as_str()))
                .or_insert(0) += 1;
        }
    }

    issues.total_issues = issues.high_latency_count
        + issues.high_cpu_count
        + issues.high_packet_loss_count
        + issues.high_retransmissions_count;

    let mut devices: Vec<ProblematicDevice> = per_device
        .into_iter()
        .map(|((device_id, device_type), issue_count)| ProblematicDevice {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            issue_count,
        })
        .collect();
    devices.sort_by(|a, b| b.issue_count.cmp(&a.issue_count));
    devices.truncate(limits.top_devices);
    issues.problematic_devices = devices;

    issues
}
