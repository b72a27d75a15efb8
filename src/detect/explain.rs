//! Human-readable reasons for a detection outcome.

use crate::detect::DetectionResult;
use crate::telemetry::{Feature, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-feature limits checked when a record is flagged.
pub const THRESHOLDS: [(Feature, f64); 7] = [
    (Feature::LatencyMs, 100.0),
    (Feature::JitterMs, 20.0),
    (Feature::PacketLoss, 0.05),
    (Feature::CpuUtilization, 80.0),
    (Feature::MemoryUtilization, 80.0),
    (Feature::TcpRetransmissions, 10.0),
    (Feature::ClientCount, 50.0),
];

fn recommendation(feature: Feature) -> Option<&'static str> {
    match feature {
        Feature::LatencyMs => Some("Check network congestion or routing issues"),
        Feature::CpuUtilization => Some("Consider load balancing or device upgrade"),
        Feature::TcpRetransmissions => Some("Investigate network stability or packet loss"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    NoAnomaly,
    /// One feature exceeded its limit.
    Threshold {
        feature: Feature,
        value: f64,
        threshold: f64,
    },
    /// Flagged, but no single feature is out of range.
    FeatureCombination,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NoAnomaly => f.write_str("no anomaly detected"),
            Reason::Threshold {
                feature,
                value,
                threshold,
            } => write!(f, "High {}: {:.2} (threshold: {})", feature, value, threshold),
            Reason::FeatureCombination => {
                f.write_str("anomaly detected by model based on feature combinations")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub record_id: Option<i64>,
    pub device_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_anomalous: bool,
    /// Rounded to three decimals.
    pub anomaly_score: f64,
    pub reasons: Vec<Reason>,
    pub recommendations: Vec<String>,
}

impl Explanation {
    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(Reason::to_string).collect()
    }

    /// Features that individually exceeded their limit.
    pub fn flagged_features(&self) -> Vec<Feature> {
        self.reasons
            .iter()
            .filter_map(|r| match r {
                Reason::Threshold { feature, .. } => Some(*feature),
                _ => None,
            })
            .collect()
    }
}

/// Explain `result` for `record` against the fixed threshold table.
pub fn explain(record: &Record, result: &DetectionResult) -> Explanation {
    let mut explanation = Explanation {
        record_id: result.record_id.or(record.id),
        device_id: record.device_id.clone(),
        timestamp: record.timestamp,
        is_anomalous: result.is_anomaly,
        anomaly_score: (result.anomaly_score * 1000.0).round() / 1000.0,
        reasons: Vec::new(),
        recommendations: Vec::new(),
    };

    if !result.is_anomaly {
        explanation.reasons.push(Reason::NoAnomaly);
        return explanation;
    }

    for (feature, threshold) in THRESHOLDS {
        let Some(value) = record.feature(feature) else {
            continue;
        };
        if value > threshold {
            explanation.reasons.push(Reason::Threshold {
                feature,
                value,
                threshold,
            });
            if let Some(hint) = recommendation(feature) {
                explanation.recommendations.push(hint.to_string());
            }
        }
    }

    if explanation.reasons.is_empty() {
        explanation.reasons.push(Reason::FeatureCombination);
    }
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagged(score: f64) -> DetectionResult {
        DetectionResult {
            record_id: Some(7),
            is_anomaly: true,
            anomaly_score: score,
        }
    }

    #[test]
    fn test_normal_record_has_single_reason() {
        let record = Record {
            latency_ms: Some(900.0),
            ..Default::default()
        };
        let result = DetectionResult {
            record_id: None,
            is_anomaly: false,
            anomaly_score: 0.1,
        };
        let explanation = explain(&record, &result);
        assert_eq!(explanation.messages(), vec!["no anomaly detected".to_string()]);
        assert!(explanation.recommendations.is_empty());
    }

    #[test]
    fn test_exceeded_thresholds_become_reasons() {
        let record = Record {
            device_id: "router-3".to_string(),
            latency_ms: Some(250.0),
            cpu_utilization: Some(91.5),
            tcp_retransmissions: Some(4),
            jitter_ms: Some(35.0),
            ..Default::default()
        };
        let explanation = explain(&record, &flagged(0.91234));

        assert_eq!(
            explanation.flagged_features(),
            vec![Feature::LatencyMs, Feature::JitterMs, Feature::CpuUtilization]
        );
        assert_eq!(
            explanation.messages()[0],
            "High latency_ms: 250.00 (threshold: 100)"
        );
        assert_eq!(
            explanation.recommendations,
            vec![
                "Check network congestion or routing issues".to_string(),
                "Consider load balancing or device upgrade".to_string(),
            ]
        );
        assert_eq!(explanation.anomaly_score, 0.912);
        assert_eq!(explanation.record_id, Some(7));
    }

    #[test]
    fn test_value_at_threshold_is_not_a_reason() {
        let record = Record {
            packet_loss: Some(0.05),
            tcp_retransmissions: Some(11),
            ..Default::default()
        };
        let explanation = explain(&record, &flagged(0.7));
        assert_eq!(explanation.flagged_features(), vec![Feature::TcpRetransmissions]);
        assert_eq!(
            explanation.messages(),
            vec!["High tcp_retransmissions: 11.00 (threshold: 10)".to_string()]
        );
    }

    #[test]
    fn test_multivariate_anomaly_falls_back() {
        let record = Record {
            latency_ms: Some(40.0),
            cpu_utilization: Some(30.0),
            ..Default::default()
        };
        let explanation = explain(&record, &flagged(0.6));
        assert_eq!(explanation.reasons, vec![Reason::FeatureCombination]);
        assert_eq!(
            explanation.messages(),
            vec!["anomaly detected by model based on feature combinations".to_string()]
        );
    }
}
