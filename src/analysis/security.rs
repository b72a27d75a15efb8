use crate::analysis::stats::Series;
use crate::telemetry::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEventSummary {
    pub event_type: String,
    pub device_type: String,
    pub count: usize,
    /// Mean of the source-supplied anomaly scores, if any were present.
    pub avg_anomaly_score: Option<f64>,
}

/// Security-relevant: the security category, a failed or denied event,
/// or any error code.
pub fn is_security_event(r: &Record) -> bool {
    let event_type = r.event_type.to_lowercase();
    r.event_category == "security"
        || event_type.contains("fail")
        || event_type.contains("deny")
        || r.has_error_code()
}

/// Security events grouped by (event type, device type), most frequent
/// first. Empty when nothing matches.
pub fn security_summary(batch: &[Record]) -> Vec<SecurityEventSummary> {
    let mut groups: BTreeMap<(&str, &str), Vec<&Record>> = BTreeMap::new();
    for r in batch.iter().filter(|r| is_security_event(r)) {
        groups
            .entry((r.event_type.as_str(), r.device_type.as_str()))
            .or_default()
            .push(r);
    }

    let mut rows: Vec<SecurityEventSummary> = groups
        .into_iter()
        .map(|((event_type, device_type), records)| SecurityEventSummary {
            event_type: event_type.to_string(),
            device_type: device_type.to_string(),
            count: records.len(),
            avg_anomaly_score: Series::from_options(records.iter().map(|r| r.anomaly_score)).mean(),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}
