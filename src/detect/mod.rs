//! Unsupervised anomaly detection over telemetry batches.

pub mod bundle;
pub mod dbscan;
pub mod engine;
pub mod explain;
pub mod features;
pub mod iforest;
pub mod model;
pub mod ocsvm;
pub mod score;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub use self::bundle::ModelBundle;
pub use self::engine::{AnomalyDetector, Detection, DetectionStats, ModelSource, Prediction, ScoredRecord};
pub use self::explain::{explain, Explanation, Reason};
pub use self::features::{FeatureMatrix, FeaturePipeline};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient data: need at least {needed} records, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("unsupported model type: {0}")]
    UnsupportedModel(String),

    #[error("failed to load model bundle from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("degenerate score range: min {min} equals max {max}")]
    DegenerateScale { min: f64, max: f64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// The three interchangeable outlier-detection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    IsolationForest,
    OneClassSvm,
    Dbscan,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::IsolationForest,
        ModelKind::OneClassSvm,
        ModelKind::Dbscan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::IsolationForest => "isolation_forest",
            ModelKind::OneClassSvm => "one_class_svm",
            ModelKind::Dbscan => "dbscan",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DetectError::UnsupportedModel(s.to_string()))
    }
}

/// Per-record outcome of a detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub record_id: Option<i64>,
    pub is_anomaly: bool,
    /// Higher is more anomalous. Bounded to [0, 1] except for the
    /// one-class boundary model, which reports raw signed distance.
    pub anomaly_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_selector_parsing() {
        assert_eq!(
            "isolation_forest".parse::<ModelKind>().unwrap(),
            ModelKind::IsolationForest
        );
        assert_eq!(
            "one_class_svm".parse::<ModelKind>().unwrap(),
            ModelKind::OneClassSvm
        );
        assert_eq!("dbscan".parse::<ModelKind>().unwrap(), ModelKind::Dbscan);

        let err = "random_forest".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, DetectError::UnsupportedModel(ref s) if s == "random_forest"));
    }

    #[test]
    fn test_model_kind_display_matches_selector() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.to_string().parse::<ModelKind>().unwrap(), kind);
        }
    }
}
