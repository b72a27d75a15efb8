//! Maps each model's native output onto an anomaly score, higher meaning
//! more anomalous.
//!
//! The three policies stay separate:
//!
//! - Isolation Forest: decision values are min-max normalized over the batch
//!   and inverted, giving [0, 1].
//! - One-class SVM: the signed boundary distance is reported as is. It is
//!   unbounded and, unlike the other two, larger means *further inside*.
//! - DBSCAN: a fixed two-level scale, [`DBSCAN_NOISE_SCORE`] for noise and
//!   [`DBSCAN_MEMBER_SCORE`] for cluster members.

use crate::detect::model::RawScores;
use crate::detect::{DetectError, ModelKind};
use serde::{Deserialize, Serialize};

pub const DBSCAN_NOISE_SCORE: f64 = 0.8;
pub const DBSCAN_MEMBER_SCORE: f64 = 0.2;

/// Score assigned to every record when the decision range collapses.
pub const DEGENERATE_SCORE: f64 = 0.5;

/// Observed span of decision values, kept with a persisted bundle so single
/// records can be scored on the training scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// Span of `values`, `None` when empty.
    pub fn of(values: &[f64]) -> Option<Self> {
        let min = values.iter().copied().reduce(f64::min)?;
        let max = values.iter().copied().reduce(f64::max)?;
        Some(Self { min, max })
    }

    pub fn is_degenerate(&self) -> bool {
        (self.max - self.min).abs() <= f64::EPSILON
    }

    /// Inverted min-max position of `decision` inside this range.
    /// Values outside the range land outside [0, 1].
    pub fn invert(&self, decision: f64) -> Result<f64, DetectError> {
        if self.is_degenerate() {
            return Err(DetectError::DegenerateScale {
                min: self.min,
                max: self.max,
            });
        }
        Ok(1.0 - (decision - self.min) / (self.max - self.min))
    }
}

/// Scores for a batch the model was just fitted on.
pub fn normalize(kind: ModelKind, raw: &RawScores) -> Result<Vec<f64>, DetectError> {
    match kind {
        ModelKind::IsolationForest => {
            let decision = require_decision(kind, raw)?;
            let Some(range) = ScoreRange::of(decision) else {
                return Ok(Vec::new());
            };
            decision.iter().map(|&d| range.invert(d)).collect()
        }
        ModelKind::OneClassSvm => Ok(require_decision(kind, raw)?.clone()),
        ModelKind::Dbscan => Ok(two_level(raw)),
    }
}

/// Scores for new rows against the range seen at training time.
/// Isolation Forest scores are clamped to [0, 1]; without a stored range
/// this behaves like [`normalize`].
pub fn calibrate(
    kind: ModelKind,
    raw: &RawScores,
    training_range: Option<ScoreRange>,
) -> Result<Vec<f64>, DetectError> {
    match (kind, training_range) {
        (ModelKind::IsolationForest, Some(range)) => require_decision(kind, raw)?
            .iter()
            .map(|&d| range.invert(d).map(|s| s.clamp(0.0, 1.0)))
            .collect(),
        _ => normalize(kind, raw),
    }
}

fn require_decision(kind: ModelKind, raw: &RawScores) -> Result<&Vec<f64>, DetectError> {
    raw.decision.as_ref().ok_or_else(|| {
        DetectError::InvalidInput(format!("{} produced no decision values", kind))
    })
}

fn two_level(raw: &RawScores) -> Vec<f64> {
    raw.is_anomaly
        .iter()
        .map(|&a| if a { DBSCAN_NOISE_SCORE } else { DBSCAN_MEMBER_SCORE })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(decision: Vec<f64>) -> RawScores {
        RawScores {
            is_anomaly: decision.iter().map(|&d| d < 0.0).collect(),
            decision: Some(decision),
        }
    }

    #[test]
    fn test_isolation_forest_is_inverted_min_max() {
        let scores = normalize(ModelKind::IsolationForest, &raw(vec![-0.2, 0.0, 0.2])).unwrap();
        assert_eq!(scores, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_zero_range_is_degenerate() {
        let err = normalize(ModelKind::IsolationForest, &raw(vec![0.1, 0.1, 0.1])).unwrap_err();
        assert!(matches!(err, DetectError::DegenerateScale { .. }));
    }

    #[test]
    fn test_one_class_distance_is_passed_through() {
        let scores = normalize(ModelKind::OneClassSvm, &raw(vec![-3.5, 0.25, 12.0])).unwrap();
        assert_eq!(scores, vec![-3.5, 0.25, 12.0]);
    }

    #[test]
    fn test_dbscan_uses_two_levels() {
        let labels = RawScores {
            is_anomaly: vec![true, false, false],
            decision: None,
        };
        let scores = normalize(ModelKind::Dbscan, &labels).unwrap();
        assert_eq!(scores, vec![0.8, 0.2, 0.2]);
    }

    #[test]
    fn test_missing_decision_is_invalid_for_isolation_forest() {
        let labels = RawScores {
            is_anomaly: vec![true],
            decision: None,
        };
        assert!(matches!(
            normalize(ModelKind::IsolationForest, &labels),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_calibration_clamps_to_training_range() {
        let range = ScoreRange { min: -0.2, max: 0.2 };
        let scores = calibrate(
            ModelKind::IsolationForest,
            &raw(vec![-0.6, 0.0, 0.9]),
            Some(range),
        )
        .unwrap();
        assert_eq!(scores, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_score_range_of_values() {
        assert_eq!(ScoreRange::of(&[]), None);
        let range = ScoreRange::of(&[3.0, -1.0, 2.0]).unwrap();
        assert_eq!(range, ScoreRange { min: -1.0, max: 3.0 });
        assert!(!range.is_degenerate());
    }
}
