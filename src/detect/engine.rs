use crate::config::DetectorConfig;
use crate::detect::bundle::{ModelBundle, FORMAT_VERSION};
use crate::detect::explain::{explain, Explanation};
use crate::detect::features::FeaturePipeline;
use crate::detect::model::{Model, OutlierModel, RawScores};
use crate::detect::score::{self, ScoreRange, DEGENERATE_SCORE};
use crate::detect::{DetectError, DetectionResult, ModelKind};
use crate::analysis::stats::Series;
use crate::telemetry::{Feature, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const TOP_N: usize = 5;

/// A record with its detection outcome attached. The record itself is
/// carried unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub result: DetectionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    pub mean: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceScore {
    pub device_id: String,
    pub mean_score: f64,
}

/// Batch-level summary of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub total_records: usize,
    pub total_anomalies: usize,
    pub anomaly_percentage: f64,
    pub model_type: ModelKind,
    pub detection_time: DateTime<Utc>,
    /// The fields below stay empty when nothing was flagged.
    pub anomalies_by_device_type: BTreeMap<String, usize>,
    /// Mean and max of each model feature over the flagged records.
    pub feature_stats: BTreeMap<Feature, FeatureStat>,
    pub top_anomalous_devices: Vec<DeviceScore>,
    pub top_anomaly_explanations: Vec<Explanation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub records: Vec<ScoredRecord>,
    pub stats: DetectionStats,
}

impl Detection {
    pub fn anomalies(&self) -> impl Iterator<Item = &ScoredRecord> {
        self.records.iter().filter(|r| r.result.is_anomaly)
    }
}

/// Where the model behind a single-record prediction came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModelSource {
    /// Loaded from disk. It was fitted on an earlier batch, so accuracy
    /// drops as live traffic drifts away from that batch.
    Persisted {
        path: PathBuf,
        trained_at: DateTime<Utc>,
        training_records: usize,
    },
    /// Fitted on the query record alone.
    AdHoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub result: DetectionResult,
    pub explanation: Explanation,
    pub confidence: f64,
    pub model_type: ModelKind,
    pub model_source: ModelSource,
    /// False when no trained model was available and the score comes from
    /// a one-record fit.
    pub calibrated: bool,
    pub features_analyzed: Vec<Feature>,
}

/// Fitted state from the most recent successful [`AnomalyDetector::detect`].
#[derive(Debug, Clone)]
struct Fitted {
    model: Model,
    score_range: Option<ScoreRange>,
    records: usize,
    at: DateTime<Utc>,
}

/// Fits one model per batch and scores that batch.
///
/// Each call to [`detect`](Self::detect) refits from scratch. An instance
/// must not be shared across concurrent runs; give each run its own.
pub struct AnomalyDetector {
    kind: ModelKind,
    config: DetectorConfig,
    pipeline: FeaturePipeline,
    fitted: Option<Fitted>,
}

impl AnomalyDetector {
    pub fn new(kind: ModelKind, config: &DetectorConfig) -> Self {
        info!(model = %kind, features = config.features.len(), "Initialized anomaly detector");
        Self {
            kind,
            config: config.clone(),
            pipeline: FeaturePipeline::new(config.features.clone(), config.min_batch),
            fitted: None,
        }
    }

    /// Build the detector named by `config.model`.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectError> {
        let kind: ModelKind = config.model.parse()?;
        Ok(Self::new(kind, config))
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn features(&self) -> &[Feature] {
        self.pipeline.features()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fit on `batch`, score every record and summarize the outcome.
    pub fn detect(&mut self, batch: &[Record]) -> Result<Detection, DetectError> {
        if batch.len() < self.pipeline.min_batch() {
            warn!(
                records = batch.len(),
                needed = self.pipeline.min_batch(),
                "Insufficient data for anomaly detection"
            );
        }
        let x = self.pipeline.prepare(batch)?;

        let mut model = Model::new(self.kind, &self.config);
        let raw = model.fit_and_score(&x)?;
        let scores = normalize_or_default(self.kind, &raw)?;

        let records: Vec<ScoredRecord> = batch
            .iter()
            .zip(raw.is_anomaly.iter().zip(&scores))
            .map(|(record, (&is_anomaly, &anomaly_score))| ScoredRecord {
                record: record.clone(),
                result: DetectionResult {
                    record_id: record.id,
                    is_anomaly,
                    anomaly_score,
                },
            })
            .collect();

        let stats = self.summarize(&records);
        info!(
            model = %self.kind,
            "Detected {} anomalies ({:.2}%)",
            stats.total_anomalies,
            stats.anomaly_percentage
        );

        self.fitted = Some(Fitted {
            model,
            score_range: raw.decision.as_deref().and_then(ScoreRange::of),
            records: batch.len(),
            at: stats.detection_time,
        });

        Ok(Detection { records, stats })
    }

    fn summarize(&self, records: &[ScoredRecord]) -> DetectionStats {
        let total_records = records.len();
        let anomalies: Vec<&ScoredRecord> = records.iter().filter(|r| r.result.is_anomaly).collect();
        let total_anomalies = anomalies.len();

        let mut stats = DetectionStats {
            total_records,
            total_anomalies,
            anomaly_percentage: if total_records > 0 {
                total_anomalies as f64 / total_records as f64 * 100.0
            } else {
                0.0
            },
            model_type: self.kind,
            detection_time: Utc::now(),
            anomalies_by_device_type: BTreeMap::new(),
            feature_stats: BTreeMap::new(),
            top_anomalous_devices: Vec::new(),
            top_anomaly_explanations: Vec::new(),
        };
        if anomalies.is_empty() {
            return stats;
        }

        for a in &anomalies {
            *stats
                .anomalies_by_device_type
                .entry(a.record.device_type.clone())
                .or_insert(0) += 1;
        }

        for &feature in self.features() {
            let values = Series::from_options(anomalies.iter().map(|a| a.record.feature(feature)));
            stats.feature_stats.insert(
                feature,
                FeatureStat {
                    mean: values.mean(),
                    max: values.max(),
                },
            );
        }

        let mut by_device: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for a in &anomalies {
            by_device
                .entry(a.record.device_id.as_str())
                .or_default()
                .push(a.result.anomaly_score);
        }
        let mut devices: Vec<DeviceScore> = by_device
            .into_iter()
            .map(|(device_id, scores)| DeviceScore {
                device_id: device_id.to_string(),
                mean_score: Series::new(scores).mean().unwrap_or(0.0),
            })
            .collect();
        devices.sort_by(|a, b| b.mean_score.total_cmp(&a.mean_score));
        devices.truncate(TOP_N);
        stats.top_anomalous_devices = devices;

        let mut ranked = anomalies;
        ranked.sort_by(|a, b| b.result.anomaly_score.total_cmp(&a.result.anomaly_score));
        stats.top_anomaly_explanations = ranked
            .into_iter()
            .take(TOP_N)
            .map(|a| explain(&a.record, &a.result))
            .collect();

        stats
    }

    /// Bundle of the last fit, ready to persist. `None` before any fit.
    pub fn bundle(&self) -> Option<ModelBundle> {
        let fitted = self.fitted.as_ref()?;
        let scaler = self.pipeline.scaler()?;
        Some(ModelBundle {
            format_version: FORMAT_VERSION,
            model_type: self.kind,
            model: fitted.model.clone(),
            scaler: scaler.clone(),
            features: self.features().to_vec(),
            score_range: fitted.score_range,
            training_records: fitted.records,
            trained_at: fitted.at,
        })
    }

    /// Classify a single record.
    ///
    /// Uses the bundle at `bundle_path` when it loads and can score the
    /// record. Otherwise the failure is logged and the record is scored by a
    /// model fitted on the record alone, which is reported as uncalibrated.
    pub fn predict_one(&self, record: &Record) -> Result<Prediction, DetectError> {
        let path = &self.config.bundle_path;
        let bundle = match ModelBundle::load(path) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "No usable model bundle, fitting on the query record");
                return self.predict_ad_hoc(record);
            }
        };
        match Self::predict_with_bundle(record, bundle, path.clone()) {
            Err(DetectError::InvalidInput(reason)) => {
                warn!(
                    path = %path.display(),
                    %reason,
                    "Model bundle could not score the record, fitting on the query record"
                );
                self.predict_ad_hoc(record)
            }
            other => other,
        }
    }

    fn predict_with_bundle(
        record: &Record,
        bundle: ModelBundle,
        path: PathBuf,
    ) -> Result<Prediction, DetectError> {
        let batch = std::slice::from_ref(record);
        let x = bundle.scaler.transform(batch, &bundle.features)?;
        let raw = bundle.model.score(&x)?;
        let scores = match score::calibrate(bundle.model_type, &raw, bundle.score_range) {
            Err(DetectError::DegenerateScale { min, max }) => {
                warn!(min, max, "Stored score range is degenerate, using constant score");
                vec![DEGENERATE_SCORE; raw.len()]
            }
            other => other?,
        };

        Ok(prediction(
            record,
            &raw,
            &scores,
            bundle.model_type,
            ModelSource::Persisted {
                path,
                trained_at: bundle.trained_at,
                training_records: bundle.training_records,
            },
            bundle.features,
        ))
    }

    fn predict_ad_hoc(&self, record: &Record) -> Result<Prediction, DetectError> {
        let mut pipeline = FeaturePipeline::new(self.features().to_vec(), 1);
        let x = pipeline.prepare(std::slice::from_ref(record))?;
        let mut model = Model::new(self.kind, &self.config);
        let raw = model.fit_and_score(&x)?;
        let scores = normalize_or_default(self.kind, &raw)?;
        debug!(model = %self.kind, "Ad hoc single-record fit");

        Ok(prediction(
            record,
            &raw,
            &scores,
            self.kind,
            ModelSource::AdHoc,
            self.features().to_vec(),
        ))
    }
}

/// Normalize, replacing a collapsed decision range with a constant score.
fn normalize_or_default(kind: ModelKind, raw: &RawScores) -> Result<Vec<f64>, DetectError> {
    match score::normalize(kind, raw) {
        Err(DetectError::DegenerateScale { min, max }) => {
            warn!(
                min,
                max,
                score = DEGENERATE_SCORE,
                "All decision values equal, assigning constant anomaly score"
            );
            Ok(vec![DEGENERATE_SCORE; raw.len()])
        }
        other => other,
    }
}

fn prediction(
    record: &Record,
    raw: &RawScores,
    scores: &[f64],
    model_type: ModelKind,
    model_source: ModelSource,
    features_analyzed: Vec<Feature>,
) -> Prediction {
    let is_anomaly = raw.is_anomaly.first().copied().unwrap_or(false);
    let anomaly_score = scores.first().copied().unwrap_or(0.0);
    let result = DetectionResult {
        record_id: record.id,
        is_anomaly,
        anomaly_score,
    };
    let confidence = if is_anomaly { 1.0 - anomaly_score } else { anomaly_score };

    Prediction {
        explanation: explain(record, &result),
        result,
        confidence: (confidence * 1000.0).round() / 1000.0,
        model_type,
        calibrated: !matches!(model_source, ModelSource::AdHoc),
        model_source,
        features_analyzed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> DetectorConfig {
        DetectorConfig {
            bundle_path: dir.join("bundle.json"),
            ..Default::default()
        }
    }

    fn batch(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record {
                id: Some(i as i64),
                device_id: format!("dev-{}", i % 4),
                device_type: if i % 2 == 0 { "router" } else { "switch" }.to_string(),
                latency_ms: Some(20.0 + (i % 13) as f64 * 3.0),
                jitter_ms: Some(2.0 + (i % 5) as f64),
                packet_loss: Some(0.001 * (i % 3) as f64),
                cpu_utilization: Some(30.0 + (i % 11) as f64 * 2.0),
                memory_utilization: Some(40.0 + (i % 7) as f64 * 2.0),
                tcp_retransmissions: Some((i % 4) as u32),
                client_count: Some(10 + (i % 9) as u32),
                throughput_mbps: Some(100.0 + (i % 17) as f64 * 5.0),
                success: true,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_unknown_selector_is_rejected() {
        let config = DetectorConfig {
            model: "random_forest".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            AnomalyDetector::from_config(&config),
            Err(DetectError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_detect_scores_every_record() {
        let mut detector = AnomalyDetector::new(ModelKind::IsolationForest, &DetectorConfig::default());
        let detection = detector.detect(&batch(40)).unwrap();

        assert_eq!(detection.records.len(), 40);
        assert!(detection
            .records
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.result.anomaly_score)));
        assert_eq!(detection.stats.total_records, 40);
        assert_eq!(
            detection.stats.total_anomalies,
            detection.anomalies().count()
        );
        assert!(detector.is_fitted());
    }

    #[test]
    fn test_stats_summarize_flagged_records() {
        let mut detector = AnomalyDetector::new(ModelKind::Dbscan, &DetectorConfig::default());
        let detection = detector.detect(&batch(12)).unwrap();
        let stats = &detection.stats;

        // Twelve sparse points never reach ten neighbors within eps.
        assert_eq!(stats.total_anomalies, 12);
        assert_eq!(stats.anomaly_percentage, 100.0);
        assert_eq!(stats.anomalies_by_device_type.get("router"), Some(&6));
        assert!(stats.top_anomalous_devices.len() <= 5);
        assert_eq!(stats.top_anomaly_explanations.len(), 5);
        assert_eq!(stats.feature_stats.len(), Feature::MODEL_DEFAULT.len());
    }

    #[test]
    fn test_constant_batch_gets_neutral_scores() {
        let record = batch(1).remove(0);
        let records = vec![record; 15];
        let mut detector = AnomalyDetector::new(ModelKind::IsolationForest, &DetectorConfig::default());
        let detection = detector.detect(&records).unwrap();
        assert!(detection
            .records
            .iter()
            .all(|r| r.result.anomaly_score == DEGENERATE_SCORE));
    }

    #[test]
    fn test_bundle_exists_only_after_fit() {
        let mut detector = AnomalyDetector::new(ModelKind::OneClassSvm, &DetectorConfig::default());
        assert!(detector.bundle().is_none());
        detector.detect(&batch(20)).unwrap();

        let bundle = detector.bundle().unwrap();
        assert_eq!(bundle.model_type, ModelKind::OneClassSvm);
        assert_eq!(bundle.training_records, 20);
    }

    #[test]
    fn test_predict_one_without_bundle_is_uncalibrated() {
        let dir = tempfile::tempdir().unwrap();
        let detector = AnomalyDetector::new(ModelKind::IsolationForest, &config_in(dir.path()));

        let prediction = detector.predict_one(&batch(1)[0]).unwrap();
        assert_eq!(prediction.model_source, ModelSource::AdHoc);
        assert!(!prediction.calibrated);
        assert_eq!(prediction.result.anomaly_score, DEGENERATE_SCORE);
        assert_eq!(prediction.features_analyzed.len(), 8);
    }

    #[test]
    fn test_predict_one_uses_saved_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut detector = AnomalyDetector::new(ModelKind::IsolationForest, &config);
        detector.detect(&batch(60)).unwrap();
        detector.bundle().unwrap().save(&config.bundle_path).unwrap();

        let spike = Record {
            latency_ms: Some(5000.0),
            jitter_ms: Some(80.0),
            packet_loss: Some(0.4),
            cpu_utilization: Some(99.0),
            memory_utilization: Some(97.0),
            tcp_retransmissions: Some(40),
            client_count: Some(200),
            throughput_mbps: Some(1.0),
            ..Default::default()
        };

        let prediction = detector.predict_one(&spike).unwrap();
        assert!(matches!(prediction.model_source, ModelSource::Persisted { .. }));
        assert!(prediction.calibrated);
        assert!(prediction.result.is_anomaly);
        assert!(prediction.result.anomaly_score > 0.7);
        assert!(prediction
            .explanation
            .flagged_features()
            .contains(&Feature::LatencyMs));
    }

    #[test]
    fn test_predict_one_falls_back_when_bundle_width_disagrees() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut detector = AnomalyDetector::new(ModelKind::IsolationForest, &config);
        detector.detect(&batch(40)).unwrap();

        // Feature list and scaler cut to one column, trees still split on eight.
        let mut bundle = detector.bundle().unwrap();
        bundle.features.truncate(1);
        bundle.scaler.medians.truncate(1);
        bundle.scaler.means.truncate(1);
        bundle.scaler.scales.truncate(1);
        bundle.save(&config.bundle_path).unwrap();

        let prediction = detector.predict_one(&batch(1)[0]).unwrap();
        assert_eq!(prediction.model_source, ModelSource::AdHoc);
        assert!(!prediction.calibrated);
    }
}
