//! The outlier-model contract and the closed set of strategies behind it.

use crate::config::DetectorConfig;
use crate::detect::dbscan::Dbscan;
use crate::detect::iforest::IsolationForest;
use crate::detect::ocsvm::OneClassSvm;
use crate::detect::{DetectError, FeatureMatrix, ModelKind};
use serde::{Deserialize, Serialize};

/// Native output of one strategy, before score normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScores {
    pub is_anomaly: Vec<bool>,
    /// Continuous decision values, lower is more anomalous.
    /// `None` for strategies that only produce labels.
    pub decision: Option<Vec<f64>>,
}

impl RawScores {
    pub fn len(&self) -> usize {
        self.is_anomaly.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_anomaly.is_empty()
    }
}

/// Batch fit and score. Implementations mutate their fitted state in place,
/// so an instance must not be shared between concurrent fits.
pub trait OutlierModel {
    /// Fit on the whole batch and score every row of it.
    fn fit_and_score(&mut self, x: &FeatureMatrix) -> Result<RawScores, DetectError>;

    /// Score rows against previously fitted state.
    fn score(&self, x: &FeatureMatrix) -> Result<RawScores, DetectError>;
}

/// One of the three strategies. Adding a strategy means adding a variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    IsolationForest(IsolationForest),
    OneClassSvm(OneClassSvm),
    Dbscan(Dbscan),
}

impl Model {
    /// Build an unfitted model of `kind` from detector settings.
    pub fn new(kind: ModelKind, config: &DetectorConfig) -> Self {
        match kind {
            ModelKind::IsolationForest => {
                let c = &config.isolation_forest;
                Model::IsolationForest(
                    IsolationForest::new()
                        .with_n_estimators(c.n_estimators)
                        .with_max_samples(c.max_samples)
                        .with_contamination(c.contamination)
                        .with_seed(c.seed),
                )
            }
            ModelKind::OneClassSvm => {
                let c = &config.one_class_svm;
                let mut svm = OneClassSvm::new(c.nu)
                    .with_tol(c.tol)
                    .with_max_iter(c.max_iter);
                if let Some(gamma) = c.gamma {
                    svm = svm.with_gamma(gamma);
                }
                Model::OneClassSvm(svm)
            }
            ModelKind::Dbscan => {
                let c = &config.dbscan;
                Model::Dbscan(Dbscan::new(c.eps, c.min_samples))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::IsolationForest(_) => ModelKind::IsolationForest,
            Model::OneClassSvm(_) => ModelKind::OneClassSvm,
            Model::Dbscan(_) => ModelKind::Dbscan,
        }
    }

    /// Check fitted state read back from storage against the width it will
    /// be scored at.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        let (width, consistent) = match self {
            Model::IsolationForest(m) => (m.n_features(), m.splits_within(n_features)),
            Model::OneClassSvm(m) => (m.n_features(), m.is_consistent()),
            Model::Dbscan(m) => (m.n_features(), m.is_consistent()),
        };
        match width {
            None => Err(format!("{} model is not fitted", self.kind())),
            Some(w) if w != n_features => Err(format!(
                "model fitted on {} features, feature list has {}",
                w, n_features
            )),
            Some(_) if !consistent => Err(format!("{} model state is inconsistent", self.kind())),
            Some(_) => Ok(()),
        }
    }

    fn inner(&self) -> &dyn OutlierModel {
        match self {
            Model::IsolationForest(m) => m,
            Model::OneClassSvm(m) => m,
            Model::Dbscan(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn OutlierModel {
        match self {
            Model::IsolationForest(m) => m,
            Model::OneClassSvm(m) => m,
            Model::Dbscan(m) => m,
        }
    }
}

impl OutlierModel for Model {
    fn fit_and_score(&mut self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        if x.nrows() == 0 {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }
        self.inner_mut().fit_and_score(x)
    }

    fn score(&self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        self.inner().score(x)
    }
}
