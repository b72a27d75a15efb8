//! Feature preparation: select, impute with the batch median, standardize.
//!
//! All statistics come from the batch being prepared. Nothing carries over
//! between runs except through an explicitly persisted [`FittedScaler`].

use crate::analysis::stats::Series;
use crate::detect::DetectError;
use crate::telemetry::{Feature, Record};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Rows are records, columns follow the pipeline's feature order.
pub type FeatureMatrix = Array2<f64>;

/// Per-feature imputation and standardization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    pub medians: Vec<f64>,
    pub means: Vec<f64>,
    /// Standard deviations; 1.0 where a feature has zero variance.
    pub scales: Vec<f64>,
}

impl FittedScaler {
    /// Learn medians, means and scales from one batch.
    pub fn fit(batch: &[Record], features: &[Feature]) -> Self {
        let mut medians = Vec::with_capacity(features.len());
        let mut means = Vec::with_capacity(features.len());
        let mut scales = Vec::with_capacity(features.len());

        for &feature in features {
            let observed = Series::from_options(batch.iter().map(|r| r.feature(feature)));
            let median = observed.median().unwrap_or_else(|| {
                warn!(%feature, "Feature missing from every record in batch, imputing 0.0");
                0.0
            });

            // Moments are taken after imputation, matching what the model sees.
            let imputed = Series::new(
                batch
                    .iter()
                    .map(|r| r.feature(feature).unwrap_or(median))
                    .collect(),
            );
            let mean = imputed.mean().unwrap_or(0.0);
            let std = imputed.std_dev().unwrap_or(0.0);

            medians.push(median);
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }

        Self {
            medians,
            means,
            scales,
        }
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Medians, means and scales all cover the same features.
    pub fn is_consistent(&self) -> bool {
        self.medians.len() == self.means.len() && self.scales.len() == self.means.len()
    }

    /// Impute and standardize `batch` with these parameters.
    pub fn transform(&self, batch: &[Record], features: &[Feature]) -> Result<FeatureMatrix, DetectError> {
        if features.len() != self.n_features() {
            return Err(DetectError::InvalidInput(format!(
                "scaler fitted on {} features, asked to transform {}",
                self.n_features(),
                features.len()
            )));
        }

        let n_cols = features.len();
        let mut data = Vec::with_capacity(batch.len() * n_cols);
        for record in batch {
            for (j, &feature) in features.iter().enumerate() {
                let raw = record.feature(feature).unwrap_or(self.medians[j]);
                if !raw.is_finite() {
                    return Err(DetectError::InvalidInput(format!(
                        "non-finite {} value {}",
                        feature, raw
                    )));
                }
                data.push((raw - self.means[j]) / self.scales[j]);
            }
        }

        Array2::from_shape_vec((batch.len(), n_cols), data)
            .map_err(|e| DetectError::InvalidInput(e.to_string()))
    }
}

/// Turns a record batch into a standardized feature matrix.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    features: Vec<Feature>,
    min_batch: usize,
    scaler: Option<FittedScaler>,
}

impl FeaturePipeline {
    pub fn new(features: Vec<Feature>, min_batch: usize) -> Self {
        Self {
            features,
            min_batch,
            scaler: None,
        }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn min_batch(&self) -> usize {
        self.min_batch
    }

    /// Scaler fitted by the last successful [`prepare`](Self::prepare).
    pub fn scaler(&self) -> Option<&FittedScaler> {
        self.scaler.as_ref()
    }

    /// Fit the scaler on `batch` and return the transformed matrix.
    pub fn prepare(&mut self, batch: &[Record]) -> Result<FeatureMatrix, DetectError> {
        if batch.len() < self.min_batch {
            return Err(DetectError::InsufficientData {
                needed: self.min_batch,
                have: batch.len(),
            });
        }
        if self.features.is_empty() {
            return Err(DetectError::InvalidInput("no features selected".to_string()));
        }

        let scaler = FittedScaler::fit(batch, &self.features);
        let matrix = scaler.transform(batch, &self.features)?;
        debug!(
            rows = matrix.nrows(),
            cols = matrix.ncols(),
            "Prepared feature matrix"
        );
        self.scaler = Some(scaler);
        Ok(matrix)
    }
}
