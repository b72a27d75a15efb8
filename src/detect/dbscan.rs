//! DBSCAN: points that belong to no dense cluster are anomalies.
//!
//! Only a label comes out of this model. There is no continuous decision
//! value, so [`RawScores::decision`] is always `None`.

use crate::detect::model::{OutlierModel, RawScores};
use crate::detect::{DetectError, FeatureMatrix};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NOISE: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dbscan {
    /// Neighborhood radius.
    eps: f64,
    /// Neighbors (the point itself included) needed to be a core point.
    min_samples: usize,
    /// Core points of the last fit, kept so new rows can be labelled.
    core_samples: Option<Array2<f64>>,
    core_labels: Vec<i64>,
    n_clusters: usize,
}

fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self {
            eps,
            min_samples: min_samples.max(1),
            core_samples: None,
            core_labels: Vec::new(),
            n_clusters: 0,
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Training width, `None` before a fit.
    pub fn n_features(&self) -> Option<usize> {
        self.core_samples.as_ref().map(|c| c.ncols())
    }

    /// One cluster label per stored core sample.
    pub fn is_consistent(&self) -> bool {
        self.core_samples
            .as_ref()
            .map_or(true, |c| c.nrows() == self.core_labels.len())
    }

    fn region_query(&self, x: &FeatureMatrix, point: usize) -> Vec<usize> {
        let row = x.row(point);
        (0..x.nrows())
            .filter(|&i| euclidean(row, x.row(i)) <= self.eps)
            .collect()
    }

    /// Cluster the batch and return one label per row, `-1` for noise.
    fn fit(&mut self, x: &FeatureMatrix) -> Vec<i64> {
        let n = x.nrows();
        let neighbors: Vec<Vec<usize>> = (0..n).map(|i| self.region_query(x, i)).collect();
        let is_core: Vec<bool> = neighbors
            .iter()
            .map(|n| n.len() >= self.min_samples)
            .collect();

        let mut labels = vec![NOISE; n];
        let mut cluster: i64 = 0;

        for i in 0..n {
            if labels[i] != NOISE || !is_core[i] {
                continue;
            }

            labels[i] = cluster;
            let mut queue = neighbors[i].clone();
            let mut head = 0;
            while head < queue.len() {
                let q = queue[head];
                head += 1;
                if labels[q] == NOISE {
                    labels[q] = cluster;
                }
                if !is_core[q] {
                    continue;
                }
                for &next in &neighbors[q] {
                    if labels[next] == NOISE {
                        labels[next] = cluster;
                        queue.push(next);
                    }
                }
            }
            cluster += 1;
        }

        let core: Vec<usize> = (0..n).filter(|&i| is_core[i]).collect();
        let mut core_samples = Array2::<f64>::zeros((core.len(), x.ncols()));
        for (row, &i) in core.iter().enumerate() {
            core_samples.row_mut(row).assign(&x.row(i));
        }
        self.core_labels = core.iter().map(|&i| labels[i]).collect();
        self.core_samples = Some(core_samples);
        self.n_clusters = cluster as usize;

        debug!(
            clusters = self.n_clusters,
            core_points = core.len(),
            noise = labels.iter().filter(|&&l| l == NOISE).count(),
            "Fitted DBSCAN"
        );
        labels
    }

    /// Label of the nearest core sample within `eps`, else noise.
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i64>, DetectError> {
        let core = self
            .core_samples
            .as_ref()
            .ok_or_else(|| DetectError::InvalidInput("DBSCAN is not fitted".to_string()))?;
        if core.nrows() > 0 && core.ncols() != x.ncols() {
            return Err(DetectError::InvalidInput(format!(
                "model expects {} features, got {}",
                core.ncols(),
                x.ncols()
            )));
        }

        Ok(x.rows()
            .into_iter()
            .map(|row| {
                core.rows()
                    .into_iter()
                    .zip(&self.core_labels)
                    .map(|(c, &label)| (euclidean(row, c), label))
                    .filter(|(d, _)| *d <= self.eps)
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map_or(NOISE, |(_, label)| label)
            })
            .collect())
    }
}

fn to_raw(labels: Vec<i64>) -> RawScores {
    RawScores {
        is_anomaly: labels.into_iter().map(|l| l == NOISE).collect(),
        decision: None,
    }
}

impl OutlierModel for Dbscan {
    fn fit_and_score(&mut self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        Ok(to_raw(self.fit(x)))
    }

    fn score(&self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        self.predict(x).map(to_raw)
    }
}
