//! Isolation Forest: outliers are the points random splits isolate quickly.

use crate::detect::model::{OutlierModel, RawScores};
use crate::detect::{DetectError, FeatureMatrix};
use rand::prelude::*;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IsolationTree {
    Internal {
        feature: usize,
        threshold: f64,
        /// Values < threshold
        left: Box<IsolationTree>,
        /// Values >= threshold
        right: Box<IsolationTree>,
    },
    External {
        size: usize,
    },
}

impl IsolationTree {
    pub fn build(
        x: &FeatureMatrix,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let n_samples = indices.len();
        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        // Only features that still vary inside this node can split it.
        let splittable: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|feature| {
                let (lo, hi) = indices.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &i| (lo.min(x[[i, feature]]), hi.max(x[[i, feature]])),
                );
                (hi - lo > 1e-12).then_some((feature, lo, hi))
            })
            .collect();

        let Some(&(feature, lo, hi)) = splittable.choose(rng) else {
            return IsolationTree::External { size: n_samples };
        };

        let threshold = rng.gen_range(lo..hi);
        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] < threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        IsolationTree::Internal {
            feature,
            threshold,
            left: Box::new(Self::build(x, &left_indices, height + 1, max_height, rng)),
            right: Box::new(Self::build(x, &right_indices, height + 1, max_height, rng)),
        }
    }

    /// Depth reached by `sample`, plus the expected depth of the leaf's remainder.
    pub fn path_length(&self, sample: &[f64], current_height: usize) -> f64 {
        match self {
            IsolationTree::External { size } => current_height as f64 + average_path_length(*size),
            IsolationTree::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample.get(*feature).is_some_and(|v| v < threshold) {
                    left.path_length(sample, current_height + 1)
                } else {
                    right.path_length(sample, current_height + 1)
                }
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree of `n` nodes.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile of an unsorted slice, `q` in [0, 1].
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Isolation Forest anomaly detector.
///
/// The decision value is `score - offset`, where `score` is the negated
/// anomaly score `-2^(-E[h(x)] / c(n))` and `offset` is its `contamination`
/// percentile over the training batch. Negative decisions are anomalies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
    trees: Vec<IsolationTree>,
    /// Sub-sample size actually used per tree.
    samples_per_tree: usize,
    /// Columns of the training matrix.
    #[serde(default)]
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn new() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
            trees: Vec::new(),
            samples_per_tree: 0,
            n_features: 0,
            offset: -0.5,
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(1);
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c.clamp(0.0, 0.5);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Training width, `None` before a fit.
    pub fn n_features(&self) -> Option<usize> {
        self.is_fitted().then_some(self.n_features)
    }

    /// Every split must read a column the forest was trained on.
    pub fn splits_within(&self, n_features: usize) -> bool {
        fn walk(tree: &IsolationTree, n: usize) -> bool {
            match tree {
                IsolationTree::External { .. } => true,
                IsolationTree::Internal {
                    feature, left, right, ..
                } => *feature < n && walk(left, n) && walk(right, n),
            }
        }
        self.trees.iter().all(|t| walk(t, n_features))
    }

    fn fit(&mut self, x: &FeatureMatrix) {
        let n_samples = x.nrows();
        let samples_per_tree = self.max_samples.min(n_samples);
        let max_height = (samples_per_tree as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        self.trees = (0..self.n_estimators)
            .map(|_| {
                let indices = sample(&mut rng, n_samples, samples_per_tree).into_vec();
                IsolationTree::build(x, &indices, 0, max_height, &mut rng)
            })
            .collect();
        self.samples_per_tree = samples_per_tree;
        self.n_features = x.ncols();

        let scores = self.score_samples(x);
        self.offset = percentile(&scores, self.contamination);
        debug!(
            trees = self.trees.len(),
            samples_per_tree,
            offset = self.offset,
            "Fitted isolation forest"
        );
    }

    /// Negated anomaly score per row; lower is more anomalous.
    fn score_samples(&self, x: &FeatureMatrix) -> Vec<f64> {
        let c_n = average_path_length(self.samples_per_tree);
        let c_n = if c_n > 0.0 { c_n } else { 1.0 };

        x.rows()
            .into_iter()
            .map(|row| {
                let sample: Vec<f64> = row.iter().copied().collect();
                let avg_path_length: f64 = self
                    .trees
                    .iter()
                    .map(|tree| tree.path_length(&sample, 0))
                    .sum::<f64>()
                    / self.trees.len() as f64;
                -(2.0_f64.powf(-avg_path_length / c_n))
            })
            .collect()
    }

    fn decide(&self, x: &FeatureMatrix) -> RawScores {
        let decision: Vec<f64> = self
            .score_samples(x)
            .into_iter()
            .map(|s| s - self.offset)
            .collect();
        RawScores {
            is_anomaly: decision.iter().map(|&d| d < 0.0).collect(),
            decision: Some(decision),
        }
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlierModel for IsolationForest {
    fn fit_and_score(&mut self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        self.fit(x);
        Ok(self.decide(x))
    }

    fn score(&self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        if !self.is_fitted() {
            return Err(DetectError::InvalidInput("isolation forest is not fitted".to_string()));
        }
        if x.ncols() != self.n_features {
            return Err(DetectError::InvalidInput(format!(
                "model expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(self.decide(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn cluster_with_outliers() -> FeatureMatrix {
        let mut data = Vec::new();
        for i in 0..50 {
            data.push((i % 10) as f64 / 10.0);
            data.push(((i % 7) + 1) as f64 / 10.0);
        }
        data.extend_from_slice(&[10.0, 10.0]);
        data.extend_from_slice(&[-8.0, -9.0]);
        Array2::from_shape_vec((52, 2), data).unwrap()
    }

    #[test]
    fn test_outliers_get_lowest_decision() {
        let x = cluster_with_outliers();
        let mut forest = IsolationForest::new()
            .with_n_estimators(50)
            .with_contamination(0.05)
            .with_seed(7);

        let raw = forest.fit_and_score(&x).unwrap();
        let decision = raw.decision.unwrap();

        assert!(decision[50] < decision[0]);
        assert!(decision[51] < decision[0]);
        assert!(raw.is_anomaly[50]);
        assert!(raw.is_anomaly[51]);
    }

    #[test]
    fn test_contamination_bounds_flag_share() {
        let x = cluster_with_outliers();
        let mut forest = IsolationForest::new().with_contamination(0.1);
        let raw = forest.fit_and_score(&x).unwrap();

        let flagged = raw.is_anomaly.iter().filter(|&&a| a).count();
        assert!(flagged >= 1);
        assert!(flagged <= 6, "flagged {} of 52", flagged);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let x = cluster_with_outliers();
        let a = IsolationForest::new().with_seed(3).fit_and_score(&x).unwrap();
        let b = IsolationForest::new().with_seed(3).fit_and_score(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_score_requires_fit() {
        let x = cluster_with_outliers();
        assert!(IsolationForest::new().score(&x).is_err());
    }

    #[test]
    fn test_score_rejects_wrong_width() {
        let x = cluster_with_outliers();
        let mut forest = IsolationForest::new().with_n_estimators(10);
        forest.fit_and_score(&x).unwrap();
        assert_eq!(forest.n_features(), Some(2));
        assert!(forest.splits_within(2));
        assert!(!forest.splits_within(0));

        let narrow = Array2::from_shape_vec((1, 1), vec![0.5]).unwrap();
        let err = forest.score(&narrow).unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is roughly 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 0.5), 2.5);
        assert_eq!(percentile(&[5.0], 0.1), 5.0);
    }
}
