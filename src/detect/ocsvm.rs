//! One-class SVM with an RBF kernel, trained by SMO.
//!
//! Dual problem: minimize `0.5 * a'Ka` subject to `0 <= a_i <= 1` and
//! `sum(a) = nu * n`. The decision value `sum(a_i * K(x_i, x)) - rho` is a
//! signed distance from the learned boundary; negative means outside.

use crate::detect::model::{OutlierModel, RawScores};
use crate::detect::{DetectError, FeatureMatrix};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const UPPER_BOUND: f64 = 1.0;
const MIN_QUAD: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneClassSvm {
    nu: f64,
    /// Configured kernel coefficient; `None` resolves to `1 / n_features` at fit time.
    gamma: Option<f64>,
    tol: f64,
    max_iter: usize,
    fitted_gamma: f64,
    support_vectors: Option<Array2<f64>>,
    dual_coef: Vec<f64>,
    rho: f64,
}

fn rbf(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, gamma: f64) -> f64 {
    let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * sq).exp()
}

impl OneClassSvm {
    pub fn new(nu: f64) -> Self {
        Self {
            nu: nu.clamp(1e-6, 1.0),
            gamma: None,
            tol: 1e-3,
            max_iter: 10_000,
            fitted_gamma: 0.0,
            support_vectors: None,
            dual_coef: Vec::new(),
            rho: 0.0,
        }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn n_support(&self) -> usize {
        self.dual_coef.len()
    }

    /// Training width, `None` before a fit.
    pub fn n_features(&self) -> Option<usize> {
        self.support_vectors.as_ref().map(|sv| sv.ncols())
    }

    /// One dual coefficient per stored support vector.
    pub fn is_consistent(&self) -> bool {
        self.support_vectors
            .as_ref()
            .map_or(true, |sv| sv.nrows() == self.dual_coef.len())
    }

    /// Fit and return the decision value of every training row.
    fn fit(&mut self, x: &FeatureMatrix) -> Vec<f64> {
        let n = x.nrows();
        let gamma = self
            .gamma
            .unwrap_or_else(|| 1.0 / x.ncols().max(1) as f64);
        let kernel = |i: usize, j: usize| rbf(x.row(i), x.row(j), gamma);

        // Feasible start: the first floor(nu * n) multipliers at the bound.
        let nu_l = self.nu * n as f64;
        let full = (nu_l.floor() as usize).min(n);
        let mut alpha = vec![0.0; n];
        for a in alpha.iter_mut().take(full) {
            *a = UPPER_BOUND;
        }
        if full < n {
            alpha[full] = nu_l - full as f64;
        }

        let mut grad = vec![0.0; n];
        for (i, &a) in alpha.iter().enumerate().filter(|(_, a)| **a > 0.0) {
            for (k, g) in grad.iter_mut().enumerate() {
                *g += a * kernel(k, i);
            }
        }

        let mut iterations = 0;
        while iterations < self.max_iter {
            // Maximal violating pair: move mass from j (largest gradient) to i (smallest).
            let up = (0..n)
                .filter(|&k| alpha[k] < UPPER_BOUND)
                .min_by(|&a, &b| grad[a].total_cmp(&grad[b]));
            let down = (0..n)
                .filter(|&k| alpha[k] > 0.0)
                .max_by(|&a, &b| grad[a].total_cmp(&grad[b]));

            let (Some(i), Some(j)) = (up, down) else { break };
            if i == j || grad[j] - grad[i] < self.tol {
                break;
            }

            let quad = (2.0 - 2.0 * kernel(i, j)).max(MIN_QUAD);
            let step = ((grad[j] - grad[i]) / quad)
                .min(UPPER_BOUND - alpha[i])
                .min(alpha[j]);

            alpha[i] += step;
            alpha[j] -= step;
            for (k, g) in grad.iter_mut().enumerate() {
                *g += step * (kernel(k, i) - kernel(k, j));
            }
            iterations += 1;
        }

        if iterations == self.max_iter {
            warn!(max_iter = self.max_iter, "One-class SVM did not converge");
        }

        self.rho = Self::compute_rho(&alpha, &grad);

        let support: Vec<usize> = (0..n).filter(|&k| alpha[k] > 0.0).collect();
        let mut sv = Array2::<f64>::zeros((support.len(), x.ncols()));
        for (row, &k) in support.iter().enumerate() {
            sv.row_mut(row).assign(&x.row(k));
        }
        self.dual_coef = support.iter().map(|&k| alpha[k]).collect();
        self.support_vectors = Some(sv);
        self.fitted_gamma = gamma;

        debug!(
            iterations,
            n_support = self.dual_coef.len(),
            rho = self.rho,
            "Fitted one-class SVM"
        );

        grad.iter().map(|g| g - self.rho).collect()
    }

    /// Offset from free multipliers, or the midpoint of the bound gradients.
    fn compute_rho(alpha: &[f64], grad: &[f64]) -> f64 {
        let mut ub = f64::INFINITY;
        let mut lb = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut n_free = 0usize;

        for (&a, &g) in alpha.iter().zip(grad) {
            if a >= UPPER_BOUND {
                lb = lb.max(g);
            } else if a <= 0.0 {
                ub = ub.min(g);
            } else {
                free_sum += g;
                n_free += 1;
            }
        }

        if n_free > 0 {
            free_sum / n_free as f64
        } else if ub.is_finite() && lb.is_finite() {
            (ub + lb) / 2.0
        } else if ub.is_finite() {
            ub
        } else {
            lb
        }
    }

    fn decision(&self, x: &FeatureMatrix) -> Result<Vec<f64>, DetectError> {
        let sv = self
            .support_vectors
            .as_ref()
            .ok_or_else(|| DetectError::InvalidInput("one-class SVM is not fitted".to_string()))?;
        if sv.ncols() != x.ncols() {
            return Err(DetectError::InvalidInput(format!(
                "model expects {} features, got {}",
                sv.ncols(),
                x.ncols()
            )));
        }

        Ok(x.rows()
            .into_iter()
            .map(|row| {
                sv.rows()
                    .into_iter()
                    .zip(&self.dual_coef)
                    .map(|(s, &a)| a * rbf(s, row, self.fitted_gamma))
                    .sum::<f64>()
                    - self.rho
            })
            .collect())
    }
}

fn to_raw(decision: Vec<f64>) -> RawScores {
    RawScores {
        is_anomaly: decision.iter().map(|&d| d < 0.0).collect(),
        decision: Some(decision),
    }
}

impl OutlierModel for OneClassSvm {
    fn fit_and_score(&mut self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        Ok(to_raw(self.fit(x)))
    }

    fn score(&self, x: &FeatureMatrix) -> Result<RawScores, DetectError> {
        self.decision(x).map(to_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with_outlier() -> FeatureMatrix {
        let mut data = Vec::new();
        for i in 0..40 {
            let t = i as f64 * 0.37;
            data.push(t.sin() * 0.5);
            data.push(t.cos() * 0.5);
        }
        data.extend_from_slice(&[6.0, -6.0]);
        Array2::from_shape_vec((41, 2), data).unwrap()
    }

    #[test]
    fn test_far_point_is_outside_boundary() {
        let x = blob_with_outlier();
        let mut svm = OneClassSvm::new(0.1);
        let raw = svm.fit_and_score(&x).unwrap();
        let decision = raw.decision.unwrap();

        assert!(raw.is_anomaly[40]);
        let min_idx = (0..decision.len())
            .min_by(|&a, &b| decision[a].total_cmp(&decision[b]))
            .unwrap();
        assert_eq!(min_idx, 40);
    }

    #[test]
    fn test_flag_share_tracks_nu() {
        let x = blob_with_outlier();
        let mut svm = OneClassSvm::new(0.1);
        let raw = svm.fit_and_score(&x).unwrap();
        let flagged = raw.is_anomaly.iter().filter(|&&a| a).count();
        assert!(flagged >= 1);
        assert!(flagged < 20, "flagged {} of 41", flagged);
        // sum(a) = nu * n with every a <= 1 forces at least ceil(4.1) support vectors
        assert!(svm.n_support() >= 5);
    }

    #[test]
    fn test_scoring_matches_training_decision() {
        let x = blob_with_outlier();
        let mut svm = OneClassSvm::new(0.2);
        let fitted = svm.fit_and_score(&x).unwrap().decision.unwrap();
        let rescored = svm.score(&x).unwrap().decision.unwrap();
        for (a, b) in fitted.iter().zip(&rescored) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_point_fit() {
        let x = Array2::from_shape_vec((1, 2), vec![0.0, 0.0]).unwrap();
        let mut svm = OneClassSvm::new(0.1);
        let raw = svm.fit_and_score(&x).unwrap();
        assert_eq!(raw.len(), 1);
        assert!(!raw.is_anomaly[0]);
    }
}
