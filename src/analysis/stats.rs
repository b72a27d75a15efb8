//! Column statistics shared by the feature pipeline and the aggregation views.

/// A column of observed (non-missing) values.
#[derive(Debug, Clone, Default)]
pub struct Series {
    values: Vec<f64>,
}

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Collect the present values of an optional column, skipping gaps.
    pub fn from_options<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        Self {
            values: values.into_iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.sum() / self.values.len() as f64)
    }

    /// Population variance (divides by N).
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        Some(sum_sq_diff / self.values.len() as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    /// Median; the two middle values are averaged for even lengths.
    pub fn median(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let s = Series::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(s.mean(), Some(3.0));
        // Variance of 1..5 is 2.0
        assert_eq!(s.variance(), Some(2.0));
        assert_eq!(s.max(), Some(5.0));
        assert_eq!(s.min(), Some(1.0));
        assert_eq!(s.median(), Some(3.0));
    }

    #[test]
    fn test_median_even_length() {
        let s = Series::new(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(s.median(), Some(2.5));
    }

    #[test]
    fn test_gaps_are_skipped() {
        let s = Series::from_options(vec![Some(2.0), None, Some(4.0)]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.mean(), Some(3.0));
    }

    #[test]
    fn test_empty_series() {
        let s = Series::default();
        assert!(s.is_empty());
        assert_eq!(s.mean(), None);
        assert_eq!(s.median(), None);
        assert_eq!(s.max(), None);
        assert_eq!(s.sum(), 0.0);
    }
}
