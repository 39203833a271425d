//! Streaming summary statistics for Monte Carlo loss samples.
//!
//! Uses Welford's algorithm so that mean and variance stay stable when the
//! per-future losses are large and nearly equal.

use serde::{Deserialize, Serialize};

/// Online mean/variance accumulator.
///
/// # Example
///
/// ```
/// use pms_math::OnlineStats;
///
/// let mut stats = OnlineStats::new();
/// for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
///     stats.update(x);
/// }
/// assert!((stats.mean() - 3.0).abs() < 1e-12);
/// assert!((stats.population_variance() - 2.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OnlineStats {
    count: usize,
    mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
}

impl OnlineStats {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample.
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Number of samples seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Running mean (NaN when empty).
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.mean
    }

    /// Variance with denominator `n` (NaN when empty).
    pub fn population_variance(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    /// Freeze into a [`SummaryStats`].
    pub fn finalize(&self) -> SummaryStats {
        SummaryStats::from_stats(self)
    }
}

/// Mean, spread and a ±2σ band for a set of Monte Carlo losses.
///
/// `std` is the population standard deviation (denominator `n`). The band
/// `mean ± 2·std` describes the spread of per-future losses, while
/// `standard_error` describes the precision of `mean` itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub standard_error: f64,
    pub interval_low: f64,
    pub interval_high: f64,
}

impl SummaryStats {
    fn from_stats(stats: &OnlineStats) -> Self {
        let mean = stats.mean();
        let std = stats.population_variance().sqrt();
        let standard_error = if stats.count() == 0 {
            f64::NAN
        } else {
            std / (stats.count() as f64).sqrt()
        };
        Self {
            count: stats.count(),
            mean,
            std,
            standard_error,
            interval_low: mean - 2.0 * std,
            interval_high: mean + 2.0 * std,
        }
    }

    /// Summarise a slice of samples.
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut stats = OnlineStats::new();
        for &x in samples {
            stats.update(x);
        }
        stats.finalize()
    }
}

/// Arithmetic mean (NaN for an empty slice).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (NaN for an empty slice).
pub fn population_std(values: &[f64]) -> f64 {
    let mut stats = OnlineStats::new();
    for &x in values {
        stats.update(x);
    }
    stats.population_variance().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn empty_stats_are_nan() {
        let stats = OnlineStats::new();
        assert!(stats.mean().is_nan());
        assert!(stats.population_variance().is_nan());
        assert!(mean(&[]).is_nan());
    }

    #[test]
    fn welford_matches_two_pass() {
        let xs = [0.12, 0.5, 0.33, 0.91, 0.07, 0.44];
        let m = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!(approx_eq(population_std(&xs), var.sqrt(), 1e-12));
        assert!(approx_eq(mean(&xs), m, 1e-12));
    }

    #[test]
    fn summary_interval_is_two_sigma() {
        let s = SummaryStats::from_samples(&[1.0, 3.0]);
        assert_eq!(s.count, 2);
        assert!(approx_eq(s.mean, 2.0, 1e-12));
        assert!(approx_eq(s.std, 1.0, 1e-12));
        assert!(approx_eq(s.interval_low, 0.0, 1e-12));
        assert!(approx_eq(s.interval_high, 4.0, 1e-12));
        assert!(approx_eq(s.standard_error, 1.0 / 2.0f64.sqrt(), 1e-12));
    }

    #[test]
    fn constant_samples_have_zero_spread() {
        let s = SummaryStats::from_samples(&[0.25; 10]);
        assert_eq!(s.std, 0.0);
        assert_eq!(s.interval_low, s.interval_high);
    }
}
