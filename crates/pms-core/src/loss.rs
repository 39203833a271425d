//! Loss functions scoring a point estimate against a ground-truth rate vector.
//!
//! Every loss is non-negative for rate vectors in `[0, 1]` and carries an
//! upper bound used to sanity-check utility estimates.

use ndarray::ArrayView1;
use pms_config::LossSpec;

/// Capability shared by all scoring rules.
pub trait LossFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Loss of `estimate` when `truth` holds. Both vectors have equal length.
    fn loss(&self, estimate: ArrayView1<'_, f64>, truth: ArrayView1<'_, f64>) -> f64;

    /// Largest attainable loss for vectors of length `dims` in `[0, 1]`.
    fn upper_bound(&self, dims: usize) -> f64;
}

/// Euclidean distance `||estimate - truth||_2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredError;

impl LossFunction for SquaredError {
    fn name(&self) -> &'static str {
        "squared_error"
    }

    fn loss(&self, estimate: ArrayView1<'_, f64>, truth: ArrayView1<'_, f64>) -> f64 {
        estimate
            .iter()
            .zip(truth.iter())
            .map(|(e, t)| (e - t) * (e - t))
            .sum::<f64>()
            .sqrt()
    }

    fn upper_bound(&self, dims: usize) -> f64 {
        (dims as f64).sqrt()
    }
}

/// Hamming distance after thresholding both vectors at `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub threshold: f64,
}

impl LossFunction for Classification {
    fn name(&self) -> &'static str {
        "classification"
    }

    fn loss(&self, estimate: ArrayView1<'_, f64>, truth: ArrayView1<'_, f64>) -> f64 {
        estimate
            .iter()
            .zip(truth.iter())
            .filter(|(e, t)| (**e > self.threshold) != (**t > self.threshold))
            .count() as f64
    }

    fn upper_bound(&self, dims: usize) -> f64 {
        dims as f64
    }
}

/// Squared asymmetric error, weighted by how close the truth sits to the
/// regulatory `rate_target`.
///
/// Under-estimation is scaled by `over_est_weight` inside the square.
#[derive(Debug, Clone, Copy)]
pub struct AsymmetricPms {
    pub over_est_weight: f64,
    pub rate_target: f64,
}

impl AsymmetricPms {
    fn weight(&self, truth: f64) -> f64 {
        let eps = 0.5 - self.rate_target;
        if eps < 0.0 {
            truth * (1.0 - truth - 2.0 * eps)
        } else {
            (truth + 2.0 * eps) * (1.0 - truth)
        }
    }
}

impl LossFunction for AsymmetricPms {
    fn name(&self) -> &'static str {
        "asymmetric_pms"
    }

    fn loss(&self, estimate: ArrayView1<'_, f64>, truth: ArrayView1<'_, f64>) -> f64 {
        estimate
            .iter()
            .zip(truth.iter())
            .map(|(&e, &t)| {
                let err = self.over_est_weight * (t - e).max(0.0) + (e - t).max(0.0);
                err * err * self.weight(t)
            })
            .sum()
    }

    fn upper_bound(&self, dims: usize) -> f64 {
        let w = self.over_est_weight.max(1.0);
        dims as f64 * w * w
    }
}

/// Build the configured loss.
pub fn loss_from_spec(spec: &LossSpec) -> Box<dyn LossFunction> {
    match spec {
        LossSpec::SquaredError => Box::new(SquaredError),
        LossSpec::Classification { threshold } => Box::new(Classification {
            threshold: *threshold,
        }),
        LossSpec::AsymmetricPms {
            over_est_weight,
            rate_target,
        } => Box::new(AsymmetricPms {
            over_est_weight: *over_est_weight,
            rate_target: *rate_target,
        }),
    }
}
