//! Posterior refresh adapter.
//!
//! The utility loop treats the sampler as an opaque engine behind
//! [`PosteriorSampler`]: it hands over augmented counts plus accuracy and
//! receives a fresh set of draws. Engines own their prior and tuning
//! parameters. Any failure is reported as an [`InferenceError`] and counted
//! against the future that raised it; partial draws are never returned.

pub mod metropolis;

use std::time::Instant;

use ndarray::{Array2, ArrayView1};
use pms_math::logit;
use thiserror::Error;

pub use metropolis::MetropolisSampler;

/// Errors raised by a posterior sampler for a single request.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("invalid posterior request: {0}")]
    InvalidRequest(String),
    #[error("sampler did not converge: acceptance {acceptance:.4} below minimum {minimum:.4}")]
    NonConvergence { acceptance: f64, minimum: f64 },
    #[error("numerical failure during sampling: {0}")]
    Numerical(String),
    #[error("sampler exceeded its deadline after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("sampler returned {got} draws of width {width}, expected width {expected}")]
    IncompleteDraws {
        got: usize,
        width: usize,
        expected: usize,
    },
    #[error("sampler engine error: {0}")]
    Engine(String),
}

impl From<InferenceError> for pms_common::Error {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout { elapsed_ms } => {
                pms_common::Error::InferenceTimeout { millis: elapsed_ms }
            }
            InferenceError::Numerical(msg) => pms_common::Error::NumericalInstability(msg),
            other => pms_common::Error::Inference(other.to_string()),
        }
    }
}

/// A set of posterior draws of the latent rate vector, in probability space.
///
/// Rows are draws; columns are rates laid out supply nodes first, then
/// test nodes. Every entry lies strictly inside `(0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraws {
    draws: Array2<f64>,
}

impl PosteriorDraws {
    pub fn new(draws: Array2<f64>) -> Result<Self, InferenceError> {
        if draws.nrows() == 0 || draws.ncols() == 0 {
            return Err(InferenceError::InvalidRequest(
                "posterior draw set is empty".to_string(),
            ));
        }
        if let Some(bad) = draws.iter().find(|v| !(**v > 0.0 && **v < 1.0)) {
            return Err(InferenceError::Numerical(format!(
                "draw value {bad} outside (0, 1)"
            )));
        }
        Ok(Self { draws })
    }

    /// Build from row vectors; all rows must share a width.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, InferenceError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(InferenceError::InvalidRequest(
                "posterior draw rows have different widths".to_string(),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let draws = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;
        Self::new(draws)
    }

    pub fn num_draws(&self) -> usize {
        self.draws.nrows()
    }

    pub fn num_rates(&self) -> usize {
        self.draws.ncols()
    }

    pub fn draw(&self, index: usize) -> ArrayView1<'_, f64> {
        self.draws.row(index)
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.draws
    }

    /// Draws mapped to log-odds space.
    pub fn to_logit(&self) -> Array2<f64> {
        self.draws.mapv(logit)
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.draws.rows().into_iter().map(|r| r.to_vec()).collect()
    }
}

/// One refresh request: augmented counts plus diagnostic accuracy.
#[derive(Debug, Clone)]
pub struct PosteriorRequest<'a> {
    pub n: &'a Array2<u64>,
    pub y: &'a Array2<u64>,
    pub sens: f64,
    pub spec: f64,
    /// Seed for the engine's own randomness.
    pub seed: u64,
    /// Cooperative deadline; engines abandon the request once it passes.
    pub deadline: Option<Instant>,
}

impl PosteriorRequest<'_> {
    /// Expected width of each returned draw.
    pub fn num_rates(&self) -> usize {
        let (tn, sn) = self.n.dim();
        tn + sn
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// An MCMC engine that refreshes posterior draws given new counts.
pub trait PosteriorSampler: Send + Sync {
    /// Engine name used in logs.
    fn name(&self) -> &str;

    fn sample(&self, request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError>;
}

/// Check that a sampler's output has usable width for the request.
pub fn check_draws(
    request: &PosteriorRequest<'_>,
    draws: &PosteriorDraws,
) -> Result<(), InferenceError> {
    if draws.num_rates() != request.num_rates() {
        return Err(InferenceError::IncompleteDraws {
            got: draws.num_draws(),
            width: draws.num_rates(),
            expected: request.num_rates(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::time::Duration;

    #[test]
    fn draws_reject_boundary_values() {
        assert!(PosteriorDraws::new(arr2(&[[0.0, 0.5]])).is_err());
        assert!(PosteriorDraws::new(arr2(&[[0.5, 1.0]])).is_err());
        assert!(PosteriorDraws::new(arr2(&[[f64::NAN, 0.5]])).is_err());
        assert!(PosteriorDraws::new(arr2(&[[0.2, 0.5]])).is_ok());
    }

    #[test]
    fn draws_from_rows_checks_widths() {
        assert!(PosteriorDraws::from_rows(&[vec![0.1, 0.2], vec![0.3]]).is_err());
        let d = PosteriorDraws::from_rows(&[vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        assert_eq!(d.num_draws(), 2);
        assert_eq!(d.num_rates(), 2);
        assert_eq!(d.draw(1).to_vec(), vec![0.3, 0.4]);
    }

    #[test]
    fn logit_view_is_symmetric_at_half() {
        let d = PosteriorDraws::new(arr2(&[[0.5]])).unwrap();
        assert!(d.to_logit()[[0, 0]].abs() < 1e-12);
    }

    #[test]
    fn request_reports_width_and_deadline() {
        let n = arr2(&[[1u64, 2], [3, 4], [5, 6]]);
        let y = arr2(&[[0u64, 0], [0, 0], [0, 0]]);
        let mut req = PosteriorRequest {
            n: &n,
            y: &y,
            sens: 1.0,
            spec: 1.0,
            seed: 0,
            deadline: None,
        };
        assert_eq!(req.num_rates(), 5);
        assert!(!req.deadline_passed());
        req.deadline = Some(Instant::now() - Duration::from_millis(1));
        assert!(req.deadline_passed());
    }

    #[test]
    fn check_draws_flags_wrong_width() {
        let n = arr2(&[[1u64]]);
        let y = arr2(&[[0u64]]);
        let req = PosteriorRequest {
            n: &n,
            y: &y,
            sens: 1.0,
            spec: 1.0,
            seed: 0,
            deadline: None,
        };
        let ok = PosteriorDraws::new(arr2(&[[0.1, 0.2]])).unwrap();
        let bad = PosteriorDraws::new(arr2(&[[0.1, 0.2, 0.3]])).unwrap();
        assert!(check_draws(&req, &ok).is_ok());
        assert!(matches!(
            check_draws(&req, &bad),
            Err(InferenceError::IncompleteDraws { expected: 2, .. })
        ));
    }
}
