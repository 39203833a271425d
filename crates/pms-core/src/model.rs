//! Supply-chain data model: observation counts, prior data and the
//! two-stage contamination + diagnostic-accuracy rate model.
//!
//! A latent rate vector has `num_supply_nodes + num_test_nodes` entries:
//! supply-node rates first, then test-node rates. Trace `(tn, sn)` has
//! consolidated rate `tn + (1 - tn) * sn`, observed through a test with
//! sensitivity `sens` and specificity `spec`.

use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use thiserror::Error;

use crate::inference::PosteriorDraws;

/// Tolerance used when checking that rows of the sourcing matrix sum to 1.
pub const ROW_SUM_TOL: f64 = 1e-6;

/// Errors raised while assembling model inputs.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("positives exceed tests at trace ({tn}, {sn}): Y={y} > N={n}")]
    PositivesExceedTests { tn: usize, sn: usize, y: u64, n: u64 },
    #[error("invalid diagnostic accuracy: {name}={value} must lie in (0, 1]")]
    InvalidAccuracy { name: &'static str, value: f64 },
    #[error("invalid sourcing matrix: {0}")]
    InvalidSourcing(String),
    #[error("invalid posterior draws: {0}")]
    InvalidDraws(String),
}

impl From<ModelError> for pms_common::Error {
    fn from(err: ModelError) -> Self {
        pms_common::Error::InvalidObservations(err.to_string())
    }
}

/// Bipartite supply-chain dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupplyChainShape {
    pub num_test_nodes: usize,
    pub num_supply_nodes: usize,
}

impl SupplyChainShape {
    pub fn new(num_test_nodes: usize, num_supply_nodes: usize) -> Self {
        Self {
            num_test_nodes,
            num_supply_nodes,
        }
    }

    /// Number of (test node, supply node) traces.
    pub fn num_traces(&self) -> usize {
        self.num_test_nodes * self.num_supply_nodes
    }

    /// Length of a latent rate vector.
    pub fn num_rates(&self) -> usize {
        self.num_test_nodes + self.num_supply_nodes
    }

    /// Matrix shape `(num_test_nodes, num_supply_nodes)`.
    pub fn dim(&self) -> (usize, usize) {
        (self.num_test_nodes, self.num_supply_nodes)
    }
}

/// True contamination rate of a trace.
pub fn consolidated_rate(sn_rate: f64, tn_rate: f64) -> f64 {
    tn_rate + (1.0 - tn_rate) * sn_rate
}

/// Probability that a single test on a trace with the given consolidated
/// rate comes back positive. Clamped to `[0, 1]` against rounding drift.
pub fn observed_positive_rate(consolidated: f64, sens: f64, spec: f64) -> f64 {
    let p = sens * consolidated + (1.0 - spec) * (1.0 - consolidated);
    p.clamp(0.0, 1.0)
}

/// Observed positive rate of trace `(tn, sn)` under a latent rate vector.
pub fn trace_positive_rate(
    rates: ArrayView1<'_, f64>,
    shape: SupplyChainShape,
    tn: usize,
    sn: usize,
    sens: f64,
    spec: f64,
) -> f64 {
    let sn_rate = rates[sn];
    let tn_rate = rates[shape.num_supply_nodes + tn];
    observed_positive_rate(consolidated_rate(sn_rate, tn_rate), sens, spec)
}

/// Check a diagnostic accuracy parameter.
pub fn validate_accuracy(name: &'static str, value: f64) -> Result<(), ModelError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ModelError::InvalidAccuracy { name, value });
    }
    Ok(())
}

/// Tests performed (`N`) and positives found (`Y`) per trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    n: Array2<u64>,
    y: Array2<u64>,
}

impl Observations {
    /// Validate and wrap count matrices. Requires equal shapes and
    /// `0 <= Y <= N` elementwise.
    pub fn new(n: Array2<u64>, y: Array2<u64>) -> Result<Self, ModelError> {
        if n.dim() != y.dim() {
            return Err(ModelError::ShapeMismatch(format!(
                "N is {:?} but Y is {:?}",
                n.dim(),
                y.dim()
            )));
        }
        if n.is_empty() {
            return Err(ModelError::ShapeMismatch(
                "observation matrices must be non-empty".to_string(),
            ));
        }
        for ((tn, sn), &yv) in y.indexed_iter() {
            let nv = n[[tn, sn]];
            if yv > nv {
                return Err(ModelError::PositivesExceedTests { tn, sn, y: yv, n: nv });
            }
        }
        Ok(Self { n, y })
    }

    /// All-zero counts for a given shape.
    pub fn empty(shape: SupplyChainShape) -> Self {
        Self {
            n: Array2::zeros(shape.dim()),
            y: Array2::zeros(shape.dim()),
        }
    }

    pub fn n(&self) -> &Array2<u64> {
        &self.n
    }

    pub fn y(&self) -> &Array2<u64> {
        &self.y
    }

    pub fn shape(&self) -> SupplyChainShape {
        let (tn, sn) = self.n.dim();
        SupplyChainShape::new(tn, sn)
    }

    pub fn total_tests(&self) -> u64 {
        self.n.sum()
    }

    /// Add simulated counts on top of the observed ones.
    pub fn augment(
        &self,
        n_tilde: &Array2<u64>,
        y_tilde: &Array2<u64>,
    ) -> Result<AugmentedObservations, ModelError> {
        if n_tilde.dim() != self.n.dim() || y_tilde.dim() != self.n.dim() {
            return Err(ModelError::ShapeMismatch(format!(
                "synthetic counts {:?}/{:?} do not match observations {:?}",
                n_tilde.dim(),
                y_tilde.dim(),
                self.n.dim()
            )));
        }
        Ok(AugmentedObservations {
            n_omega: &self.n + n_tilde,
            y_omega: &self.y + y_tilde,
        })
    }
}

/// Observed plus simulated counts for one simulated future.
///
/// Owned separately from [`Observations`] so the prior view of the data is
/// never mutated by a future.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedObservations {
    pub n_omega: Array2<u64>,
    pub y_omega: Array2<u64>,
}

/// Current belief state: observed data, test accuracy, sourcing and
/// posterior draws given that data.
#[derive(Debug, Clone)]
pub struct PriorData {
    observations: Observations,
    sens: f64,
    spec: f64,
    sourcing: Option<Array2<f64>>,
    draws: PosteriorDraws,
}

impl PriorData {
    pub fn new(
        observations: Observations,
        sens: f64,
        spec: f64,
        sourcing: Option<Array2<f64>>,
        draws: PosteriorDraws,
    ) -> Result<Self, ModelError> {
        validate_accuracy("sens", sens)?;
        validate_accuracy("spec", spec)?;
        let shape = observations.shape();
        if let Some(q) = &sourcing {
            validate_sourcing(q, shape)?;
        }
        if draws.num_rates() != shape.num_rates() {
            return Err(ModelError::InvalidDraws(format!(
                "draws have {} rates, chain needs {}",
                draws.num_rates(),
                shape.num_rates()
            )));
        }
        Ok(Self {
            observations,
            sens,
            spec,
            sourcing,
            draws,
        })
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn shape(&self) -> SupplyChainShape {
        self.observations.shape()
    }

    pub fn sens(&self) -> f64 {
        self.sens
    }

    pub fn spec(&self) -> f64 {
        self.spec
    }

    /// Row-stochastic sourcing matrix `Q`, if known.
    pub fn sourcing(&self) -> Option<&Array2<f64>> {
        self.sourcing.as_ref()
    }

    pub fn draws(&self) -> &PosteriorDraws {
        &self.draws
    }
}

/// Check that `Q` has the chain's shape, non-negative entries and rows
/// summing to 1.
pub fn validate_sourcing(q: &Array2<f64>, shape: SupplyChainShape) -> Result<(), ModelError> {
    if q.dim() != shape.dim() {
        return Err(ModelError::InvalidSourcing(format!(
            "Q is {:?}, expected {:?}",
            q.dim(),
            shape.dim()
        )));
    }
    for (tn, row) in q.rows().into_iter().enumerate() {
        if row.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ModelError::InvalidSourcing(format!(
                "row {tn} has negative or non-finite entries"
            )));
        }
        let sum = row.sum();
        if (sum - 1.0).abs() > ROW_SUM_TOL {
            return Err(ModelError::InvalidSourcing(format!(
                "row {tn} sums to {sum:.6}, expected 1"
            )));
        }
    }
    Ok(())
}
