//! Synthetic observation generator.
//!
//! Given a sampling plan and one latent rate vector treated as the truth,
//! draws the test counts and positives that plan would produce. Traversal
//! order and random-number consumption are fixed so a seeded generator
//! always yields the same counts.

use ndarray::{Array2, ArrayView1};
use rand::distr::weighted::WeightedIndex;
use rand::distr::{Bernoulli, Distribution};
use rand::Rng;
use thiserror::Error;

use crate::design::SamplingPlan;
use crate::model::{trace_positive_rate, PriorData, SupplyChainShape};

#[derive(Debug, Clone, Error)]
pub enum SimulationError {
    #[error("test-node plan needs a sourcing matrix")]
    MissingSourcing,
    #[error("sourcing row {row} cannot be sampled: {reason}")]
    InvalidSourcing { row: usize, reason: String },
    #[error("plan does not fit chain: {0}")]
    ShapeMismatch(String),
    #[error("positive rate {p} at trace ({tn}, {sn}) is not a probability")]
    InvalidRate { tn: usize, sn: usize, p: f64 },
}

impl From<SimulationError> for pms_common::Error {
    fn from(err: SimulationError) -> Self {
        pms_common::Error::InvalidObservations(err.to_string())
    }
}

/// Chain facts the generator needs besides the plan and truth.
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext<'a> {
    pub shape: SupplyChainShape,
    pub sourcing: Option<&'a Array2<f64>>,
    pub sens: f64,
    pub spec: f64,
}

impl<'a> SimulationContext<'a> {
    pub fn from_prior(prior: &'a PriorData) -> Self {
        Self {
            shape: prior.shape(),
            sourcing: prior.sourcing(),
            sens: prior.sens(),
            spec: prior.spec(),
        }
    }
}

/// Simulated tests (`N~`) and positives (`Y~`) per trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticCounts {
    pub n_tilde: Array2<u64>,
    pub y_tilde: Array2<u64>,
}

/// Simulate the outcome of `plan` when `rates` is the truth.
///
/// Trace plans scan traces in row-major order and draw one Bernoulli per
/// unit. Test-node plans walk test nodes in order; each unit first draws a
/// supply node from that node's sourcing row, then one Bernoulli outcome.
pub fn generate_observations<R: Rng + ?Sized>(
    plan: &SamplingPlan,
    rates: ArrayView1<'_, f64>,
    ctx: &SimulationContext<'_>,
    rng: &mut R,
) -> Result<SyntheticCounts, SimulationError> {
    let shape = ctx.shape;
    if rates.len() != shape.num_rates() {
        return Err(SimulationError::ShapeMismatch(format!(
            "rate vector has {} entries, chain needs {}",
            rates.len(),
            shape.num_rates()
        )));
    }
    let outcomes = outcome_distributions(rates, ctx)?;
    let mut n_tilde = Array2::<u64>::zeros(shape.dim());
    let mut y_tilde = Array2::<u64>::zeros(shape.dim());

    match plan {
        SamplingPlan::Traces(counts) => {
            if counts.dim() != shape.dim() {
                return Err(SimulationError::ShapeMismatch(format!(
                    "trace plan is {:?}, chain is {:?}",
                    counts.dim(),
                    shape.dim()
                )));
            }
            for ((tn, sn), &units) in counts.indexed_iter() {
                for _ in 0..units {
                    n_tilde[[tn, sn]] += 1;
                    if outcomes[[tn, sn]].sample(rng) {
                        y_tilde[[tn, sn]] += 1;
                    }
                }
            }
        }
        SamplingPlan::TestNodes(counts) => {
            if counts.len() != shape.num_test_nodes {
                return Err(SimulationError::ShapeMismatch(format!(
                    "test-node plan has {} entries, chain has {} test nodes",
                    counts.len(),
                    shape.num_test_nodes
                )));
            }
            let q = ctx.sourcing.ok_or(SimulationError::MissingSourcing)?;
            for (tn, &units) in counts.iter().enumerate() {
                if units == 0 {
                    continue;
                }
                let source = WeightedIndex::new(q.row(tn).iter().copied()).map_err(|e| {
                    SimulationError::InvalidSourcing {
                        row: tn,
                        reason: e.to_string(),
                    }
                })?;
                for _ in 0..units {
                    let sn = source.sample(rng);
                    n_tilde[[tn, sn]] += 1;
                    if outcomes[[tn, sn]].sample(rng) {
                        y_tilde[[tn, sn]] += 1;
                    }
                }
            }
        }
    }

    Ok(SyntheticCounts { n_tilde, y_tilde })
}

fn outcome_distributions(
    rates: ArrayView1<'_, f64>,
    ctx: &SimulationContext<'_>,
) -> Result<Array2<Bernoulli>, SimulationError> {
    let shape = ctx.shape;
    let mut cells = Vec::with_capacity(shape.num_traces());
    for tn in 0..shape.num_test_nodes {
        for sn in 0..shape.num_supply_nodes {
            let p = trace_positive_rate(rates, shape, tn, sn, ctx.sens, ctx.spec);
            let dist = Bernoulli::new(p).map_err(|_| SimulationError::InvalidRate { tn, sn, p })?;
            cells.push(dist);
        }
    }
    Array2::from_shape_vec(shape.dim(), cells)
        .map_err(|e| SimulationError::ShapeMismatch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn ctx(shape: SupplyChainShape, q: Option<&Array2<f64>>) -> SimulationContext<'_> {
        SimulationContext {
            shape,
            sourcing: q,
            sens: 1.0,
            spec: 1.0,
        }
    }

    #[test]
    fn trace_plan_places_tests_exactly() {
        let shape = SupplyChainShape::new(2, 2);
        let plan = SamplingPlan::Traces(arr2(&[[3, 0], [1, 5]]));
        let rates = arr1(&[0.3, 0.6, 0.1, 0.2]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let out = generate_observations(&plan, rates.view(), &ctx(shape, None), &mut rng).unwrap();
        assert_eq!(out.n_tilde, arr2(&[[3, 0], [1, 5]]));
        assert!(out.y_tilde.iter().zip(out.n_tilde.iter()).all(|(y, n)| y <= n));
    }

    #[test]
    fn certain_rates_give_certain_outcomes() {
        let shape = SupplyChainShape::new(1, 2);
        let plan = SamplingPlan::Traces(arr2(&[[4, 4]]));
        // With perfect accuracy, consolidated 0 never tests positive.
        let rates = arr1(&[0.0, 1.0, 0.0]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let out = generate_observations(&plan, rates.view(), &ctx(shape, None), &mut rng).unwrap();
        assert_eq!(out.y_tilde, arr2(&[[0, 4]]));
    }

    #[test]
    fn same_seed_same_counts() {
        let shape = SupplyChainShape::new(2, 2);
        let q = arr2(&[[0.5, 0.5], [0.2, 0.8]]);
        let plan = SamplingPlan::TestNodes(arr1(&[10, 10]));
        let rates = arr1(&[0.3, 0.6, 0.1, 0.2]);
        let run = |seed| {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            generate_observations(&plan, rates.view(), &ctx(shape, Some(&q)), &mut rng).unwrap()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_node_plan_follows_sourcing() {
        let shape = SupplyChainShape::new(2, 2);
        let q = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let plan = SamplingPlan::TestNodes(arr1(&[6, 2]));
        let rates = arr1(&[0.5, 0.5, 0.5, 0.5]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let out = generate_observations(&plan, rates.view(), &ctx(shape, Some(&q)), &mut rng).unwrap();
        assert_eq!(out.n_tilde, arr2(&[[6, 0], [0, 2]]));
    }

    #[test]
    fn test_node_plan_without_sourcing_fails() {
        let shape = SupplyChainShape::new(1, 1);
        let plan = SamplingPlan::TestNodes(arr1(&[1]));
        let rates = arr1(&[0.5, 0.5]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let err = generate_observations(&plan, rates.view(), &ctx(shape, None), &mut rng).unwrap_err();
        assert!(matches!(err, SimulationError::MissingSourcing));
    }

    #[test]
    fn wrong_rate_width_is_rejected() {
        let shape = SupplyChainShape::new(1, 1);
        let plan = SamplingPlan::Traces(arr2(&[[1]]));
        let rates = arr1(&[0.5]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        assert!(generate_observations(&plan, rates.view(), &ctx(shape, None), &mut rng).is_err());
    }
}
