//! Synthetic supply chains for demos, tests and benchmarks.

use ndarray::{Array1, Array2};
use pms_math::clamp_prob;
use rand::distr::weighted::WeightedIndex;
use rand::distr::{Bernoulli, Distribution};
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Gamma};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::PosteriorDraws;
use crate::model::{
    trace_positive_rate, validate_accuracy, ModelError, Observations, PriorData, SupplyChainShape,
};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("invalid synthetic chain config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<FixtureError> for pms_common::Error {
    fn from(err: FixtureError) -> Self {
        pms_common::Error::InvalidObservations(err.to_string())
    }
}

/// Parameters for [`generate_synthetic_chain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticChainConfig {
    pub num_supply_nodes: usize,
    pub num_test_nodes: usize,
    pub sens: f64,
    pub spec: f64,
    /// Tests already run on the chain.
    pub num_samples: u64,
    pub seed: u64,
    /// Supply-node then test-node rates; drawn from Beta priors when absent.
    #[serde(default)]
    pub true_rates: Option<Vec<f64>>,
}

impl Default for SyntheticChainConfig {
    fn default() -> Self {
        Self {
            num_supply_nodes: 3,
            num_test_nodes: 4,
            sens: 1.0,
            spec: 1.0,
            num_samples: 100,
            seed: 1,
            true_rates: None,
        }
    }
}

/// A generated chain with the truth that produced its counts.
#[derive(Debug, Clone)]
pub struct SyntheticChain {
    pub observations: Observations,
    pub sourcing: Array2<f64>,
    pub true_rates: Array1<f64>,
    pub sens: f64,
    pub spec: f64,
}

impl SyntheticChain {
    pub fn shape(&self) -> SupplyChainShape {
        self.observations.shape()
    }

    /// Combine with a current-belief draw set.
    pub fn into_prior_data(self, draws: PosteriorDraws) -> Result<PriorData, ModelError> {
        PriorData::new(
            self.observations,
            self.sens,
            self.spec,
            Some(self.sourcing),
            draws,
        )
    }
}

/// Build a chain: Dirichlet(1) sourcing rows, Beta-distributed true rates
/// unless given, and `num_samples` tests at uniformly chosen test nodes.
pub fn generate_synthetic_chain(config: &SyntheticChainConfig) -> Result<SyntheticChain, FixtureError> {
    if config.num_supply_nodes == 0 || config.num_test_nodes == 0 {
        return Err(FixtureError::InvalidConfig(
            "chain needs at least one supply node and one test node".to_string(),
        ));
    }
    validate_accuracy("sens", config.sens)?;
    validate_accuracy("spec", config.spec)?;
    let shape = SupplyChainShape::new(config.num_test_nodes, config.num_supply_nodes);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);

    let sourcing = dirichlet_rows(shape, &mut rng)?;
    let true_rates = match &config.true_rates {
        Some(rates) => given_rates(rates, shape)?,
        None => beta_rates(shape, &mut rng)?,
    };

    let sources = (0..shape.num_test_nodes)
        .map(|tn| {
            WeightedIndex::new(sourcing.row(tn).iter().copied())
                .map_err(|e| FixtureError::InvalidConfig(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut n = Array2::<u64>::zeros(shape.dim());
    let mut y = Array2::<u64>::zeros(shape.dim());
    for _ in 0..config.num_samples {
        let tn = rng.random_range(0..shape.num_test_nodes);
        let sn = sources[tn].sample(&mut rng);
        let p = trace_positive_rate(true_rates.view(), shape, tn, sn, config.sens, config.spec);
        let positive = Bernoulli::new(p)
            .map_err(|e| FixtureError::InvalidConfig(e.to_string()))?
            .sample(&mut rng);
        n[[tn, sn]] += 1;
        if positive {
            y[[tn, sn]] += 1;
        }
    }

    Ok(SyntheticChain {
        observations: Observations::new(n, y)?,
        sourcing,
        true_rates,
        sens: config.sens,
        spec: config.spec,
    })
}

fn dirichlet_rows<R: Rng + ?Sized>(shape: SupplyChainShape, rng: &mut R) -> Result<Array2<f64>, FixtureError> {
    let gamma = Gamma::new(1.0, 1.0).map_err(|e| FixtureError::InvalidConfig(e.to_string()))?;
    let mut q = Array2::<f64>::zeros(shape.dim());
    for mut row in q.rows_mut() {
        for v in row.iter_mut() {
            *v = gamma.sample(rng);
        }
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        } else {
            row.fill(1.0 / shape.num_supply_nodes as f64);
        }
    }
    Ok(q)
}

fn beta_rates<R: Rng + ?Sized>(shape: SupplyChainShape, rng: &mut R) -> Result<Array1<f64>, FixtureError> {
    let supply = Beta::new(2.0, 9.0).map_err(|e| FixtureError::InvalidConfig(e.to_string()))?;
    let test = Beta::new(1.0, 9.0).map_err(|e| FixtureError::InvalidConfig(e.to_string()))?;
    let rates = (0..shape.num_rates())
        .map(|k| {
            let raw = if k < shape.num_supply_nodes {
                supply.sample(rng)
            } else {
                test.sample(rng)
            };
            clamp_prob(raw)
        })
        .collect();
    Ok(rates)
}

fn given_rates(rates: &[f64], shape: SupplyChainShape) -> Result<Array1<f64>, FixtureError> {
    if rates.len() != shape.num_rates() {
        return Err(FixtureError::InvalidConfig(format!(
            "true_rates has {} entries, chain needs {}",
            rates.len(),
            shape.num_rates()
        )));
    }
    if let Some(bad) = rates.iter().find(|r| !(0.0..=1.0).contains(*r)) {
        return Err(FixtureError::InvalidConfig(format!(
            "true rate {bad} outside [0, 1]"
        )));
    }
    Ok(Array1::from(rates.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{validate_sourcing, ROW_SUM_TOL};

    #[test]
    fn chain_has_requested_shape_and_sample_count() {
        let config = SyntheticChainConfig {
            num_supply_nodes: 3,
            num_test_nodes: 5,
            num_samples: 250,
            ..Default::default()
        };
        let chain = generate_synthetic_chain(&config).unwrap();
        assert_eq!(chain.shape(), SupplyChainShape::new(5, 3));
        assert_eq!(chain.observations.total_tests(), 250);
        assert_eq!(chain.true_rates.len(), 8);
        assert!(validate_sourcing(&chain.sourcing, chain.shape()).is_ok());
        for row in chain.sourcing.rows() {
            assert!((row.sum() - 1.0).abs() < ROW_SUM_TOL);
        }
    }

    #[test]
    fn same_seed_same_chain() {
        let config = SyntheticChainConfig::default();
        let a = generate_synthetic_chain(&config).unwrap();
        let b = generate_synthetic_chain(&config).unwrap();
        assert_eq!(a.observations, b.observations);
        assert_eq!(a.sourcing, b.sourcing);
        assert_eq!(a.true_rates, b.true_rates);
    }

    #[test]
    fn zero_rates_never_test_positive() {
        let config = SyntheticChainConfig {
            num_supply_nodes: 2,
            num_test_nodes: 2,
            true_rates: Some(vec![0.0; 4]),
            ..Default::default()
        };
        let chain = generate_synthetic_chain(&config).unwrap();
        assert_eq!(chain.observations.y().sum(), 0);
    }

    #[test]
    fn wrong_true_rate_length_is_rejected() {
        let config = SyntheticChainConfig {
            true_rates: Some(vec![0.1; 2]),
            ..Default::default()
        };
        assert!(matches!(
            generate_synthetic_chain(&config),
            Err(FixtureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let config = SyntheticChainConfig {
            num_supply_nodes: 0,
            ..Default::default()
        };
        assert!(generate_synthetic_chain(&config).is_err());
    }
}
