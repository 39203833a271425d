//! Metropolis-within-Gibbs sampler for the two-stage contamination model.
//!
//! Each latent rate is updated in turn with a Gaussian random-walk proposal
//! in logit space:
//!
//! ```text
//! theta_k ~ Normal(mu, sigma^2)                       (independent prior)
//! Y[tn, sn] | theta ~ Binomial(N[tn, sn], p(tn, sn))
//! p = sens * c + (1 - spec) * (1 - c),   c = tn + (1 - tn) * sn
//! ```
//!
//! A supply-node update only touches its column of traces and a test-node
//! update only its row, so each proposal re-evaluates one slice of the
//! likelihood.

use std::time::Instant;

use ndarray::Array2;
use pms_config::{McmcSettings, PriorSettings};
use pms_math::{binomial_log_kernel, clamp_prob, expit};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::trace;

use super::{InferenceError, PosteriorDraws, PosteriorRequest, PosteriorSampler};
use crate::model::{consolidated_rate, observed_positive_rate, validate_accuracy};

/// Random-walk Metropolis-within-Gibbs engine.
#[derive(Debug, Clone)]
pub struct MetropolisSampler {
    mcmc: McmcSettings,
    prior: PriorSettings,
}

impl MetropolisSampler {
    pub fn new(mcmc: McmcSettings, prior: PriorSettings) -> Self {
        Self { mcmc, prior }
    }

    pub fn mcmc(&self) -> &McmcSettings {
        &self.mcmc
    }

    pub fn prior(&self) -> &PriorSettings {
        &self.prior
    }

    fn log_prior(&self, theta: f64) -> f64 {
        let d = theta - self.prior.mean;
        -0.5 * d * d / self.prior.variance
    }

    fn validate(&self, request: &PosteriorRequest<'_>) -> Result<(), InferenceError> {
        if request.n.dim() != request.y.dim() {
            return Err(InferenceError::InvalidRequest(format!(
                "N is {:?} but Y is {:?}",
                request.n.dim(),
                request.y.dim()
            )));
        }
        if request.n.iter().zip(request.y.iter()).any(|(n, y)| y > n) {
            return Err(InferenceError::InvalidRequest(
                "positives exceed tests".to_string(),
            ));
        }
        validate_accuracy("sens", request.sens)
            .and_then(|_| validate_accuracy("spec", request.spec))
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;
        if self.mcmc.num_post_samples == 0 || self.mcmc.thin == 0 {
            return Err(InferenceError::InvalidRequest(
                "num_post_samples and thin must be positive".to_string(),
            ));
        }
        if !(self.prior.variance > 0.0) || !(self.mcmc.step_size > 0.0) {
            return Err(InferenceError::InvalidRequest(
                "prior variance and step size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Chain state: logit-space rates plus cached per-trace log-likelihoods.
struct ChainState<'r, 'a> {
    request: &'r PosteriorRequest<'a>,
    num_supply: usize,
    theta: Vec<f64>,
    trace_ll: Array2<f64>,
}

impl<'r, 'a> ChainState<'r, 'a> {
    fn new(request: &'r PosteriorRequest<'a>, start: f64) -> Result<Self, InferenceError> {
        let (num_test, num_supply) = request.n.dim();
        let mut state = Self {
            request,
            num_supply,
            theta: vec![start; num_test + num_supply],
            trace_ll: Array2::zeros((num_test, num_supply)),
        };
        for tn in 0..num_test {
            for sn in 0..num_supply {
                let ll = state.trace_log_lik(tn, sn, state.theta[sn], state.theta[num_supply + tn]);
                if !ll.is_finite() {
                    return Err(InferenceError::Numerical(format!(
                        "initial log-likelihood at trace ({tn}, {sn}) is {ll}"
                    )));
                }
                state.trace_ll[[tn, sn]] = ll;
            }
        }
        Ok(state)
    }

    fn trace_log_lik(&self, tn: usize, sn: usize, sn_theta: f64, tn_theta: f64) -> f64 {
        let n = self.request.n[[tn, sn]];
        if n == 0 {
            return 0.0;
        }
        let c = consolidated_rate(expit(sn_theta), expit(tn_theta));
        let p = observed_positive_rate(c, self.request.sens, self.request.spec);
        binomial_log_kernel(self.request.y[[tn, sn]], n, p)
    }

    /// Log-likelihood of the traces touching rate `k` if it were `proposal`.
    fn slice_log_lik(&self, k: usize, proposal: f64) -> (Vec<f64>, f64) {
        let (num_test, num_supply) = self.trace_ll.dim();
        let terms: Vec<f64> = if k < self.num_supply {
            (0..num_test)
                .map(|tn| self.trace_log_lik(tn, k, proposal, self.theta[num_supply + tn]))
                .collect()
        } else {
            let tn = k - num_supply;
            (0..num_supply)
                .map(|sn| self.trace_log_lik(tn, sn, self.theta[sn], proposal))
                .collect()
        };
        let total = terms.iter().sum();
        (terms, total)
    }

    fn current_slice_total(&self, k: usize) -> f64 {
        if k < self.num_supply {
            self.trace_ll.column(k).sum()
        } else {
            self.trace_ll.row(k - self.num_supply).sum()
        }
    }

    fn accept(&mut self, k: usize, proposal: f64, terms: Vec<f64>) {
        self.theta[k] = proposal;
        if k < self.num_supply {
            for (tn, ll) in terms.into_iter().enumerate() {
                self.trace_ll[[tn, k]] = ll;
            }
        } else {
            let tn = k - self.num_supply;
            for (sn, ll) in terms.into_iter().enumerate() {
                self.trace_ll[[tn, sn]] = ll;
            }
        }
    }
}

impl PosteriorSampler for MetropolisSampler {
    fn name(&self) -> &str {
        "metropolis"
    }

    fn sample(&self, request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError> {
        self.validate(request)?;
        let started = Instant::now();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(request.seed);
        let step = Normal::new(0.0, self.mcmc.step_size)
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;

        let mut state = ChainState::new(request, self.prior.mean)?;
        let dims = state.theta.len();
        let keep = self.mcmc.num_post_samples;
        let sweeps = self.mcmc.burn_in + keep * self.mcmc.thin;
        let mut samples = Vec::with_capacity(keep * dims);
        let mut accepted = 0usize;
        let mut proposed = 0usize;

        for sweep in 0..sweeps {
            if request.deadline_passed() {
                return Err(InferenceError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            for k in 0..dims {
                let current = state.theta[k];
                let proposal = current + step.sample(&mut rng);
                let (terms, new_ll) = state.slice_log_lik(k, proposal);
                let log_ratio = new_ll - state.current_slice_total(k) + self.log_prior(proposal)
                    - self.log_prior(current);
                if log_ratio.is_nan() {
                    return Err(InferenceError::Numerical(format!(
                        "NaN acceptance ratio for rate {k} at sweep {sweep}"
                    )));
                }
                proposed += 1;
                let u: f64 = rng.random();
                if u.ln() < log_ratio {
                    state.accept(k, proposal, terms);
                    accepted += 1;
                }
            }
            if sweep >= self.mcmc.burn_in && (sweep - self.mcmc.burn_in + 1) % self.mcmc.thin == 0 {
                samples.extend(state.theta.iter().map(|t| clamp_prob(expit(*t))));
            }
        }

        let acceptance = accepted as f64 / proposed.max(1) as f64;
        trace!(
            engine = "metropolis",
            acceptance,
            sweeps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chain finished"
        );
        if acceptance < self.mcmc.min_acceptance {
            return Err(InferenceError::NonConvergence {
                acceptance,
                minimum: self.mcmc.min_acceptance,
            });
        }

        let draws = Array2::from_shape_vec((keep, dims), samples)
            .map_err(|e| InferenceError::Numerical(e.to_string()))?;
        PosteriorDraws::new(draws)
    }
}
