//! Design utility orchestrator.
//!
//! Estimates the expected posterior loss of testing according to a design:
//!
//! ```text
//! for each simulated future i in 0..omega:
//!     theta*   = prior draw order[i % num_draws]
//!     N~, Y~   = simulate(plan, theta*)
//!     draws_i  = refresh(N + N~, Y + Y~)
//!     est_i    = point_estimate(draws_i)
//!     loss_i   = mean over d in draws_i of loss(est_i, d)
//! report mean, std and mean +/- 2 std over the successful loss_i
//! ```
//!
//! The band is a spread of per-future expected losses, not a credible
//! interval on the loss itself; `standard_error` is the Monte Carlo
//! precision of the mean.
//!
//! Futures are independent given the shared plan and prior draws and run as
//! a rayon parallel map. Future `i` is seeded with `base_seed + i`, so the
//! result does not depend on scheduling.

use std::time::{Duration, Instant};

use pms_config::{Rounding, UtilitySettings};
use pms_math::{mean, SummaryStats};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, debug_span, info, info_span, trace, warn};

use crate::design::{round_design, Design, DesignError, SamplingPlan};
use crate::estimate::{point_estimate, EstimateError, EstimationRule};
use crate::inference::{check_draws, InferenceError, PosteriorRequest, PosteriorSampler};
use crate::logging::{event_names, Stage};
use crate::loss::LossFunction;
use crate::model::{ModelError, PriorData};
use crate::simulate::{generate_observations, SimulationContext, SimulationError};

#[derive(Debug, Error)]
pub enum UtilityError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error("invalid utility options: {0}")]
    InvalidOptions(String),
    #[error("utility estimate unreliable: {failures} of {total} futures failed")]
    Unreliable {
        failures: usize,
        total: usize,
        last_error: Option<String>,
    },
}

impl From<UtilityError> for pms_common::Error {
    fn from(err: UtilityError) -> Self {
        match err {
            UtilityError::Design(e) => e.into(),
            UtilityError::Simulation(e) => e.into(),
            UtilityError::Model(e) => e.into(),
            UtilityError::Estimate(e) => e.into(),
            UtilityError::InvalidOptions(msg) => pms_common::Error::InvalidSettings(msg),
            UtilityError::Unreliable {
                failures, total, ..
            } => pms_common::Error::UnreliableEstimate { failures, total },
        }
    }
}

/// Knobs for the Monte Carlo loop.
#[derive(Debug, Clone)]
pub struct UtilityOptions {
    pub omega_count: usize,
    pub base_seed: u64,
    pub parallel: bool,
    pub max_failure_fraction: f64,
    /// Per-future wall-clock budget.
    ///
    /// The deadline is cooperative. It is handed to the sampler through
    /// [`PosteriorRequest::deadline`] and checked again once `sample`
    /// returns, so an overrun future is counted as a timeout failure. A
    /// sampler that never looks at the deadline is not preempted: it keeps
    /// its rayon worker (or the calling thread) busy until it returns.
    pub future_timeout: Option<Duration>,
    pub rounding: Rounding,
}

impl Default for UtilityOptions {
    fn default() -> Self {
        Self::from_settings(&UtilitySettings::default())
    }
}

impl UtilityOptions {
    pub fn from_settings(settings: &UtilitySettings) -> Self {
        Self {
            omega_count: settings.omega_count,
            base_seed: settings.base_seed,
            parallel: settings.parallel,
            max_failure_fraction: settings.max_failure_fraction,
            future_timeout: settings.future_timeout_ms.map(Duration::from_millis),
            rounding: settings.rounding,
        }
    }

    fn validate(&self) -> Result<(), UtilityError> {
        if self.omega_count == 0 {
            return Err(UtilityError::InvalidOptions(
                "omega_count must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failure_fraction) {
            return Err(UtilityError::InvalidOptions(format!(
                "max_failure_fraction {} must lie in [0, 1]",
                self.max_failure_fraction
            )));
        }
        Ok(())
    }
}

/// A future excluded from aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct FutureFailure {
    pub future: usize,
    pub reason: String,
}

/// Aggregated expected loss for one design at one budget.
#[derive(Debug, Clone)]
pub struct UtilityEstimate {
    pub num_tests: u64,
    pub plan: SamplingPlan,
    pub mean: f64,
    /// Population standard deviation of per-future losses.
    pub std: f64,
    pub standard_error: f64,
    pub interval: (f64, f64),
    pub omega_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Per-future losses in future order, failures omitted.
    pub losses: Vec<f64>,
    pub failures: Vec<FutureFailure>,
}

/// JSON view of a [`UtilityEstimate`].
#[derive(Debug, Clone, Serialize)]
pub struct UtilityReport {
    pub num_tests: u64,
    pub plan: Vec<Vec<u64>>,
    pub mean: f64,
    pub std: f64,
    pub standard_error: f64,
    pub interval: [f64; 2],
    pub omega_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<FutureFailure>,
}

impl UtilityEstimate {
    pub fn report(&self) -> UtilityReport {
        UtilityReport {
            num_tests: self.num_tests,
            plan: self.plan.to_rows(),
            mean: self.mean,
            std: self.std,
            standard_error: self.standard_error,
            interval: [self.interval.0, self.interval.1],
            omega_count: self.omega_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            failures: self.failures.clone(),
        }
    }
}

/// Read-only inputs shared by every future.
struct FutureInputs<'a> {
    prior: &'a PriorData,
    plan: &'a SamplingPlan,
    loss: &'a dyn LossFunction,
    rule: &'a EstimationRule,
    sampler: &'a dyn PosteriorSampler,
    draw_order: &'a [usize],
    ctx: SimulationContext<'a>,
    base_seed: u64,
    timeout: Option<Duration>,
}

impl FutureInputs<'_> {
    /// Run future `index`. The outer error aborts the whole estimate; the
    /// inner one marks only this future as failed.
    fn run(&self, index: usize) -> Result<Result<f64, InferenceError>, UtilityError> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.base_seed.wrapping_add(index as u64));
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);

        let augmented = {
            let _stage = debug_span!("future", future = index, stage = %Stage::Simulate).entered();
            let truth = self
                .prior
                .draws()
                .draw(self.draw_order[index % self.draw_order.len()]);
            let synthetic = generate_observations(self.plan, truth, &self.ctx, &mut rng)?;
            let augmented = self
                .prior
                .observations()
                .augment(&synthetic.n_tilde, &synthetic.y_tilde)?;
            trace!(
                target: event_names::UTILITY_FUTURE_SIMULATED,
                future = index,
                new_tests = synthetic.n_tilde.sum(),
                "future simulated"
            );
            augmented
        };

        let request = PosteriorRequest {
            n: &augmented.n_omega,
            y: &augmented.y_omega,
            sens: self.prior.sens(),
            spec: self.prior.spec(),
            seed: rng.random(),
            deadline,
        };
        let draws = {
            let _stage = debug_span!("future", future = index, stage = %Stage::Refit).entered();
            let draws = match self
                .sampler
                .sample(&request)
                .and_then(|d| check_draws(&request, &d).map(|_| d))
            {
                Ok(draws) => draws,
                Err(err) => return Ok(Err(err)),
            };
            if request.deadline_passed() {
                // Engines that ignore the deadline are still held to it.
                return Ok(Err(InferenceError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }));
            }
            trace!(
                target: event_names::UTILITY_FUTURE_REFIT,
                future = index,
                draws = draws.num_draws(),
                "future refit"
            );
            draws
        };

        let _stage = debug_span!("future", future = index, stage = %Stage::Score).entered();
        let estimate = point_estimate(&draws, self.rule)?;
        let losses: Vec<f64> = (0..draws.num_draws())
            .map(|d| self.loss.loss(estimate.view(), draws.draw(d)))
            .collect();
        let expected = mean(&losses);
        if !expected.is_finite() {
            return Ok(Err(InferenceError::Numerical(format!(
                "{} loss is {expected}",
                self.loss.name()
            ))));
        }
        trace!(
            target: event_names::UTILITY_FUTURE_SCORED,
            future = index,
            loss = expected,
            "future scored"
        );
        Ok(Ok(expected))
    }
}

/// Order in which prior draws serve as truth, cycled across futures.
fn draw_order(num_draws: usize, base_seed: u64) -> Vec<usize> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(base_seed);
    // Separate the shuffle stream from future 0, which shares the seed.
    rng.long_jump();
    let mut order: Vec<usize> = (0..num_draws).collect();
    order.shuffle(&mut rng);
    order
}

/// Estimate the expected loss of running `num_tests` more tests by `design`.
///
/// Returns [`UtilityError::Unreliable`] when no future succeeds or the share
/// of failed futures exceeds `options.max_failure_fraction`.
pub fn estimate_design_utility(
    prior: &PriorData,
    design: &Design,
    num_tests: u64,
    loss: &dyn LossFunction,
    rule: &EstimationRule,
    sampler: &dyn PosteriorSampler,
    options: &UtilityOptions,
) -> Result<UtilityEstimate, UtilityError> {
    options.validate()?;
    rule.ensure_supported()?;
    design.validate(prior.shape())?;
    if design.is_test_node_level() && prior.sourcing().is_none() {
        return Err(SimulationError::MissingSourcing.into());
    }

    let span = info_span!("utility", stage = %Stage::Plan);
    let _guard = span.enter();

    let plan = round_design(design, num_tests, options.rounding)?;
    let order = draw_order(prior.draws().num_draws(), options.base_seed);
    let inputs = FutureInputs {
        prior,
        plan: &plan,
        loss,
        rule,
        sampler,
        draw_order: &order,
        ctx: SimulationContext::from_prior(prior),
        base_seed: options.base_seed,
        timeout: options.future_timeout,
    };

    info!(
        target: event_names::UTILITY_STARTED,
        num_tests,
        omega = options.omega_count,
        loss = loss.name(),
        rule = %rule,
        sampler = sampler.name(),
        parallel = options.parallel,
        "estimating design utility"
    );
    let started = Instant::now();

    let outcomes: Vec<Result<f64, InferenceError>> = if options.parallel {
        (0..options.omega_count)
            .into_par_iter()
            .map(|i| inputs.run(i))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        (0..options.omega_count)
            .map(|i| inputs.run(i))
            .collect::<Result<Vec<_>, _>>()?
    };

    aggregate(outcomes, plan, num_tests, options, started)
}

fn aggregate(
    outcomes: Vec<Result<f64, InferenceError>>,
    plan: SamplingPlan,
    num_tests: u64,
    options: &UtilityOptions,
    started: Instant,
) -> Result<UtilityEstimate, UtilityError> {
    let total = outcomes.len();
    let mut losses = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (future, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(loss) => losses.push(loss),
            Err(err) => {
                debug!(
                    target: event_names::UTILITY_FUTURE_FAILED,
                    future,
                    error = %err,
                    "future excluded from aggregation"
                );
                failures.push(FutureFailure {
                    future,
                    reason: err.to_string(),
                });
            }
        }
    }

    let failure_count = failures.len();
    if losses.is_empty() || failure_count as f64 / total as f64 > options.max_failure_fraction {
        warn!(
            target: event_names::UTILITY_UNRELIABLE,
            failures = failure_count,
            total,
            "too many futures failed"
        );
        return Err(UtilityError::Unreliable {
            failures: failure_count,
            total,
            last_error: failures.last().map(|f| f.reason.clone()),
        });
    }

    let stats = SummaryStats::from_samples(&losses);
    info!(
        target: event_names::UTILITY_FINISHED,
        stage = %Stage::Aggregate,
        mean = stats.mean,
        std = stats.std,
        failures = failure_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "design utility estimated"
    );

    Ok(UtilityEstimate {
        num_tests,
        plan,
        mean: stats.mean,
        std: stats.std,
        standard_error: stats.standard_error,
        interval: (stats.interval_low, stats.interval_high),
        omega_count: total,
        success_count: losses.len(),
        failure_count,
        losses,
        failures,
    })
}

/// Utility of one design across increasing budgets.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSweep {
    pub budgets: Vec<u64>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub failure_counts: Vec<usize>,
    /// `means[k + 1] - means[k]`.
    pub marginal: Vec<f64>,
}

/// Run the orchestrator once per budget.
pub fn sweep_budgets(
    prior: &PriorData,
    design: &Design,
    budgets: &[u64],
    loss: &dyn LossFunction,
    rule: &EstimationRule,
    sampler: &dyn PosteriorSampler,
    options: &UtilityOptions,
) -> Result<BudgetSweep, UtilityError> {
    let mut means = Vec::with_capacity(budgets.len());
    let mut stds = Vec::with_capacity(budgets.len());
    let mut failure_counts = Vec::with_capacity(budgets.len());
    for &budget in budgets {
        let estimate = estimate_design_utility(prior, design, budget, loss, rule, sampler, options)?;
        info!(
            target: event_names::SWEEP_STEP,
            budget,
            mean = estimate.mean,
            "budget evaluated"
        );
        means.push(estimate.mean);
        stds.push(estimate.std);
        failure_counts.push(estimate.failure_count);
    }
    let marginal = marginal_utility_deltas(&means);
    Ok(BudgetSweep {
        budgets: budgets.to_vec(),
        means,
        stds,
        failure_counts,
        marginal,
    })
}

/// Finite differences between consecutive budget steps.
pub fn marginal_utility_deltas(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// One named design's estimate in a comparison.
#[derive(Debug, Clone)]
pub struct DesignComparison {
    pub name: String,
    pub estimate: UtilityEstimate,
}

/// Evaluate several designs at one budget, best (lowest loss) first.
pub fn compare_designs(
    prior: &PriorData,
    designs: &[(String, Design)],
    num_tests: u64,
    loss: &dyn LossFunction,
    rule: &EstimationRule,
    sampler: &dyn PosteriorSampler,
    options: &UtilityOptions,
) -> Result<Vec<DesignComparison>, UtilityError> {
    let mut out = designs
        .iter()
        .map(|(name, design)| {
            estimate_design_utility(prior, design, num_tests, loss, rule, sampler, options).map(
                |estimate| DesignComparison {
                    name: name.clone(),
                    estimate,
                },
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    out.sort_by(|a, b| a.estimate.mean.total_cmp(&b.estimate.mean));
    Ok(out)
}
