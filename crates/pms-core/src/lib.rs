//! Bayesian utility of sampling designs for post-market surveillance of
//! supply chains.
//!
//! Given current test counts on (test node, supply node) traces and a
//! posterior over contamination rates, [`utility::estimate_design_utility`]
//! scores where the next batch of tests should go by the expected loss of
//! the resulting point estimate.

pub mod design;
pub mod estimate;
pub mod exit_codes;
pub mod fixtures;
pub mod inference;
pub mod logging;
pub mod loss;
pub mod model;
pub mod scenario;
pub mod simulate;
pub mod utility;

pub use design::{
    balance_design, materialize_plans, round_design, round_design_high, round_design_low, Design,
    DesignError, SamplingPlan,
};
pub use estimate::{point_estimate, EstimateError, EstimationRule};
pub use inference::{
    InferenceError, MetropolisSampler, PosteriorDraws, PosteriorRequest, PosteriorSampler,
};
pub use loss::{loss_from_spec, AsymmetricPms, Classification, LossFunction, SquaredError};
pub use model::{
    consolidated_rate, observed_positive_rate, AugmentedObservations, ModelError, Observations,
    PriorData, SupplyChainShape,
};
pub use simulate::{generate_observations, SimulationContext, SimulationError, SyntheticCounts};
pub use utility::{
    compare_designs, estimate_design_utility, marginal_utility_deltas, sweep_budgets, BudgetSweep,
    UtilityError, UtilityEstimate, UtilityOptions,
};
