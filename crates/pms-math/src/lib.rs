//! PMS design math utilities.

pub mod math;

pub use math::stable::*;
pub use math::summary::{mean, population_std, OnlineStats, SummaryStats};
