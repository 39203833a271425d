//! Fuzz target for design discretization.
//!
//! Any design that passes validation must round to a plan that allocates
//! exactly the budget and leaves zero-weight cells empty.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ndarray::Array1;
use pms_config::Rounding;
use pms_core::design::{round_design, Design};

#[derive(Debug, Arbitrary)]
struct Input {
    raw: Vec<u16>,
    budget: u32,
    high: bool,
}

fuzz_target!(|input: Input| {
    let total: f64 = input.raw.iter().map(|v| f64::from(*v)).sum();
    if input.raw.is_empty() || input.raw.len() > 256 || total == 0.0 {
        return;
    }
    let weights: Vec<f64> = input.raw.iter().map(|v| f64::from(*v) / total).collect();
    let rounding = if input.high { Rounding::High } else { Rounding::Low };
    let budget = u64::from(input.budget);

    let design = Design::TestNodes(Array1::from(weights.clone()));
    let Ok(plan) = round_design(&design, budget, rounding) else {
        return;
    };
    assert_eq!(plan.total(), budget);
    for (w, count) in weights.iter().zip(plan.counts()) {
        if *w == 0.0 {
            assert_eq!(count, 0);
        }
    }
});
