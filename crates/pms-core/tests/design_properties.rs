//! Property-based tests for design discretization.

use ndarray::{Array1, Array2};
use pms_config::Rounding;
use pms_core::design::{balance_design, materialize_plans, round_design, Design, SamplingPlan};
use proptest::prelude::*;

/// Normalized non-negative weights with at least one positive entry and a
/// good share of exact zeros.
fn weights(len: impl Into<prop::collection::SizeRange>) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(prop_oneof![Just(0.0), 0.01..10.0f64], len)
        .prop_filter("needs positive mass", |w| w.iter().any(|v| *v > 0.0))
        .prop_map(|w| {
            let total: f64 = w.iter().sum();
            w.into_iter().map(|v| v / total).collect()
        })
}

fn rounding() -> impl Strategy<Value = Rounding> {
    prop_oneof![Just(Rounding::Low), Just(Rounding::High)]
}

// ============================================================================
// round_design
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every budget is allocated exactly.
    #[test]
    fn plan_total_equals_budget(w in weights(1..12), n in 0u64..5000, policy in rounding()) {
        let plan = round_design(&Design::TestNodes(Array1::from(w)), n, policy).unwrap();
        prop_assert_eq!(plan.total(), n);
    }

    /// Cells with zero weight never receive tests.
    #[test]
    fn zero_weight_cells_stay_empty(w in weights(1..12), n in 0u64..5000, policy in rounding()) {
        let plan = round_design(&Design::TestNodes(Array1::from(w.clone())), n, policy).unwrap();
        for (weight, count) in w.iter().zip(plan.counts()) {
            if *weight == 0.0 {
                prop_assert_eq!(count, 0);
            }
        }
    }

    /// Trace designs keep their matrix shape.
    #[test]
    fn trace_plan_keeps_shape(
        (rows, cols, w) in (1usize..5, 1usize..5).prop_flat_map(|(r, c)| {
            (Just(r), Just(c), weights(r * c))
        }),
        n in 0u64..1000,
        policy in rounding(),
    ) {
        let design = Design::Traces(Array2::from_shape_vec((rows, cols), w).unwrap());
        match round_design(&design, n, policy).unwrap() {
            SamplingPlan::Traces(plan) => {
                prop_assert_eq!(plan.dim(), (rows, cols));
                prop_assert_eq!(plan.sum(), n);
            }
            other => prop_assert!(false, "unexpected plan {:?}", other),
        }
    }

    /// Rounding is a pure function of its inputs.
    #[test]
    fn rounding_is_deterministic(w in weights(1..10), n in 0u64..500, policy in rounding()) {
        let design = Design::TestNodes(Array1::from(w));
        let a = round_design(&design, n, policy).unwrap();
        let b = round_design(&design, n, policy).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Every column of a materialized plan matrix sums to its budget.
    #[test]
    fn materialized_columns_match_budgets(
        w in weights(1..8),
        budgets in prop::collection::vec(0u64..300, 1..6),
        policy in rounding(),
    ) {
        let design = Design::TestNodes(Array1::from(w));
        let plans = materialize_plans(&design, &budgets, policy).unwrap();
        for (k, budget) in budgets.iter().enumerate() {
            prop_assert_eq!(plans.column(k).sum(), *budget);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A one-hot design puts the whole budget on its single cell.
    #[test]
    fn one_hot_design_is_concentrated(len in 1usize..10, hot in 0usize..10, n in 0u64..2000) {
        let hot = hot % len;
        let mut w = vec![0.0; len];
        w[hot] = 1.0;
        let plan = round_design(&Design::TestNodes(Array1::from(w)), n, Rounding::Low).unwrap();
        let counts = plan.counts();
        prop_assert_eq!(counts[hot], n);
        prop_assert_eq!(counts.iter().sum::<u64>(), n);
    }

    /// Zero budget yields an all-zero plan under either policy.
    #[test]
    fn zero_budget_is_all_zero(w in weights(1..12), policy in rounding()) {
        let plan = round_design(&Design::TestNodes(Array1::from(w)), 0, policy).unwrap();
        prop_assert!(plan.counts().iter().all(|c| *c == 0));
    }
}

// ============================================================================
// balance_design
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// A balancing design is a proper distribution over traces.
    #[test]
    fn balance_is_a_distribution(
        counts in prop::collection::vec(0u64..40, 6),
        ntilde in 1u64..200,
    ) {
        let n = Array2::from_shape_vec((3, 2), counts).unwrap();
        let d = balance_design(&n, ntilde).unwrap();
        prop_assert!((d.sum() - 1.0).abs() < 1e-9);
        prop_assert!(d.iter().all(|v| *v >= 0.0));
    }

    /// The least tested trace always gets the most weight.
    #[test]
    fn balance_favours_least_tested(
        counts in prop::collection::vec(0u64..40, 6),
        ntilde in 1u64..200,
    ) {
        let n = Array2::from_shape_vec((3, 2), counts).unwrap();
        let d = balance_design(&n, ntilde).unwrap();
        let min_idx = n.iter().enumerate().min_by_key(|(_, v)| **v).map(|(i, _)| i).unwrap();
        let max_w = d.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let favoured = d.iter().copied().nth(min_idx).unwrap();
        prop_assert!((favoured - max_w).abs() < 1e-12);
    }
}
