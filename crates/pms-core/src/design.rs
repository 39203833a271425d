//! Sampling designs and their discretization into integer test plans.
//!
//! A design is a probability distribution over where the next tests go,
//! either over test nodes (supply node drawn from `Q`) or directly over
//! traces. Discretization turns `design * n` into non-negative integer
//! counts that sum to exactly `n`.

use ndarray::{Array1, Array2};
use pms_config::Rounding;
use thiserror::Error;

use crate::model::SupplyChainShape;

/// Tolerance on `sum(design) == 1`.
pub const DESIGN_SUM_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DesignError {
    #[error("invalid design: {0}")]
    InvalidDesign(String),
    #[error("degenerate discretization: {0}")]
    DiscretizationDegenerate(String),
}

impl From<DesignError> for pms_common::Error {
    fn from(err: DesignError) -> Self {
        match err {
            DesignError::InvalidDesign(msg) => pms_common::Error::InvalidDesign(msg),
            DesignError::DiscretizationDegenerate(msg) => {
                pms_common::Error::DiscretizationDegenerate(msg)
            }
        }
    }
}

/// Where the next batch of tests should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Design {
    /// Distribution over test nodes; supply nodes follow the sourcing matrix.
    TestNodes(Array1<f64>),
    /// Distribution over `(test node, supply node)` traces.
    Traces(Array2<f64>),
}

impl Design {
    pub fn uniform_test_nodes(num_test_nodes: usize) -> Self {
        let w = 1.0 / num_test_nodes.max(1) as f64;
        Design::TestNodes(Array1::from_elem(num_test_nodes, w))
    }

    pub fn uniform_traces(shape: SupplyChainShape) -> Self {
        let w = 1.0 / shape.num_traces().max(1) as f64;
        Design::Traces(Array2::from_elem(shape.dim(), w))
    }

    /// All mass on one trace.
    pub fn single_trace(shape: SupplyChainShape, tn: usize, sn: usize) -> Result<Self, DesignError> {
        if tn >= shape.num_test_nodes || sn >= shape.num_supply_nodes {
            return Err(DesignError::InvalidDesign(format!(
                "trace ({tn}, {sn}) outside chain {:?}",
                shape.dim()
            )));
        }
        let mut d = Array2::zeros(shape.dim());
        d[[tn, sn]] = 1.0;
        Ok(Design::Traces(d))
    }

    /// All mass on one test node.
    pub fn single_test_node(num_test_nodes: usize, tn: usize) -> Result<Self, DesignError> {
        if tn >= num_test_nodes {
            return Err(DesignError::InvalidDesign(format!(
                "test node {tn} outside 0..{num_test_nodes}"
            )));
        }
        let mut d = Array1::zeros(num_test_nodes);
        d[tn] = 1.0;
        Ok(Design::TestNodes(d))
    }

    /// Trace-level design that evens out per-trace totals; see [`balance_design`].
    pub fn balanced(n: &Array2<u64>, ntilde: u64) -> Result<Self, DesignError> {
        balance_design(n, ntilde).map(Design::Traces)
    }

    pub fn is_test_node_level(&self) -> bool {
        matches!(self, Design::TestNodes(_))
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            Design::TestNodes(d) => d.len(),
            Design::Traces(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weights in row-major order.
    pub fn weights(&self) -> Vec<f64> {
        match self {
            Design::TestNodes(d) => d.iter().copied().collect(),
            Design::Traces(d) => d.iter().copied().collect(),
        }
    }

    /// Check shape against the chain, non-negativity and unit sum.
    pub fn validate(&self, shape: SupplyChainShape) -> Result<(), DesignError> {
        match self {
            Design::TestNodes(d) if d.len() != shape.num_test_nodes => {
                return Err(DesignError::InvalidDesign(format!(
                    "test-node design has {} entries, chain has {} test nodes",
                    d.len(),
                    shape.num_test_nodes
                )));
            }
            Design::Traces(d) if d.dim() != shape.dim() => {
                return Err(DesignError::InvalidDesign(format!(
                    "trace design is {:?}, chain is {:?}",
                    d.dim(),
                    shape.dim()
                )));
            }
            _ => {}
        }
        validate_weights(&self.weights())
    }
}

fn validate_weights(weights: &[f64]) -> Result<(), DesignError> {
    if weights.is_empty() {
        return Err(DesignError::InvalidDesign("design is empty".to_string()));
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(DesignError::InvalidDesign(format!(
            "design entry {bad} is negative or non-finite"
        )));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > DESIGN_SUM_TOL {
        return Err(DesignError::InvalidDesign(format!(
            "design sums to {sum:.6}, expected 1"
        )));
    }
    Ok(())
}

/// Integer test allocation with the same shape as its design.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingPlan {
    TestNodes(Array1<u64>),
    Traces(Array2<u64>),
}

impl SamplingPlan {
    pub fn total(&self) -> u64 {
        match self {
            SamplingPlan::TestNodes(p) => p.sum(),
            SamplingPlan::Traces(p) => p.sum(),
        }
    }

    pub fn counts(&self) -> Vec<u64> {
        match self {
            SamplingPlan::TestNodes(p) => p.iter().copied().collect(),
            SamplingPlan::Traces(p) => p.iter().copied().collect(),
        }
    }

    /// Nested rows for JSON output; a test-node plan is a single column.
    pub fn to_rows(&self) -> Vec<Vec<u64>> {
        match self {
            SamplingPlan::TestNodes(p) => p.iter().map(|v| vec![*v]).collect(),
            SamplingPlan::Traces(p) => p.rows().into_iter().map(|r| r.to_vec()).collect(),
        }
    }
}

/// Largest budget whose every count is exactly representable as `f64`.
pub const MAX_EXACT_BUDGET: u64 = 1 << 53;

/// Discretize `design * n` under the given rounding policy.
///
/// Budgets above [`MAX_EXACT_BUDGET`] are rejected as
/// [`DesignError::InvalidDesign`].
pub fn round_design(design: &Design, n: u64, rounding: Rounding) -> Result<SamplingPlan, DesignError> {
    if n > MAX_EXACT_BUDGET {
        return Err(DesignError::InvalidDesign(format!(
            "budget {n} exceeds {MAX_EXACT_BUDGET}, the largest exactly representable test count"
        )));
    }
    let weights = design.weights();
    validate_weights(&weights)?;
    let counts = round_weights(&weights, n, rounding);
    Ok(match design {
        Design::TestNodes(_) => SamplingPlan::TestNodes(Array1::from(counts)),
        Design::Traces(d) => {
            let plan = Array2::from_shape_vec(d.dim(), counts)
                .map_err(|e| DesignError::InvalidDesign(e.to_string()))?;
            SamplingPlan::Traces(plan)
        }
    })
}

/// Rounding that trims the largest allocations and tops up the smallest.
pub fn round_design_low(design: &Design, n: u64) -> Result<SamplingPlan, DesignError> {
    round_design(design, n, Rounding::Low)
}

/// Rounding that trims the smallest allocations and tops up the largest.
pub fn round_design_high(design: &Design, n: u64) -> Result<SamplingPlan, DesignError> {
    round_design(design, n, Rounding::High)
}

/// Core rounding on flat weights.
///
/// Each cell starts at `round(n * w)` (half away from zero). The sum is
/// then corrected one unit at a time: excess units come off cells with a
/// positive count, missing units go to cells with positive weight. `Low`
/// takes from the most allocated and gives to the least allocated; `High`
/// does the reverse. Ties go to the lowest flat index.
fn round_weights(weights: &[f64], n: u64, rounding: Rounding) -> Vec<u64> {
    let nf = n as f64;
    let mut counts: Vec<u64> = weights.iter().map(|w| (nf * w).round() as u64).collect();
    let mut total: u64 = counts.iter().sum();

    while total > n {
        let candidates = (0..counts.len()).filter(|&i| counts[i] > 0);
        let pick = match rounding {
            Rounding::Low => pick_extreme(candidates, &counts, true),
            Rounding::High => pick_extreme(candidates, &counts, false),
        };
        match pick {
            Some(i) => {
                counts[i] -= 1;
                total -= 1;
            }
            None => break,
        }
    }

    while total < n {
        let candidates = (0..counts.len()).filter(|&i| weights[i] > 0.0);
        let pick = match rounding {
            Rounding::Low => pick_extreme(candidates, &counts, false),
            Rounding::High => pick_extreme(candidates, &counts, true),
        };
        match pick {
            Some(i) => {
                counts[i] += 1;
                total += 1;
            }
            None => break,
        }
    }

    counts
}

/// Index of the largest (or smallest) count among candidates, lowest index on ties.
fn pick_extreme(candidates: impl Iterator<Item = usize>, counts: &[u64], largest: bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in candidates {
        best = match best {
            None => Some(i),
            Some(b) if largest && counts[i] > counts[b] => Some(i),
            Some(b) if !largest && counts[i] < counts[b] => Some(i),
            keep => keep,
        };
    }
    best
}

/// Trace-level design that allocates `ntilde` new tests to bring every
/// trace toward the common target `(sum(N) + ntilde) / num_traces`.
///
/// Cells already at or above target get zero weight. Fails with
/// [`DesignError::DiscretizationDegenerate`] when no cell is below target.
pub fn balance_design(n: &Array2<u64>, ntilde: u64) -> Result<Array2<f64>, DesignError> {
    if n.is_empty() {
        return Err(DesignError::InvalidDesign(
            "cannot balance an empty chain".to_string(),
        ));
    }
    let cells = n.len() as f64;
    let target = (n.sum() as f64 + ntilde as f64) / cells;
    let raw = n.mapv(|v| (target - v as f64).max(0.0));
    let mass = raw.sum();
    if mass <= 0.0 {
        return Err(DesignError::DiscretizationDegenerate(format!(
            "no trace is below the balancing target {target:.3}"
        )));
    }
    Ok(raw / mass)
}

/// Discretize one design at several budgets.
///
/// Returns a `cells x budgets` matrix; column `k` is the flattened plan for
/// `budgets[k]`.
pub fn materialize_plans(
    design: &Design,
    budgets: &[u64],
    rounding: Rounding,
) -> Result<Array2<u64>, DesignError> {
    let mut out = Array2::zeros((design.len(), budgets.len()));
    for (k, &budget) in budgets.iter().enumerate() {
        let plan = round_design(design, budget, rounding)?;
        for (cell, count) in plan.counts().into_iter().enumerate() {
            out[[cell, k]] = count;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn traces(rows: &[[f64; 2]]) -> Design {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Design::Traces(Array2::from_shape_vec((rows.len(), 2), flat).unwrap())
    }

    #[test]
    fn rounding_hits_budget_exactly() {
        let d = Design::TestNodes(arr1(&[0.25, 0.25, 0.25, 0.25]));
        for n in 0..20 {
            assert_eq!(round_design_low(&d, n).unwrap().total(), n);
            assert_eq!(round_design_high(&d, n).unwrap().total(), n);
        }
    }

    #[test]
    fn oversized_budget_is_rejected() {
        let d = Design::TestNodes(arr1(&[0.5, 0.5]));
        assert!(matches!(round_design_low(&d, u64::MAX), Err(DesignError::InvalidDesign(_))));
        assert!(matches!(
            round_design_high(&d, MAX_EXACT_BUDGET + 1),
            Err(DesignError::InvalidDesign(_))
        ));
    }

    #[test]
    fn largest_exact_budget_rounds_exactly() {
        let d = Design::TestNodes(arr1(&[0.5, 0.5]));
        let plan = round_design_low(&d, 1 << 53).unwrap();
        assert_eq!(plan.counts(), vec![1 << 52, 1 << 52]);
        assert_eq!(plan.total(), 1 << 53);
    }

    #[test]
    fn low_trims_largest_first() {
        // 2 * 0.25 = 0.5 rounds to 1 everywhere; two units must come off.
        let d = Design::TestNodes(arr1(&[0.25, 0.25, 0.25, 0.25]));
        let plan = round_design_low(&d, 2).unwrap();
        assert_eq!(plan.counts(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn high_tops_up_largest_first() {
        // 10 * [0.44, 0.44, 0.12] rounds to [4, 4, 1]; one unit is missing.
        let d = Design::TestNodes(arr1(&[0.44, 0.44, 0.12]));
        assert_eq!(round_design_high(&d, 10).unwrap().counts(), vec![5, 4, 1]);
        assert_eq!(round_design_low(&d, 10).unwrap().counts(), vec![4, 4, 2]);
    }

    #[test]
    fn zero_weight_cells_never_receive_tests() {
        let d = Design::TestNodes(arr1(&[0.44, 0.44, 0.12, 0.0]));
        for n in 0..30 {
            let plan = round_design_low(&d, n).unwrap();
            assert_eq!(plan.counts()[3], 0);
        }
    }

    #[test]
    fn zero_budget_gives_zero_plan() {
        let d = traces(&[[0.5, 0.5], [0.0, 0.0]]);
        let plan = round_design_low(&d, 0).unwrap();
        assert_eq!(plan, SamplingPlan::Traces(Array2::zeros((2, 2))));
    }

    #[test]
    fn one_hot_design_puts_everything_on_one_trace() {
        let shape = SupplyChainShape::new(3, 2);
        let d = Design::single_trace(shape, 2, 0).unwrap();
        let plan = round_design_low(&d, 30).unwrap();
        assert_eq!(
            plan,
            SamplingPlan::Traces(arr2(&[[0, 0], [0, 0], [30, 0]]))
        );
    }

    #[test]
    fn validation_rejects_bad_designs() {
        let shape = SupplyChainShape::new(2, 2);
        assert!(traces(&[[0.5, 0.6], [0.0, 0.0]]).validate(shape).is_err());
        assert!(traces(&[[1.5, -0.5], [0.0, 0.0]]).validate(shape).is_err());
        assert!(Design::uniform_test_nodes(3).validate(shape).is_err());
        assert!(Design::uniform_traces(shape).validate(shape).is_ok());
        assert!(round_design_low(&Design::TestNodes(arr1(&[0.3, 0.3])), 5).is_err());
    }

    #[test]
    fn balance_targets_under_tested_traces() {
        let n = arr2(&[[0u64, 10], [10, 10]]);
        let d = balance_design(&n, 10).unwrap();
        assert!((d[[0, 0]] - 1.0).abs() < 1e-12);
        assert_eq!(d[[0, 1]], 0.0);
    }

    #[test]
    fn balance_spreads_over_several_gaps() {
        let n = arr2(&[[0u64, 2], [4, 6]]);
        // target = (12 + 4) / 4 = 4 -> raw [4, 2, 0, 0]
        let d = balance_design(&n, 4).unwrap();
        assert!((d[[0, 0]] - 4.0 / 6.0).abs() < 1e-12);
        assert!((d[[0, 1]] - 2.0 / 6.0).abs() < 1e-12);
        assert!((d.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn balance_fails_when_already_level_with_no_budget() {
        let n = arr2(&[[5u64, 5], [5, 5]]);
        assert!(matches!(
            balance_design(&n, 0),
            Err(DesignError::DiscretizationDegenerate(_))
        ));
    }

    #[test]
    fn materialized_plans_have_one_column_per_budget() {
        let d = Design::TestNodes(arr1(&[0.5, 0.5]));
        let plans = materialize_plans(&d, &[0, 4, 7], Rounding::Low).unwrap();
        assert_eq!(plans.dim(), (2, 3));
        assert_eq!(plans.column(1).to_vec(), vec![2, 2]);
        assert_eq!(plans.column(2).sum(), 7);
    }
}
