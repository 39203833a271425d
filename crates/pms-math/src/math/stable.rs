//! Numerically stable primitives for logit-space Bayesian math.
//!
//! Latent contamination rates live in `[0, 1]` but are sampled and averaged
//! in logit space. These helpers keep the transforms finite at the edges.

/// Smallest probability handed to `logit`; inputs are clamped to
/// `[PROB_EPS, 1 - PROB_EPS]`.
pub const PROB_EPS: f64 = 1e-12;

/// Clamp a probability away from 0 and 1.
pub fn clamp_prob(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// log(p / (1 - p)).
///
/// Inputs are clamped with [`clamp_prob`], so `logit(0.0)` is a large
/// negative finite number rather than `-inf`.
pub fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    if p.is_nan() {
        return f64::NAN;
    }
    p.ln() - (-p).ln_1p()
}

/// Inverse logit (logistic sigmoid), stable for large |x|.
pub fn expit(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Binomial log-likelihood kernel `k ln p + (n - k) ln(1 - p)` without the
/// combinatorial constant.
///
/// Zero-count terms contribute nothing even when `p` sits on a boundary, so
/// `binomial_log_kernel(0, 0, 0.0) == 0.0`.
pub fn binomial_log_kernel(k: u64, n: u64, p: f64) -> f64 {
    if p.is_nan() || k > n {
        return f64::NAN;
    }
    let mut out = 0.0;
    if k > 0 {
        out += k as f64 * p.ln();
    }
    let misses = n - k;
    if misses > 0 {
        out += misses as f64 * (-p).ln_1p();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return false;
        }
        (a - b).abs() <= tol
    }

    #[test]
    fn logit_expit_known_values() {
        assert!(approx_eq(logit(0.5), 0.0, 1e-15));
        assert!(approx_eq(expit(0.0), 0.5, 1e-15));
        assert!(approx_eq(logit(0.1), (0.1f64 / 0.9).ln(), 1e-12));
    }

    #[test]
    fn logit_clamps_boundaries() {
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
        assert!(logit(0.0) < -20.0);
        assert!(logit(1.0) > 20.0);
    }

    #[test]
    fn expit_extremes_stay_in_unit_interval() {
        assert_eq!(expit(1000.0), 1.0);
        assert_eq!(expit(-1000.0), 0.0);
        assert!(expit(-30.0) > 0.0);
    }

    #[test]
    fn binomial_kernel_boundaries() {
        assert_eq!(binomial_log_kernel(0, 0, 0.0), 0.0);
        assert_eq!(binomial_log_kernel(0, 5, 0.0), 0.0);
        assert_eq!(binomial_log_kernel(5, 5, 1.0), 0.0);
        assert!(binomial_log_kernel(1, 5, 0.0).is_infinite());
        assert!(binomial_log_kernel(6, 5, 0.5).is_nan());
    }

    #[test]
    fn binomial_kernel_matches_definition() {
        let got = binomial_log_kernel(3, 10, 0.2);
        let expected = 3.0 * 0.2f64.ln() + 7.0 * 0.8f64.ln();
        assert!(approx_eq(got, expected, 1e-12));
    }
}
