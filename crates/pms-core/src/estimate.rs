//! Point-estimate former: collapse a posterior draw set to one rate vector.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Axis};
use pms_config::EstimateSpec;
use pms_math::{expit, logit};
use thiserror::Error;

use crate::inference::PosteriorDraws;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EstimateError {
    #[error("estimation rule '{0}' is not supported")]
    Unsupported(String),
    #[error("invalid estimation rule parameter: {0}")]
    InvalidParameter(String),
}

impl From<EstimateError> for pms_common::Error {
    fn from(err: EstimateError) -> Self {
        match err {
            EstimateError::Unsupported(rule) => pms_common::Error::EstimationRuleUnsupported(rule),
            EstimateError::InvalidParameter(msg) => pms_common::Error::InvalidSettings(msg),
        }
    }
}

/// How a draw set becomes a point estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimationRule {
    /// Average in logit space, then map back through the sigmoid.
    Mean,
    /// Per dimension, 1 when more than half the draws exceed `threshold`, else 0.
    Majority { threshold: f64 },
    /// Recognised by name only; every evaluation fails.
    Median,
}

impl EstimationRule {
    /// Fail early on rules that cannot be evaluated.
    pub fn ensure_supported(&self) -> Result<(), EstimateError> {
        match self {
            EstimationRule::Mean => Ok(()),
            EstimationRule::Majority { threshold } => {
                if *threshold > 0.0 && *threshold < 1.0 {
                    Ok(())
                } else {
                    Err(EstimateError::InvalidParameter(format!(
                        "majority threshold {threshold} must lie in (0, 1)"
                    )))
                }
            }
            EstimationRule::Median => Err(EstimateError::Unsupported("median".to_string())),
        }
    }
}

impl From<&EstimateSpec> for EstimationRule {
    fn from(spec: &EstimateSpec) -> Self {
        match spec {
            EstimateSpec::Mean => EstimationRule::Mean,
            EstimateSpec::Majority { threshold } => EstimationRule::Majority {
                threshold: *threshold,
            },
            EstimateSpec::Median => EstimationRule::Median,
        }
    }
}

impl FromStr for EstimationRule {
    type Err = EstimateError;

    /// Accepts `mean`, `median`, `mode`/`majority` (threshold 0.5) and
    /// `majority:<t>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (name, param) = match lower.split_once(':') {
            Some((name, param)) => (name, Some(param)),
            None => (lower.as_str(), None),
        };
        match (name, param) {
            ("mean", None) => Ok(EstimationRule::Mean),
            ("median", None) => Ok(EstimationRule::Median),
            ("mode" | "majority", None) => Ok(EstimationRule::Majority { threshold: 0.5 }),
            ("mode" | "majority", Some(t)) => {
                let threshold = t.parse::<f64>().map_err(|_| {
                    EstimateError::InvalidParameter(format!("majority threshold '{t}'"))
                })?;
                Ok(EstimationRule::Majority { threshold })
            }
            _ => Err(EstimateError::Unsupported(s.to_string())),
        }
    }
}

impl fmt::Display for EstimationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationRule::Mean => write!(f, "mean"),
            EstimationRule::Majority { threshold } => write!(f, "majority:{threshold}"),
            EstimationRule::Median => write!(f, "median"),
        }
    }
}

/// Point estimate of length `num_rates` from a draw set.
pub fn point_estimate(
    draws: &PosteriorDraws,
    rule: &EstimationRule,
) -> Result<Array1<f64>, EstimateError> {
    rule.ensure_supported()?;
    let logits = draws.to_logit();
    match rule {
        EstimationRule::Mean => {
            let mean = logits
                .mean_axis(Axis(0))
                .ok_or_else(|| EstimateError::InvalidParameter("empty draw set".to_string()))?;
            Ok(mean.mapv(expit))
        }
        EstimationRule::Majority { threshold } => {
            let cutoff = logit(*threshold);
            let total = logits.nrows();
            let estimate = logits
                .columns()
                .into_iter()
                .map(|col| {
                    let above = col.iter().filter(|v| **v > cutoff).count();
                    if 2 * above > total {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect::<Array1<f64>>();
            Ok(estimate)
        }
        EstimationRule::Median => Err(EstimateError::Unsupported("median".to_string())),
    }
}
