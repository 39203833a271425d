//! Settings types for design-utility estimation.
//!
//! Every section has serde defaults so a partial settings.json only needs
//! the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub utility: UtilitySettings,

    #[serde(default)]
    pub mcmc: McmcSettings,

    #[serde(default)]
    pub prior: PriorSettings,

    #[serde(default)]
    pub loss: LossSpec,

    #[serde(default)]
    pub estimate: EstimateSpec,
}

fn default_schema_version() -> String {
    crate::CONFIG_SCHEMA_VERSION.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            description: None,
            utility: UtilitySettings::default(),
            mcmc: McmcSettings::default(),
            prior: PriorSettings::default(),
            loss: LossSpec::default(),
            estimate: EstimateSpec::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Read and parse settings from a file.
    pub fn from_file(path: &Path) -> Result<Self, crate::ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| crate::ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| crate::ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Tie-break policy used when rounding a design to integer test counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Take excess from the heaviest cells, give deficit to the lightest.
    #[default]
    Low,
    /// Take excess from the lightest cells, give deficit to the heaviest.
    High,
}

impl std::str::FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Rounding::Low),
            "high" => Ok(Rounding::High),
            _ => Err(format!("unknown rounding policy: {}", s)),
        }
    }
}

impl std::fmt::Display for Rounding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rounding::Low => write!(f, "low"),
            Rounding::High => write!(f, "high"),
        }
    }
}

/// Outer Monte Carlo loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilitySettings {
    /// Number of simulated futures per design and budget.
    pub omega_count: usize,
    /// Future `i` is seeded with `base_seed + i`.
    pub base_seed: u64,
    /// Evaluate futures on the rayon pool.
    pub parallel: bool,
    /// Largest tolerated share of failed futures before the estimate is
    /// reported as unreliable.
    pub max_failure_fraction: f64,
    /// Per-future wall-clock budget for the posterior refresh.
    pub future_timeout_ms: Option<u64>,
    pub rounding: Rounding,
}

impl Default for UtilitySettings {
    fn default() -> Self {
        Self {
            omega_count: 100,
            base_seed: 1,
            parallel: true,
            max_failure_fraction: 0.5,
            future_timeout_ms: None,
            rounding: Rounding::Low,
        }
    }
}

/// Bundled Metropolis sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcSettings {
    pub num_post_samples: usize,
    /// Sweeps discarded before the first retained draw.
    pub burn_in: usize,
    /// Sweeps between retained draws.
    pub thin: usize,
    /// Standard deviation of the logit-space random-walk proposal.
    pub step_size: f64,
    /// Chains accepting fewer proposals than this fraction are rejected.
    pub min_acceptance: f64,
}

impl Default for McmcSettings {
    fn default() -> Self {
        Self {
            num_post_samples: 500,
            burn_in: 500,
            thin: 2,
            step_size: 0.6,
            min_acceptance: 0.01,
        }
    }
}

/// Independent logit-normal prior on every latent rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorSettings {
    /// Prior mean in logit space.
    pub mean: f64,
    /// Prior variance in logit space.
    pub variance: f64,
}

impl Default for PriorSettings {
    fn default() -> Self {
        Self {
            // logit(0.1)
            mean: -2.197_224_577_336_219_6,
            variance: 4.0,
        }
    }
}

/// Loss function selection and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossSpec {
    /// Euclidean distance between estimate and truth.
    SquaredError,
    /// Count of disagreements after thresholding both vectors.
    Classification { threshold: f64 },
    /// Asymmetric error weighted by distance from a regulatory rate target.
    AsymmetricPms {
        over_est_weight: f64,
        rate_target: f64,
    },
}

impl Default for LossSpec {
    fn default() -> Self {
        LossSpec::AsymmetricPms {
            over_est_weight: 1.0,
            rate_target: 0.4,
        }
    }
}

/// Point-estimate rule selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum EstimateSpec {
    /// Logit-space mean mapped back through the sigmoid.
    #[default]
    Mean,
    /// Per-dimension majority vote over draws above `threshold`.
    Majority { threshold: f64 },
    /// Accepted by the parser, rejected at evaluation time.
    Median,
}
