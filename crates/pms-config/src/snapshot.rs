//! Settings snapshots for reproducible outputs.
//!
//! A snapshot captures the settings in force when a utility estimate was
//! produced, so the numbers can be regenerated later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::load::ResolvedSettings;
use crate::settings::{EstimateSpec, LossSpec};

/// A frozen snapshot of settings state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    pub schema_version: String,

    /// Where the settings came from.
    pub source: String,

    #[serde(default)]
    pub path: Option<String>,

    /// SHA-256 of the settings file, or of the serialized defaults.
    pub content_hash: String,

    pub summary: SettingsSummary,
}

/// Key settings values for quick reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSummary {
    pub omega_count: usize,
    pub base_seed: u64,
    pub parallel: bool,
    pub num_post_samples: usize,
    pub loss: String,
    pub estimate: String,
    pub rounding: String,
}

impl SettingsSnapshot {
    /// Snapshot resolved settings.
    pub fn from_resolved(resolved: &ResolvedSettings) -> Self {
        let settings = &resolved.settings;
        let content_hash = match &resolved.content_hash {
            Some(hash) => hash.clone(),
            None => hash_content(&serde_json::to_string(settings).unwrap_or_default()),
        };

        let loss = match &settings.loss {
            LossSpec::SquaredError => "squared_error".to_string(),
            LossSpec::Classification { threshold } => format!("classification(t={threshold})"),
            LossSpec::AsymmetricPms {
                over_est_weight,
                rate_target,
            } => format!("asymmetric_pms(w={over_est_weight}, target={rate_target})"),
        };
        let estimate = match &settings.estimate {
            EstimateSpec::Mean => "mean".to_string(),
            EstimateSpec::Majority { threshold } => format!("majority(t={threshold})"),
            EstimateSpec::Median => "median".to_string(),
        };

        Self {
            timestamp: Utc::now(),
            schema_version: settings.schema_version.clone(),
            source: resolved.source.to_string(),
            path: resolved.path.as_ref().map(|p| p.display().to_string()),
            content_hash,
            summary: SettingsSummary {
                omega_count: settings.utility.omega_count,
                base_seed: settings.utility.base_seed,
                parallel: settings.utility.parallel,
                num_post_samples: settings.mcmc.num_post_samples,
                loss,
                estimate,
                rounding: settings.utility.rounding.to_string(),
            },
        }
    }
}

/// Hex SHA-256 of a string.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
