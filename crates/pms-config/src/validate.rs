//! Settings validation errors and semantic validation.

use thiserror::Error;

use crate::settings::{EstimateSpec, LossSpec, Settings};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Settings validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::InvalidValue { .. } => 11,
            ValidationError::VersionMismatch { .. } => 12,
        }
    }
}

impl From<ValidationError> for pms_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::VersionMismatch { expected, actual } => {
                pms_common::Error::SchemaVersion { expected, actual }
            }
            other => pms_common::Error::InvalidSettings(other.to_string()),
        }
    }
}

fn invalid(field: &str, message: String) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message,
    }
}

fn require_open_unit(field: &str, value: f64) -> ValidationResult<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(invalid(field, format!("Must be in (0, 1), got {}", value)));
    }
    Ok(())
}

/// Validate settings semantically.
pub fn validate_settings(settings: &Settings) -> ValidationResult<()> {
    if settings.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: settings.schema_version.clone(),
        });
    }

    let utility = &settings.utility;
    if utility.omega_count == 0 {
        return Err(invalid("utility.omega_count", "Must be at least 1".into()));
    }
    if !(0.0..=1.0).contains(&utility.max_failure_fraction) {
        return Err(invalid(
            "utility.max_failure_fraction",
            format!("Must be in [0, 1], got {}", utility.max_failure_fraction),
        ));
    }
    if utility.future_timeout_ms == Some(0) {
        return Err(invalid(
            "utility.future_timeout_ms",
            "Must be positive when set".into(),
        ));
    }

    let mcmc = &settings.mcmc;
    if mcmc.num_post_samples == 0 {
        return Err(invalid("mcmc.num_post_samples", "Must be at least 1".into()));
    }
    if mcmc.thin == 0 {
        return Err(invalid("mcmc.thin", "Must be at least 1".into()));
    }
    if !(mcmc.step_size.is_finite() && mcmc.step_size > 0.0) {
        return Err(invalid(
            "mcmc.step_size",
            format!("Must be positive, got {}", mcmc.step_size),
        ));
    }
    require_open_unit("mcmc.min_acceptance", mcmc.min_acceptance)?;

    if !settings.prior.mean.is_finite() {
        return Err(invalid("prior.mean", "Must be finite".into()));
    }
    if !(settings.prior.variance.is_finite() && settings.prior.variance > 0.0) {
        return Err(invalid(
            "prior.variance",
            format!("Must be positive, got {}", settings.prior.variance),
        ));
    }

    match &settings.loss {
        LossSpec::SquaredError => {}
        LossSpec::Classification { threshold } => {
            require_open_unit("loss.threshold", *threshold)?;
        }
        LossSpec::AsymmetricPms {
            over_est_weight,
            rate_target,
        } => {
            if !(over_est_weight.is_finite() && *over_est_weight > 0.0) {
                return Err(invalid(
                    "loss.over_est_weight",
                    format!("Must be positive, got {}", over_est_weight),
                ));
            }
            require_open_unit("loss.rate_target", *rate_target)?;
        }
    }

    if let EstimateSpec::Majority { threshold } = &settings.estimate {
        require_open_unit("estimate.threshold", *threshold)?;
    }

    Ok(())
}
