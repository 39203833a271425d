//! Error types for PMS design evaluation.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 41,
//!   "category": "utility",
//!   "message": "utility estimate unreliable: 7 of 10 futures failed",
//!   "recoverable": true,
//!   "suggested_action": "retry",
//!   "context": { "failures": 7, "total": 10 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for PMS design operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Settings file errors.
    Config,
    /// Design, sampling-plan and observation-count errors.
    Design,
    /// Posterior sampling errors.
    Inference,
    /// Point estimation and utility aggregation errors.
    Utility,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Design => write!(f, "design"),
            ErrorCategory::Inference => write!(f, "inference"),
            ErrorCategory::Utility => write!(f, "utility"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for agents to take in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation, possibly with more futures or a new seed.
    Retry,
    /// Run the `check` command on settings or scenario.
    RunCheck,
    /// Fix the input files.
    FixInput,
    /// Abort the operation.
    Abort,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::FixInput => write!(f, "fix_input"),
            SuggestedAction::Abort => write!(f, "abort"),
        }
    }
}

/// Unified error type for PMS design evaluation.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersion { expected: String, actual: String },

    // Design errors (20-29)
    #[error("invalid design: {0}")]
    InvalidDesign(String),

    #[error("degenerate discretization: {0}")]
    DiscretizationDegenerate(String),

    #[error("invalid observations: {0}")]
    InvalidObservations(String),

    // Inference errors (30-39)
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference timed out after {millis}ms")]
    InferenceTimeout { millis: u64 },

    #[error("numerical instability detected: {0}")]
    NumericalInstability(String),

    // Utility errors (40-49)
    #[error("estimation rule unsupported: {0}")]
    EstimationRuleUnsupported(String),

    #[error("utility estimate unreliable: {failures} of {total} futures failed")]
    UnreliableEstimate { failures: usize, total: usize },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Design errors
    /// - 30-39: Inference errors
    /// - 40-49: Utility errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidSettings(_) => 11,
            Error::SchemaVersion { .. } => 12,
            Error::InvalidDesign(_) => 20,
            Error::DiscretizationDegenerate(_) => 21,
            Error::InvalidObservations(_) => 22,
            Error::Inference(_) => 30,
            Error::InferenceTimeout { .. } => 31,
            Error::NumericalInstability(_) => 32,
            Error::EstimationRuleUnsupported(_) => 40,
            Error::UnreliableEstimate { .. } => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidSettings(_) | Error::SchemaVersion { .. } => {
                ErrorCategory::Config
            }

            Error::InvalidDesign(_)
            | Error::DiscretizationDegenerate(_)
            | Error::InvalidObservations(_) => ErrorCategory::Design,

            Error::Inference(_)
            | Error::InferenceTimeout { .. }
            | Error::NumericalInstability(_) => ErrorCategory::Inference,

            Error::EstimationRuleUnsupported(_) | Error::UnreliableEstimate { .. } => {
                ErrorCategory::Utility
            }

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Config: fixable by editing settings
            Error::Config(_) => true,
            Error::InvalidSettings(_) => true,
            Error::SchemaVersion { .. } => true,

            // Design: the inputs are wrong, rerunning changes nothing
            Error::InvalidDesign(_) => false,
            Error::DiscretizationDegenerate(_) => false,
            Error::InvalidObservations(_) => false,

            // Inference: stochastic, may succeed with another seed or budget
            Error::Inference(_) => true,
            Error::InferenceTimeout { .. } => true,
            Error::NumericalInstability(_) => true,

            Error::EstimationRuleUnsupported(_) => false,
            Error::UnreliableEstimate { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => true,
        }
    }

    /// Returns the suggested action for agents.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) | Error::InvalidSettings(_) | Error::SchemaVersion { .. } => {
                SuggestedAction::RunCheck
            }

            Error::InvalidDesign(_)
            | Error::DiscretizationDegenerate(_)
            | Error::InvalidObservations(_) => SuggestedAction::FixInput,

            Error::Inference(_)
            | Error::InferenceTimeout { .. }
            | Error::NumericalInstability(_)
            | Error::UnreliableEstimate { .. } => SuggestedAction::Retry,

            Error::EstimationRuleUnsupported(_) => SuggestedAction::Abort,

            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::FixInput,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidSettings(_) => {
                "Run 'pms-core check' to validate settings, or remove the settings file to use defaults."
            }
            Error::SchemaVersion { .. } => {
                "Regenerate the file with the current schema version."
            }
            Error::InvalidDesign(_) => {
                "Designs must be non-negative, sum to 1 and match the scenario's test/supply node counts."
            }
            Error::DiscretizationDegenerate(_) => {
                "Every trace is already at or above the balanced target; increase the additional budget."
            }
            Error::InvalidObservations(_) => {
                "Check that N and Y have the same shape and that 0 <= Y <= N everywhere."
            }
            Error::Inference(_) | Error::NumericalInstability(_) => {
                "Retry with a different seed, a smaller MCMC step size, or a longer burn-in."
            }
            Error::InferenceTimeout { .. } => {
                "Raise utility.future_timeout_ms or reduce mcmc.num_post_samples."
            }
            Error::EstimationRuleUnsupported(_) => {
                "Use the 'mean' or 'majority' estimation rule."
            }
            Error::UnreliableEstimate { .. } => {
                "Too many simulated futures failed; inspect inference settings or raise utility.max_failure_fraction."
            }
            Error::Io(_) => "Check that the path exists and is readable, then retry.",
            Error::Json(_) => "Invalid JSON in file. Check syntax with 'jq . <file>'.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidSettings(_) => "Invalid Settings",
            Error::SchemaVersion { .. } => "Schema Version Mismatch",
            Error::InvalidDesign(_) => "Invalid Design",
            Error::DiscretizationDegenerate(_) => "Degenerate Discretization",
            Error::InvalidObservations(_) => "Invalid Observations",
            Error::Inference(_) => "Inference Error",
            Error::InferenceTimeout { .. } => "Inference Timeout",
            Error::NumericalInstability(_) => "Numerical Instability",
            Error::EstimationRuleUnsupported(_) => "Unsupported Estimation Rule",
            Error::UnreliableEstimate { .. } => "Unreliable Utility Estimate",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action for agents.
    pub suggested_action: SuggestedAction,

    /// Additional structured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::UnreliableEstimate { failures, total } => {
                context.insert("failures".to_string(), serde_json::json!(failures));
                context.insert("total".to_string(), serde_json::json!(total));
            }
            Error::InferenceTimeout { millis } => {
                context.insert("timeout_ms".to_string(), serde_json::json!(millis));
            }
            Error::SchemaVersion { expected, actual } => {
                context.insert("expected".to_string(), serde_json::json!(expected));
                context.insert("actual".to_string(), serde_json::json!(actual));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Format for human consumption: headline, reason and fix.
    pub fn human(err: &Error) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            err.headline(),
            err,
            err.remediation()
        )
    }
}
