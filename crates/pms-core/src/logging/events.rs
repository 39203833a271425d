//! Event vocabulary shared by the subscriber and the code that logs.

use serde::{Deserialize, Serialize};

/// Severity as written into JSONL records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Phases of a design evaluation run, recorded as the `stage` span field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Settings and input loading.
    Init,
    /// Design discretization.
    Plan,
    /// Synthetic observation generation.
    Simulate,
    /// Posterior refresh.
    Refit,
    /// Point estimation and loss scoring.
    Score,
    /// Summary over futures.
    Aggregate,
    /// Writing the command payload.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Init => "init",
            Stage::Plan => "plan",
            Stage::Simulate => "simulate",
            Stage::Refit => "refit",
            Stage::Score => "score",
            Stage::Aggregate => "aggregate",
            Stage::Report => "report",
        })
    }
}

/// Event names, used as the tracing target of each event.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";

    pub const SCENARIO_LOADED: &str = "scenario.loaded";
    pub const PRIOR_REFRESHED: &str = "prior.refreshed";

    pub const UTILITY_STARTED: &str = "utility.started";
    pub const UTILITY_FUTURE_SIMULATED: &str = "utility.future_simulated";
    pub const UTILITY_FUTURE_REFIT: &str = "utility.future_refit";
    pub const UTILITY_FUTURE_SCORED: &str = "utility.future_scored";
    pub const UTILITY_FUTURE_FAILED: &str = "utility.future_failed";
    pub const UTILITY_UNRELIABLE: &str = "utility.unreliable";
    pub const UTILITY_FINISHED: &str = "utility.finished";

    pub const SWEEP_STEP: &str = "sweep.step";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_display_matches_serde() {
        for stage in [
            Stage::Init,
            Stage::Plan,
            Stage::Simulate,
            Stage::Refit,
            Stage::Score,
            Stage::Aggregate,
            Stage::Report,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }

    #[test]
    fn level_maps_from_tracing() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(serde_json::to_string(&Level::Info).unwrap(), "\"info\"");
    }

    #[test]
    fn event_names_are_dotted() {
        assert_eq!(event_names::UTILITY_FINISHED, "utility.finished");
        assert_eq!(event_names::SWEEP_STEP, "sweep.step");
    }
}
