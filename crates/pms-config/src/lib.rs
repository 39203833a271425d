//! PMS design settings loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for settings.json
//! - Settings resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation
//! - Settings snapshots for reproducible outputs

pub mod load;
pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use load::{load_settings, ConfigError, ResolvedSettings};
pub use resolve::{resolve_settings_path, ConfigSource, SettingsPath};
pub use settings::{
    EstimateSpec, LossSpec, McmcSettings, PriorSettings, Rounding, Settings, UtilitySettings,
};
pub use snapshot::SettingsSnapshot;
pub use validate::{validate_settings, ValidationError, ValidationResult};

/// Schema version for settings files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
