//! Settings loading: resolve, read, hash, parse, validate.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::resolve::{resolve_settings_path, ConfigSource};
use crate::settings::Settings;
use crate::snapshot::hash_content;
use crate::validate::{validate_settings, ValidationError};

/// Errors that can occur during settings loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl From<ConfigError> for pms_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation(inner) => inner.into(),
            ConfigError::Io { source, .. } => pms_common::Error::Io(source),
            other => pms_common::Error::Config(other.to_string()),
        }
    }
}

/// Loaded settings with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub settings: Settings,
    /// Path to the settings file (None if using defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    /// SHA-256 of the settings file content (None if using defaults).
    pub content_hash: Option<String>,
}

impl ResolvedSettings {
    /// Built-in defaults with no backing file.
    pub fn defaults() -> Self {
        Self {
            settings: Settings::default(),
            path: None,
            source: ConfigSource::BuiltinDefault,
            content_hash: None,
        }
    }
}

/// Resolve, read and validate settings.
///
/// An explicit CLI path that does not exist is an error rather than a silent
/// fall-through to defaults.
pub fn load_settings(cli_path: Option<&Path>) -> Result<ResolvedSettings, ConfigError> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let resolved = resolve_settings_path(cli_path);
    let Some(path) = resolved.path else {
        let defaults = ResolvedSettings::defaults();
        validate_settings(&defaults.settings)?;
        return Ok(defaults);
    };

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let settings = Settings::from_json(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    validate_settings(&settings)?;

    Ok(ResolvedSettings {
        settings,
        content_hash: Some(hash_content(&content)),
        path: Some(path),
        source: resolved.source,
    })
}
