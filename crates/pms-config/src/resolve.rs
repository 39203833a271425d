//! Settings path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → system → defaults.

use std::path::{Path, PathBuf};

/// Discovered settings file path.
#[derive(Debug, Clone, Default)]
pub struct SettingsPath {
    /// Path to settings.json (or None if not found).
    pub path: Option<PathBuf>,

    /// Where the path came from (for diagnostics).
    pub source: ConfigSource,
}

/// Where a settings file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/pms-design/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_SETTINGS_PATH: &str = "PMS_SETTINGS";
pub const ENV_CONFIG_DIR: &str = "PMS_CONFIG_DIR";

/// Standard settings file name.
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Application name for XDG directories.
const APP_NAME: &str = "pms-design";

/// Resolve the settings path.
///
/// 1. Explicit CLI path (if it exists)
/// 2. `PMS_SETTINGS`
/// 3. `PMS_CONFIG_DIR` + settings.json
/// 4. XDG config directory (~/.config/pms-design/)
/// 5. System config (/etc/pms-design/)
/// 6. Built-in defaults (None)
pub fn resolve_settings_path(cli_path: Option<&Path>) -> SettingsPath {
    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
    }

    if let Ok(env_path) = std::env::var(ENV_SETTINGS_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(SETTINGS_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(SETTINGS_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(SETTINGS_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    SettingsPath::default()
}

fn found(path: PathBuf, source: ConfigSource) -> SettingsPath {
    SettingsPath {
        path: Some(path),
        source,
    }
}

/// Get the XDG config directory for pms-design.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
