//! Structured logging for pms-core.
//!
//! stdout carries command payloads only; every log line goes to stderr,
//! either as console text or as JSONL. Each CLI invocation opens a `run`
//! span carrying a `run_id`, and long operations open nested spans with a
//! `stage` field, so JSONL records can be grouped per run and phase.
//!
//! ```ignore
//! use pms_core::logging::{event_names, generate_run_id, init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from_env(None, None));
//! let run = tracing::info_span!("run", run_id = %generate_run_id());
//! let _guard = run.enter();
//! tracing::info!(target: event_names::RUN_STARTED, "starting");
//! ```

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .parse_lossy("");

    let result = match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };
    // A subscriber already set by a test harness or embedding program stays.
    let _ = result;
}

/// Short unique id for one invocation, e.g. `run-1b4e28ba2fa1`.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}
