//! Tracing subscriber installation for the host process.
//!
//! Library code only emits `tracing` spans and events; the process hosting a
//! run calls [`init_tracing`] once to decide where they go.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::DeploymentError;

/// Variable selecting the log format (`json` or `pretty`).
pub const LOG_FORMAT_VAR: &str = "STRATA_LOG_FORMAT";

/// Output format for tracing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log collectors.
    Json,
    /// Human-readable lines.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Reads the format from `STRATA_LOG_FORMAT`, defaulting to pretty.
    pub fn from_env() -> Self {
        Self::from_setting(std::env::var(LOG_FORMAT_VAR).ok().as_deref())
    }

    /// Interprets a raw setting; anything other than `json` is pretty.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Returns an error instead of panicking if a subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), DeploymentError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| DeploymentError::Telemetry {
        message: e.to_string(),
    })
}
