//! Structured telemetry initialisation for the worker.
//!
//! The worker's standard output belongs to the protocol, so log records go to
//! the standard error stream or to an append-only file, and only when the
//! host asked for them with `--log-file`.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sofa_config::{Config, LogDestination, LogFormat};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};

static TELEMETRY_GUARD: OnceCell<bool> = OnceCell::new();

/// Handle returned once telemetry has been configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle {
    installed: bool,
}

impl TelemetryHandle {
    /// Whether a subscriber is recording events.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.installed
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression is invalid.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    Open {
        /// Requested log file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global subscriber on first use; later calls return the
/// outcome of the first.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter, the log file or the
/// subscriber cannot be set up.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|installed| TelemetryHandle {
            installed: *installed,
        })
}

fn install_subscriber(config: &Config) -> Result<bool, TelemetryError> {
    let Some(destination) = config.log_destination() else {
        return Ok(false);
    };
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let (writer, ansi) = match destination {
        LogDestination::Stderr => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
        LogDestination::File(path) => {
            let file = open_log_file(path.as_str())?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(true)
}

fn open_log_file(path: &str) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::Open {
            path: path.to_owned(),
            source,
        })
}
