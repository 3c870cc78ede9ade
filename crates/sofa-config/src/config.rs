//! Command-line configuration for the worker process.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

use crate::defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, DEFAULT_PROTOCOL_VERSION, default_log_filter_string,
};
use crate::logging::{LogDestination, LogFormat};
use crate::version::ProtocolVersion;

/// Filter applied whenever `--debug` is present.
const DEBUG_LOG_FILTER: &str = "debug";

/// Startup configuration handed to the worker by the database host.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "sofa-query-server",
    version,
    about = "Runs design-document query functions over a line-delimited JSON protocol",
    long_about = None,
)]
pub struct Config {
    /// File to append log messages to, or `-` for the standard error stream.
    ///
    /// Logging is disabled when this is omitted.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<LogDestination>,

    /// Tracing filter expression, e.g. `info` or `sofa_query_server=debug`.
    #[arg(long, value_name = "FILTER", default_value_t = default_log_filter_string())]
    pub log_level: String,

    /// Formatting used for log records.
    #[arg(long, value_name = "FORMAT", default_value_t = DEFAULT_LOG_FORMAT)]
    pub log_format: LogFormat,

    /// Enables debug logging regardless of `--log-level`.
    #[arg(long)]
    pub debug: bool,

    /// Allows update functions to run for `GET` requests.
    #[arg(long)]
    pub allow_get_update: bool,

    /// Enables importing base64-encoded bundles referenced from design documents.
    #[arg(long)]
    pub enable_bundles: bool,

    /// Directory used to unpack imported bundles.
    #[arg(long, value_name = "DIR")]
    pub bundle_cache: Option<Utf8PathBuf>,

    /// Protocol revision spoken by the host (`X.Y.Z` or `trunk`).
    #[arg(
        long = "couchdb-version",
        value_name = "VERSION",
        default_value_t = DEFAULT_PROTOCOL_VERSION
    )]
    pub protocol_version: ProtocolVersion,
}

/// Errors surfaced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command-line parsing failed, or help/version output was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
}

impl ConfigError {
    /// Exit code clap assigns to this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cli(error) => error.exit_code(),
        }
    }

    /// Prints the message to the stream clap chooses and exits the process.
    pub fn exit(self) -> ! {
        match self {
            Self::Cli(error) => error.exit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: DEFAULT_LOG_FILTER.to_owned(),
            log_format: DEFAULT_LOG_FORMAT,
            debug: false,
            allow_get_update: false,
            enable_bundles: false,
            bundle_cache: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }
}

impl Config {
    /// Parses configuration from an explicit argument list.
    ///
    /// The first item is the program name, as with [`std::env::args_os`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cli`] when the arguments are invalid or when
    /// `--help`/`--version` short-circuits parsing.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    /// Parses configuration from the process arguments.
    ///
    /// # Errors
    ///
    /// See [`Config::load_from_iter`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Effective tracing filter, honouring `--debug`.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        if self.debug {
            DEBUG_LOG_FILTER
        } else {
            &self.log_level
        }
    }

    /// Configured log record format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Configured log destination, if logging is enabled.
    #[must_use]
    pub const fn log_destination(&self) -> Option<&LogDestination> {
        self.log_file.as_ref()
    }

    /// Protocol revision the worker should speak.
    #[must_use]
    pub const fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}
