//! Configuration for the sofa query server worker.
//!
//! The database host launches the worker with a handful of command-line flags:
//! where to write diagnostics, which protocol revision it speaks, and which
//! optional capabilities are enabled. This crate parses those flags into a
//! [`Config`] that the worker consumes at startup and never mutates again.

mod config;
mod defaults;
mod logging;
mod version;

pub use config::{Config, ConfigError};
pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, DEFAULT_PROTOCOL_VERSION, default_log_filter_string,
};
pub use logging::{LogDestination, LogFormat, LogFormatParseError};
pub use version::{ProtocolVersion, ProtocolVersionError};
