//! Default values shared by the parser and the worker.

use crate::logging::LogFormat;
use crate::version::ProtocolVersion;

/// Default log filter expression used by the worker.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default logging format for the worker.
pub const DEFAULT_LOG_FORMAT: LogFormat = LogFormat::Compact;

/// Protocol revision assumed when the host does not announce one.
pub const DEFAULT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::LATEST;

/// Owned log filter value used where allocation is required (e.g. clap).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}
