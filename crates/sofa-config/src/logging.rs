use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Where diagnostic output is written.
///
/// Standard output carries the query protocol, so it is never offered here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// The standard error stream, selected with `-`.
    Stderr,
    /// A file opened in append mode.
    File(Utf8PathBuf),
}

impl FromStr for LogDestination {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(if value == "-" {
            Self::Stderr
        } else {
            Self::File(Utf8PathBuf::from(value))
        })
    }
}

impl fmt::Display for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stderr => f.write_str("-"),
            Self::File(path) => write!(f, "{path}"),
        }
    }
}
