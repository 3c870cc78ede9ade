//! Protocol revisions announced by the database host.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Three-component protocol revision, ordered lexicographically.
///
/// Handler availability and response shapes are gated on comparisons against
/// this value, so the ordering is the derived field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ProtocolVersion {
    /// Revision used when the host does not pin one; newer than any release.
    pub const LATEST: Self = Self::new(999, 999, 999);

    /// Builds a revision from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Patch component.
    #[must_use]
    pub const fn patch(self) -> u32 {
        self.patch
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

/// Errors raised while parsing a [`ProtocolVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolVersionError {
    /// The string had no components at all.
    #[error("protocol version must not be empty")]
    Empty,
    /// More than three dot-separated components were supplied.
    #[error("protocol version '{input}' has more than three components")]
    TooManyComponents {
        /// The rejected input.
        input: String,
    },
    /// A component was not a non-negative integer.
    #[error("protocol version component '{component}' in '{input}' is not a number")]
    InvalidComponent {
        /// The rejected input.
        input: String,
        /// The offending component.
        component: String,
    },
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolVersionError;

    /// Parses `X`, `X.Y` or `X.Y.Z`; missing components are zero and `trunk`
    /// selects [`ProtocolVersion::LATEST`].
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProtocolVersionError::Empty);
        }
        if trimmed.eq_ignore_ascii_case("trunk") {
            return Ok(Self::LATEST);
        }

        let mut parts = [0_u32; 3];
        for (index, component) in trimmed.split('.').enumerate() {
            let slot = parts
                .get_mut(index)
                .ok_or_else(|| ProtocolVersionError::TooManyComponents {
                    input: input.to_owned(),
                })?;
            *slot = component
                .parse()
                .map_err(|_| ProtocolVersionError::InvalidComponent {
                    input: input.to_owned(),
                    component: component.to_owned(),
                })?;
        }
        let [major, minor, patch] = parts;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.1.0", ProtocolVersion::new(1, 1, 0))]
    #[case("1.1", ProtocolVersion::new(1, 1, 0))]
    #[case("0", ProtocolVersion::new(0, 0, 0))]
    #[case(" 0.10.1 ", ProtocolVersion::new(0, 10, 1))]
    #[case("trunk", ProtocolVersion::LATEST)]
    #[case("TRUNK", ProtocolVersion::LATEST)]
    fn parses_versions(#[case] input: &str, #[case] expected: ProtocolVersion) {
        assert_eq!(input.parse::<ProtocolVersion>(), Ok(expected));
    }

    #[rstest]
    #[case("", ProtocolVersionError::Empty)]
    #[case("1.2.3.4", ProtocolVersionError::TooManyComponents { input: "1.2.3.4".into() })]
    #[case("1.x", ProtocolVersionError::InvalidComponent { input: "1.x".into(), component: "x".into() })]
    #[case("1..2", ProtocolVersionError::InvalidComponent { input: "1..2".into(), component: String::new() })]
    fn rejects_malformed_versions(#[case] input: &str, #[case] expected: ProtocolVersionError) {
        assert_eq!(input.parse::<ProtocolVersion>(), Err(expected));
    }

    #[test]
    fn orders_by_component() {
        assert!(ProtocolVersion::new(0, 9, 9) < ProtocolVersion::new(0, 10, 0));
        assert!(ProtocolVersion::new(0, 11, 0) < ProtocolVersion::new(0, 11, 1));
        assert!(ProtocolVersion::new(1, 1, 0) < ProtocolVersion::LATEST);
    }

    #[test]
    fn displays_dotted_triple() {
        assert_eq!(ProtocolVersion::new(0, 11, 1).to_string(), "0.11.1");
    }
}
