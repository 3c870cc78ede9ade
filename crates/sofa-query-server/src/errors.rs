//! Error taxonomy for the query server.
//!
//! Components raise [`QueryServerError`] values; only the dispatch loop looks
//! at [`QueryServerError::severity`] to decide whether a failure is reported
//! and skipped or reported and terminal. Query functions report failures
//! through [`FunctionError`], which folds into the same taxonomy.

use thiserror::Error;

/// How the dispatch loop treats a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Access was denied; answered with a `forbidden` response.
    Forbidden,
    /// Reported to the host; the loop keeps serving.
    Recoverable,
    /// Reported to the host; the worker terminates with a failure status.
    Fatal,
}

/// Conditions raised while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryServerError {
    /// An input line was not valid JSON.
    #[error("unable to decode message: {detail}")]
    Decode {
        /// The raw line as read from the host.
        line: String,
        /// Parser diagnostic.
        detail: String,
    },

    /// A response could not be written.
    #[error("unable to encode response: {detail}")]
    Encode {
        /// Serializer or stream diagnostic.
        detail: String,
    },

    /// A design-document path or module could not be resolved.
    #[error("invalid require path: {reason}")]
    Resolution {
        /// Human-readable explanation naming the offending path.
        reason: String,
    },

    /// A function explicitly rejected the operation.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Rejection message supplied by the function.
        reason: String,
    },

    /// No response builder matched the request.
    #[error("not acceptable: {reason}")]
    NotAcceptable {
        /// Lists the representations that are available.
        reason: String,
    },

    /// The command is not part of the negotiated protocol.
    #[error("unknown command '{command}'")]
    UnknownCommand {
        /// Command name as received.
        command: String,
    },

    /// Recoverable failure with an explicit error id.
    #[error("{id}: {reason}")]
    Error {
        /// Machine-readable error id.
        id: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Terminal failure with an explicit error id.
    #[error("{id}: {reason}")]
    Fatal {
        /// Machine-readable error id.
        id: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A query function failed in a way it did not anticipate.
    #[error("{kind}: {reason}")]
    Internal {
        /// Category of the fault, e.g. the failing operation.
        kind: String,
        /// Fault message.
        reason: String,
    },
}

impl QueryServerError {
    /// Creates a decode fault for a raw input line.
    pub fn decode(line: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Decode {
            line: line.into(),
            detail: detail.into(),
        }
    }

    /// Creates an encode fault.
    pub fn encode(detail: impl Into<String>) -> Self {
        Self::Encode {
            detail: detail.into(),
        }
    }

    /// Creates a resolution error.
    pub fn resolution(reason: impl Into<String>) -> Self {
        Self::Resolution {
            reason: reason.into(),
        }
    }

    /// Creates an access-denied condition.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Creates a negotiation failure.
    pub fn not_acceptable(reason: impl Into<String>) -> Self {
        Self::NotAcceptable {
            reason: reason.into(),
        }
    }

    /// Creates an unknown command error.
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates a recoverable error.
    pub fn error(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an internal fault.
    pub fn internal(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Internal {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Recoverable `render_error` raised by render helpers.
    pub fn render(reason: impl Into<String>) -> Self {
        Self::error("render_error", reason)
    }

    /// Fatal `query_protocol_error` for messages the worker cannot interpret.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::fatal("query_protocol_error", reason)
    }

    /// Wire-level error id.
    #[must_use]
    pub fn error_id(&self) -> &str {
        match self {
            Self::Decode { .. } => "json_decode",
            Self::Encode { .. } => "json_encode",
            Self::Resolution { .. } => "invalid_require_path",
            Self::Forbidden { .. } => "forbidden",
            Self::NotAcceptable { .. } => "not_acceptable",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::Error { id, .. } | Self::Fatal { id, .. } => id,
            Self::Internal { kind, .. } => kind,
        }
    }

    /// Wire-level reason text.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Decode { detail, .. } | Self::Encode { detail } => detail.clone(),
            Self::UnknownCommand { command } => format!("unknown command '{command}'"),
            Self::Resolution { reason }
            | Self::Forbidden { reason }
            | Self::NotAcceptable { reason }
            | Self::Error { reason, .. }
            | Self::Fatal { reason, .. }
            | Self::Internal { reason, .. } => reason.clone(),
        }
    }

    /// Classification used by the dispatch loop.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Forbidden { .. } => Severity::Forbidden,
            Self::Resolution { .. } | Self::NotAcceptable { .. } | Self::Error { .. } => {
                Severity::Recoverable
            }
            Self::Decode { .. }
            | Self::Encode { .. }
            | Self::UnknownCommand { .. }
            | Self::Fatal { .. }
            | Self::Internal { .. } => Severity::Fatal,
        }
    }
}

/// Failures reported by query functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    /// A server condition raised on purpose or propagated from a helper.
    #[error(transparent)]
    Raised(#[from] QueryServerError),

    /// The function denied access.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A field assertion failed; validation treats this as a denial.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Anything the function did not anticipate.
    #[error("{kind}: {message}")]
    Fault {
        /// Category of the fault.
        kind: String,
        /// Fault message.
        message: String,
    },
}

impl FunctionError {
    /// Creates an unanticipated fault.
    pub fn fault(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates an access denial.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    /// Creates a failed assertion.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Converts the failure for a validation function, where a failed
    /// assertion denies access instead of faulting.
    #[must_use]
    pub fn into_validation_error(self) -> QueryServerError {
        match self {
            Self::Assertion(message) => QueryServerError::forbidden(message),
            other => other.into(),
        }
    }
}

impl From<FunctionError> for QueryServerError {
    fn from(error: FunctionError) -> Self {
        match error {
            FunctionError::Raised(inner) => inner,
            FunctionError::Forbidden(reason) => Self::forbidden(reason),
            FunctionError::Assertion(message) => Self::internal("AssertionError", message),
            FunctionError::Fault { kind, message } => Self::internal(kind, message),
        }
    }
}
