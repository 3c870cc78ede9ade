//! Version-gated response shapes.
//!
//! Hosts older than 0.11.0 expect errors and log lines as single-field
//! objects; newer hosts expect tagged arrays. The shape is fixed once at
//! startup from the announced protocol version.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use sofa_config::ProtocolVersion;
use tracing::info;

use crate::errors::QueryServerError;

/// First protocol revision that uses tagged error and log arrays.
pub const TAGGED_RESPONSES_SINCE: ProtocolVersion = ProtocolVersion::new(0, 11, 0);

/// First revision with `show`, `list`, `update` and `filter`.
pub const RENDER_COMMANDS_SINCE: ProtocolVersion = ProtocolVersion::new(0, 10, 0);

/// First revision that routes design-document functions through `ddoc`.
pub const DDOC_COMMAND_SINCE: ProtocolVersion = ProtocolVersion::new(0, 11, 0);

/// Design-document filters stop receiving a separate user context here.
pub const FILTER_USERCTX_UNTIL: ProtocolVersion = ProtocolVersion::new(0, 11, 1);

/// First revision with `add_lib` and `require` inside view functions.
pub const VIEW_LIBS_SINCE: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

const FUNCTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::function");

/// Wire encoding for errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStyle {
    /// `{"error": id, "reason": reason}` and `{"log": message}`.
    Legacy,
    /// `["error", id, reason]` and `["log", message]`.
    Tagged,
}

impl ResponseStyle {
    /// Picks the encoding for a negotiated protocol revision.
    #[must_use]
    pub fn for_version(version: ProtocolVersion) -> Self {
        if version < TAGGED_RESPONSES_SINCE {
            Self::Legacy
        } else {
            Self::Tagged
        }
    }

    /// Encodes an error id and reason.
    #[must_use]
    pub fn error(self, id: &str, reason: &str) -> Value {
        match self {
            Self::Legacy => json!({"error": id, "reason": reason}),
            Self::Tagged => json!(["error", id, reason]),
        }
    }

    /// Encodes a log message.
    #[must_use]
    pub fn log(self, message: &str) -> Value {
        match self {
            Self::Legacy => json!({"log": message}),
            Self::Tagged => json!(["log", message]),
        }
    }

    /// Encodes any condition that is not an access denial.
    #[must_use]
    pub fn condition(self, error: &QueryServerError) -> Value {
        match error {
            QueryServerError::Forbidden { reason } => forbidden(reason),
            other => self.error(other.error_id(), &other.reason()),
        }
    }
}

/// Encodes an access denial; identical in every protocol revision.
#[must_use]
pub fn forbidden(reason: &str) -> Value {
    json!({"forbidden": reason})
}

/// Logging capability handed to query functions.
///
/// Messages are queued as protocol log lines and drained by the response
/// writer ahead of the next response, so they reach the host in the order
/// they were produced.
#[derive(Debug, Clone)]
pub struct LogSink {
    style: ResponseStyle,
    pending: Rc<RefCell<Vec<Value>>>,
}

impl LogSink {
    /// Creates an empty sink for the given encoding.
    #[must_use]
    pub fn new(style: ResponseStyle) -> Self {
        Self {
            style,
            pending: Rc::default(),
        }
    }

    /// Encoding used for queued lines.
    #[must_use]
    pub const fn style(&self) -> ResponseStyle {
        self.style
    }

    /// Queues a message; non-string values are logged as their JSON text.
    pub fn log(&self, message: &Value) {
        let text = match message {
            Value::String(text) => text.clone(),
            Value::Null => "Error: attempting to log message of null".to_owned(),
            other => other.to_string(),
        };
        info!(target: FUNCTION_TARGET, "{text}");
        self.pending.borrow_mut().push(self.style.log(&text));
    }

    /// Removes and returns every queued line.
    pub fn drain(&self) -> Vec<Value> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}
