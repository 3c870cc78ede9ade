//! Positional arguments of a protocol message.

use serde_json::Value;

use crate::errors::QueryServerError;

/// Remaining arguments of one command, consumed front to back.
///
/// A missing or mistyped argument means the host and worker disagree about
/// the protocol, so every failure here is fatal.
#[derive(Debug)]
pub struct Args {
    command: String,
    values: std::vec::IntoIter<Value>,
}

impl Args {
    /// Wraps the arguments of `command`.
    #[must_use]
    pub fn new(command: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            values: values.into_iter(),
        }
    }

    /// Command these arguments belong to.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Next argument, which must be present.
    ///
    /// # Errors
    ///
    /// Returns a fatal protocol error when the message is too short.
    pub fn required(&mut self, name: &str) -> Result<Value, QueryServerError> {
        self.values.next().ok_or_else(|| {
            QueryServerError::protocol(format!(
                "command '{}' is missing argument '{name}'",
                self.command
            ))
        })
    }

    /// Next argument if the host sent one.
    pub fn optional(&mut self) -> Option<Value> {
        self.values.next()
    }

    /// Next argument as a string.
    ///
    /// # Errors
    ///
    /// Returns a fatal protocol error when missing or not a string.
    pub fn string(&mut self, name: &str) -> Result<String, QueryServerError> {
        match self.required(name)? {
            Value::String(text) => Ok(text),
            other => Err(self.mistyped(name, "a string", &other)),
        }
    }

    /// Next argument as an array.
    ///
    /// # Errors
    ///
    /// Returns a fatal protocol error when missing or not an array.
    pub fn array(&mut self, name: &str) -> Result<Vec<Value>, QueryServerError> {
        match self.required(name)? {
            Value::Array(items) => Ok(items),
            other => Err(self.mistyped(name, "an array", &other)),
        }
    }

    /// Everything not consumed yet.
    #[must_use]
    pub fn rest(self) -> Vec<Value> {
        self.values.collect()
    }

    fn mistyped(&self, name: &str, expected: &str, got: &Value) -> QueryServerError {
        QueryServerError::protocol(format!(
            "argument '{name}' of command '{}' must be {expected}, got {got}",
            self.command
        ))
    }
}

/// Truthiness of a JSON value: `null`, `false`, zero, and empty strings,
/// arrays and objects are false.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
