//! Splitting a decoded message into command and arguments.

use serde_json::Value;

use crate::errors::QueryServerError;

/// One host message.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    command: String,
    args: Vec<Value>,
}

impl QueryRequest {
    /// Interprets a decoded message.
    ///
    /// # Errors
    ///
    /// Returns a fatal protocol error unless the message is an array whose
    /// first element is a string.
    pub fn parse(message: Value) -> Result<Self, QueryServerError> {
        let Value::Array(items) = message else {
            return Err(QueryServerError::protocol(format!(
                "expected a command array, got {message}"
            )));
        };
        let mut items = items.into_iter();
        match items.next() {
            Some(Value::String(command)) => Ok(Self {
                command,
                args: items.collect(),
            }),
            Some(other) => Err(QueryServerError::protocol(format!(
                "command name must be a string, got {other}"
            ))),
            None => Err(QueryServerError::protocol("empty command array")),
        }
    }

    /// Command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments after the command name.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Splits into name and arguments.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.command, self.args)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::QueryRequest;

    #[rstest]
    fn splits_command_from_arguments() {
        let request = QueryRequest::parse(json!(["map_doc", {"_id": "a"}])).expect("valid");
        assert_eq!(request.command(), "map_doc");
        assert_eq!(request.args(), &[json!({"_id": "a"})]);
    }

    #[rstest]
    #[case(json!({"command": "reset"}))]
    #[case(json!([]))]
    #[case(json!([42, "x"]))]
    #[case(json!("reset"))]
    fn rejects_malformed_messages(#[case] message: Value) {
        let error = QueryRequest::parse(message).expect_err("malformed");
        assert_eq!(error.error_id(), "query_protocol_error");
    }
}
