//! Row-at-a-time list rendering for hosts older than 0.10.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::args::Args;
use crate::codec::Channel;
use crate::errors::QueryServerError;
use crate::worker::Worker;

use super::render_legacy;

/// Progress through one list, as reported to the list function.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RowState {
    first_key: Option<Value>,
    prev_key: Option<Value>,
    row_number: u64,
}

impl RowState {
    /// The `row_info` argument handed to the list function.
    #[must_use]
    pub(crate) fn info(&self) -> Value {
        json!({
            "first_key": self.first_key,
            "prev_key": self.prev_key,
            "row_number": self.row_number,
        })
    }

    fn advance(&mut self, row: &Value) {
        let key = row.get("key").cloned().unwrap_or_default();
        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        self.prev_key = Some(key);
        self.row_number += 1;
    }
}

/// Open lists keyed by function slot.
pub(crate) type RowStates = HashMap<usize, RowState>;

const LIST_SLOT: usize = 0;

fn missing_state() -> QueryServerError {
    QueryServerError::fatal("list_error", "list_begin was not called for this list")
}

/// `["list_begin", head, req]`.
pub(crate) fn list_begin(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("list_begin", args);
    let head = args.required("head")?;
    let request = args.required("req")?;
    let function = worker.state().function(LIST_SLOT)?;
    worker
        .state_mut()
        .row_states_mut()
        .insert(LIST_SLOT, RowState::default());
    render_legacy(function.as_ref(), vec![head, Value::Null, request, Value::Null])
}

/// `["list_row", row, req]`.
pub(crate) fn list_row(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("list_row", args);
    let row = args.required("row")?;
    let request = args.required("req")?;
    let function = worker.state().function(LIST_SLOT)?;
    let info = worker
        .state_mut()
        .row_states_mut()
        .get(&LIST_SLOT)
        .ok_or_else(missing_state)?
        .info();
    let rendered = render_legacy(function.as_ref(), vec![Value::Null, row.clone(), request, info])?;
    if let Some(state) = worker.state_mut().row_states_mut().get_mut(&LIST_SLOT) {
        state.advance(&row);
    }
    Ok(rendered)
}

/// `["list_tail", req]`.
pub(crate) fn list_tail(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("list_tail", args);
    let request = args.required("req")?;
    let function = worker.state().function(LIST_SLOT)?;
    let state = worker
        .state_mut()
        .row_states_mut()
        .remove(&LIST_SLOT)
        .ok_or_else(missing_state)?;
    render_legacy(
        function.as_ref(),
        vec![Value::Null, Value::Null, request, state.info()],
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::RowState;

    #[rstest]
    fn fresh_state_reports_no_keys() {
        assert_eq!(
            RowState::default().info(),
            json!({"first_key": null, "prev_key": null, "row_number": 0})
        );
    }

    #[rstest]
    fn advancing_tracks_first_and_previous_keys() {
        let mut state = RowState::default();
        state.advance(&json!({"key": "a", "value": 1}));
        state.advance(&json!({"key": "b", "value": 2}));
        assert_eq!(
            state.info(),
            json!({"first_key": "a", "prev_key": "b", "row_number": 2})
        );
    }
}
