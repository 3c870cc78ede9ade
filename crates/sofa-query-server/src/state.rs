//! Per-connection query state and the handlers that manage it.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::args::{Args, is_truthy};
use crate::codec::Channel;
use crate::compiler::QueryFunction;
use crate::ddoc::{DesignDoc, SharedDesignDoc};
use crate::errors::QueryServerError;
use crate::render::RowStates;
use crate::worker::Worker;

const STATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::state");

/// Id given to the synthetic document that hosts the view library.
pub const VIEW_LIB_DOC_ID: &str = "_view_lib";

/// Functions added with `add_fun`, the query configuration sent with
/// `reset`, the view library and any open legacy list.
#[derive(Debug, Default)]
pub struct QueryState {
    functions: Vec<Rc<dyn QueryFunction>>,
    sources: Vec<String>,
    query_config: Map<String, Value>,
    view_lib: Option<Value>,
    lib_doc: Option<SharedDesignDoc>,
    superseded_libs: Vec<SharedDesignDoc>,
    row_states: RowStates,
}

impl QueryState {
    /// Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops stored functions and open lists and replaces the query
    /// configuration. The view library survives.
    pub fn reset(&mut self, query_config: Map<String, Value>) {
        self.functions.clear();
        self.sources.clear();
        self.superseded_libs.clear();
        self.row_states.clear();
        self.query_config = query_config;
    }

    /// Stores a compiled function together with its source.
    pub fn push_function(&mut self, source: String, function: Rc<dyn QueryFunction>) {
        self.sources.push(source);
        self.functions.push(function);
    }

    /// Function stored at `index`.
    ///
    /// # Errors
    ///
    /// Returns a fatal protocol error when fewer functions were added.
    pub fn function(&self, index: usize) -> Result<Rc<dyn QueryFunction>, QueryServerError> {
        self.functions.get(index).cloned().ok_or_else(|| {
            QueryServerError::protocol(format!(
                "no function stored at index {index}; send add_fun first"
            ))
        })
    }

    /// Every stored function, in the order added.
    #[must_use]
    pub fn functions(&self) -> &[Rc<dyn QueryFunction>] {
        &self.functions
    }

    /// Source text of the function at `index`.
    #[must_use]
    pub fn source(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(String::as_str)
    }

    /// Configuration received with the last `reset`.
    #[must_use]
    pub const fn query_config(&self) -> &Map<String, Value> {
        &self.query_config
    }

    /// Whether oversized reductions should be rejected.
    #[must_use]
    pub fn reduce_limit(&self) -> bool {
        self.query_config.get("reduce_limit").is_some_and(is_truthy)
    }

    /// Library registered with `add_lib`.
    #[must_use]
    pub const fn view_lib(&self) -> Option<&Value> {
        self.view_lib.as_ref()
    }

    /// Replaces the view library; functions compiled later see the new one.
    ///
    /// Functions already stored keep resolving against the library they were
    /// compiled with until the next `reset`.
    pub fn set_view_lib(&mut self, lib: Value) {
        self.view_lib = Some(lib);
        self.superseded_libs.extend(self.lib_doc.take());
    }

    /// Document `{"views": {"lib": <view library>}}` that view functions
    /// resolve `require` against, built on first use.
    pub fn lib_doc(&mut self) -> SharedDesignDoc {
        let view_lib = self.view_lib.clone().unwrap_or_else(|| json!({}));
        Rc::clone(self.lib_doc.get_or_insert_with(|| {
            Rc::new(RefCell::new(DesignDoc::new(
                VIEW_LIB_DOC_ID,
                json!({"views": {"lib": view_lib}}),
            )))
        }))
    }

    /// Open legacy lists.
    pub(crate) fn row_states_mut(&mut self) -> &mut RowStates {
        &mut self.row_states
    }
}

/// `["reset"]` or `["reset", query_config]`.
pub(crate) fn reset(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("reset", args);
    let query_config = match args.optional() {
        Some(Value::Object(config)) => config,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(QueryServerError::protocol(format!(
                "reset expects an object of query settings, got {other}"
            )));
        }
    };
    debug!(target: STATE_TARGET, settings = query_config.len(), "resetting state");
    worker.state_mut().reset(query_config);
    Ok(Value::Bool(true))
}

/// `["add_fun", source]`.
pub(crate) fn add_fun(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("add_fun", args);
    let source = args.string("source")?;
    let function = worker.compile_view(&source)?;
    worker.state_mut().push_function(source, function);
    debug!(
        target: STATE_TARGET,
        stored = worker.state().functions().len(),
        "added function"
    );
    Ok(Value::Bool(true))
}

/// `["add_lib", lib]`.
pub(crate) fn add_lib(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("add_lib", args);
    let lib = args.required("lib")?;
    debug!(target: STATE_TARGET, "replacing view library");
    worker.state_mut().set_view_lib(lib);
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Map, json};

    use super::QueryState;

    #[rstest]
    fn missing_functions_are_protocol_errors() {
        let state = QueryState::new();
        let error = state.function(0).expect_err("nothing stored");
        assert_eq!(error.error_id(), "query_protocol_error");
    }

    #[rstest]
    #[case(json!({"reduce_limit": true}), true)]
    #[case(json!({"reduce_limit": "true"}), true)]
    #[case(json!({"reduce_limit": false}), false)]
    #[case(json!({}), false)]
    fn reduce_limit_follows_truthiness(#[case] config: serde_json::Value, #[case] expected: bool) {
        let mut state = QueryState::new();
        let config: Map<_, _> = config.as_object().cloned().unwrap_or_default();
        state.reset(config);
        assert_eq!(state.reduce_limit(), expected);
    }

    #[rstest]
    fn reset_keeps_view_library() {
        let mut state = QueryState::new();
        state.set_view_lib(json!({"util": "source"}));
        state.reset(Map::new());
        assert_eq!(state.view_lib(), Some(&json!({"util": "source"})));
        assert_eq!(
            state.lib_doc().borrow().body(),
            &json!({"views": {"lib": {"util": "source"}}})
        );
    }

    #[rstest]
    fn lib_doc_is_rebuilt_after_add_lib() {
        let mut state = QueryState::new();
        let first = state.lib_doc();
        assert!(std::rc::Rc::ptr_eq(&first, &state.lib_doc()));
        state.set_view_lib(json!({"v": 2}));
        assert!(!std::rc::Rc::ptr_eq(&first, &state.lib_doc()));
    }

    #[rstest]
    fn superseded_libraries_live_until_reset() {
        let mut state = QueryState::new();
        state.set_view_lib(json!({"v": 1}));
        let first = std::rc::Rc::downgrade(&state.lib_doc());
        state.set_view_lib(json!({"v": 2}));
        assert!(first.upgrade().is_some());
        state.reset(Map::new());
        assert!(first.upgrade().is_none());
    }
}
