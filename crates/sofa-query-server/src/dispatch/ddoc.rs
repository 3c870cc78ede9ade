//! The `ddoc` command: caching design documents and calling their
//! functions.

use std::collections::BTreeMap;

use serde_json::Value;
use sofa_config::ProtocolVersion;
use tracing::debug;

use super::router::DISPATCH_TARGET;
use crate::args::Args;
use crate::codec::Channel;
use crate::compiler::QueryFunction;
use crate::errors::QueryServerError;
use crate::protocol::VIEW_LIBS_SINCE;
use crate::worker::Worker;
use crate::{filters, render, validate};

/// Handler for a function stored in a design document.
pub(crate) type DdocHandler = fn(
    &mut Worker,
    &mut dyn Channel,
    &dyn QueryFunction,
    Vec<Value>,
) -> Result<Value, QueryServerError>;

/// Sub-handlers keyed by the first segment of the function path.
#[derive(Debug)]
pub(crate) struct DdocRouter {
    handlers: BTreeMap<&'static str, DdocHandler>,
}

impl DdocRouter {
    pub(crate) fn for_version(version: ProtocolVersion) -> Self {
        let mut handlers: BTreeMap<&'static str, DdocHandler> = BTreeMap::new();
        handlers.insert("shows", render::ddoc_shows);
        handlers.insert("lists", render::ddoc_lists);
        handlers.insert("updates", render::ddoc_updates);
        handlers.insert("filters", filters::ddoc_filters);
        handlers.insert("validate_doc_update", validate::ddoc_validate);
        if version >= VIEW_LIBS_SINCE {
            handlers.insert("views", filters::ddoc_views);
        }
        Self { handlers }
    }

    #[must_use]
    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// `["ddoc", "new", id, body]` or `["ddoc", id, path, args]`.
    pub(crate) fn dispatch(
        &self,
        worker: &mut Worker,
        channel: &mut dyn Channel,
        args: Vec<Value>,
    ) -> Result<Value, QueryServerError> {
        let mut args = Args::new("ddoc", args);
        let target = args.string("id")?;
        if target == "new" {
            let id = args.string("id")?;
            let body = args.required("body")?;
            worker.ddocs_mut().insert(id, body);
            return Ok(Value::Bool(true));
        }

        let path = function_path(args.required("path")?)?;
        let call_args = args.array("args")?;
        let handler_name = path.first().map(String::as_str).unwrap_or_default();
        let Some(handler) = self.handlers.get(handler_name) else {
            return Err(QueryServerError::unknown_command(handler_name));
        };
        let doc = worker.ddocs().get(&target).ok_or_else(|| {
            QueryServerError::resolution(format!("design document '{target}' is not cached"))
        })?;
        let function = worker.ddoc_function(&doc, &path)?;
        debug!(
            target: DISPATCH_TARGET,
            ddoc = %target,
            path = %path.join("/"),
            "calling design function"
        );
        handler(worker, channel, function.as_ref(), call_args)
    }
}

/// Accepts `["shows", "detail"]` as well as `"shows/detail"`.
fn function_path(value: Value) -> Result<Vec<String>, QueryServerError> {
    let path: Vec<String> = match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(segment) => Ok(segment),
                other => Err(QueryServerError::protocol(format!(
                    "function path segments must be strings, got {other}"
                ))),
            })
            .collect::<Result<_, _>>()?,
        Value::String(path) => path.split('/').map(str::to_owned).collect(),
        other => {
            return Err(QueryServerError::protocol(format!(
                "function path must be an array or a string, got {other}"
            )));
        }
    };
    if path.is_empty() || path.iter().any(String::is_empty) {
        return Err(QueryServerError::protocol("function path must not be empty"));
    }
    Ok(path)
}
