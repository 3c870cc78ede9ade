//! Change filters and view-based filters.

use serde_json::{Value, json};
use tracing::debug;

use crate::args::{Args, is_truthy};
use crate::codec::Channel;
use crate::compiler::{QueryFunction, call_plain};
use crate::errors::QueryServerError;
use crate::protocol::FILTER_USERCTX_UNTIL;
use crate::views::map_one;
use crate::worker::Worker;

const FILTERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::filters");

fn run_filter(
    function: &dyn QueryFunction,
    docs: Vec<Value>,
    extra: &[Value],
) -> Result<Value, QueryServerError> {
    let mut verdicts = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(doc);
        args.extend_from_slice(extra);
        verdicts.push(Value::Bool(is_truthy(&call_plain(function, args)?)));
    }
    debug!(target: FILTERS_TARGET, function = function.name(), docs = verdicts.len(), "filtered");
    Ok(json!([true, verdicts]))
}

/// `["filter", docs, req, userctx]` using the first stored function.
pub(crate) fn filter(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("filter", args);
    let docs = args.array("docs")?;
    let request = args.required("req")?;
    let userctx = args.optional().unwrap_or_default();
    let function = worker.state().function(0)?;
    run_filter(function.as_ref(), docs, &[request, userctx])
}

/// ddoc `filters`: `[docs, req]`, plus `userctx` for hosts before 0.11.1.
pub(crate) fn ddoc_filters(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("filters", args);
    let docs = args.array("docs")?;
    let request = args.required("req")?;
    if worker.version() < FILTER_USERCTX_UNTIL {
        let userctx = args.optional().unwrap_or_default();
        run_filter(function, docs, &[request, userctx])
    } else {
        run_filter(function, docs, &[request])
    }
}

/// ddoc `views`: a document passes when the map function emits anything.
pub(crate) fn ddoc_views(
    _worker: &mut Worker,
    _channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("views", args);
    let docs = args.array("docs")?;
    let verdicts = docs
        .iter()
        .map(|doc| map_one(function, doc).map(|rows| Value::Bool(!rows.is_empty())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!([true, verdicts]))
}
