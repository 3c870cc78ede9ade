//! Map and reduce handlers.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::args::Args;
use crate::codec::Channel;
use crate::compiler::{QueryFunction, call_plain};
use crate::errors::QueryServerError;
use crate::worker::Worker;

const VIEWS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::views");

/// Reductions shorter than this are never treated as overflowing.
const REDUCE_OVERFLOW_FLOOR: usize = 200;

/// Runs `function` against its own copy of `doc` and checks that it
/// produced a list of emitted rows.
pub(crate) fn map_one(function: &dyn QueryFunction, doc: &Value) -> Result<Vec<Value>, QueryServerError> {
    match call_plain(function, vec![doc.clone()])? {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(QueryServerError::error(
            "map_error",
            format!("map function '{}' must emit a list of rows, got {other}", function.name()),
        )),
    }
}

/// `["map_doc", doc]`.
pub(crate) fn map_doc(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("map_doc", args);
    let doc = args.required("doc")?;
    let doc_id = doc.get("_id").and_then(Value::as_str).unwrap_or_default();
    debug!(target: VIEWS_TARGET, doc = %doc_id, functions = worker.state().functions().len(), "mapping document");

    let mut results = Vec::with_capacity(worker.state().functions().len());
    for (index, function) in worker.state().functions().iter().enumerate() {
        let rows = map_one(function.as_ref(), &doc).inspect_err(|error| {
            warn!(
                target: VIEWS_TARGET,
                doc = %doc_id,
                source = worker.state().source(index).unwrap_or_default(),
                %error,
                "map function failed"
            );
        })?;
        results.push(Value::Array(rows));
    }
    Ok(Value::Array(results))
}

/// `["reduce", sources, [[key, value], ...]]`.
pub(crate) fn reduce(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("reduce", args);
    let sources = args.array("sources")?;
    let kvs = args.array("kvs")?;
    let input_len = encoded_len(&Value::Array(kvs.clone()))?;

    let (keys, values): (Vec<Value>, Vec<Value>) = kvs
        .into_iter()
        .map(|pair| match pair {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or_default();
                let key = pair.pop().unwrap_or_default();
                Ok((key, value))
            }
            other => Err(QueryServerError::protocol(format!(
                "reduce expects [key, value] pairs, got {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unzip();

    run_reductions(worker, &sources, Value::Array(keys), values, false, input_len)
}

/// `["rereduce", sources, values]`.
pub(crate) fn rereduce(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("rereduce", args);
    let sources = args.array("sources")?;
    let values = args.array("values")?;
    let input_len = encoded_len(&Value::Array(values.clone()))?;
    run_reductions(worker, &sources, Value::Null, values, true, input_len)
}

fn run_reductions(
    worker: &Worker,
    sources: &[Value],
    keys: Value,
    values: Vec<Value>,
    rereduce: bool,
    input_len: usize,
) -> Result<Value, QueryServerError> {
    let mut reductions = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.as_str().ok_or_else(|| {
            QueryServerError::protocol(format!("reduce sources must be strings, got {source}"))
        })?;
        let function = worker.compile_plain(source, "reduce")?;
        let args = vec![keys.clone(), Value::Array(values.clone()), Value::Bool(rereduce)];
        reductions.push(call_plain(function.as_ref(), args)?);
    }
    debug!(target: VIEWS_TARGET, rereduce, count = reductions.len(), "reduced");

    let reductions = Value::Array(reductions);
    if worker.state().reduce_limit() {
        check_overflow(&reductions, input_len)?;
    }
    Ok(json!([true, reductions]))
}

fn encoded_len(value: &Value) -> Result<usize, QueryServerError> {
    serde_json::to_string(value)
        .map(|text| text.len())
        .map_err(|error| QueryServerError::encode(error.to_string()))
}

/// Rejects reductions that grow instead of shrinking their input.
fn check_overflow(reductions: &Value, input_len: usize) -> Result<(), QueryServerError> {
    let reduced_len = encoded_len(reductions)?;
    if reduced_len > REDUCE_OVERFLOW_FLOOR && reduced_len * 2 > input_len {
        warn!(target: VIEWS_TARGET, reduced_len, input_len, "reduce output overflow");
        return Err(QueryServerError::error(
            "reduce_overflow_error",
            format!(
                "Reduce output must shrink more rapidly: reduced {input_len} bytes of input to {reduced_len} bytes"
            ),
        ));
    }
    Ok(())
}
