//! Document update validation.

use serde_json::Value;
use tracing::warn;

use crate::args::Args;
use crate::codec::Channel;
use crate::compiler::{QueryFunction, call_plain};
use crate::errors::QueryServerError;
use crate::worker::Worker;

const VALIDATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::validate");

/// Calls a validation function; `1` means the update may proceed.
fn run_validate(function: &dyn QueryFunction, args: Vec<Value>) -> Result<Value, QueryServerError> {
    let userctx = args.get(2).cloned().unwrap_or_default();
    match call_plain(function, args) {
        Ok(_) => Ok(Value::from(1)),
        Err(error) => {
            let error = error.into_validation_error();
            if let QueryServerError::Forbidden { reason } = &error {
                warn!(
                    target: VALIDATE_TARGET,
                    function = function.name(),
                    %reason,
                    %userctx,
                    "update denied"
                );
            }
            Err(error)
        }
    }
}

/// `["validate", source, newdoc, olddoc, userctx]`.
pub(crate) fn validate(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("validate", args);
    let source = args.string("source")?;
    let new_doc = args.required("newdoc")?;
    let old_doc = args.required("olddoc")?;
    let userctx = args.required("userctx")?;
    let function = worker.compile_plain(&source, "validate")?;
    run_validate(function.as_ref(), vec![new_doc, old_doc, userctx])
}

/// ddoc `validate_doc_update`: `[newdoc, olddoc, userctx]` and, from hosts
/// that send one, the security object.
pub(crate) fn ddoc_validate(
    _worker: &mut Worker,
    _channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("validate_doc_update", args);
    let mut call_args = vec![
        args.required("newdoc")?,
        args.required("olddoc")?,
        args.required("userctx")?,
    ];
    call_args.extend(args.optional());
    run_validate(function, call_args)
}
