//! Shared fixtures for unit and behaviour tests.

use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::bundle::Bundles;
use crate::codec::Channel;
use crate::compiler::NativeCompiler;
use crate::errors::{FunctionError, QueryServerError};
use crate::worker::{Worker, WorkerSettings};

/// Replays queued host messages and records everything sent back.
#[derive(Debug, Default)]
pub(crate) struct ScriptedChannel {
    pub(crate) inbound: VecDeque<Value>,
    pub(crate) sent: Vec<Value>,
}

impl ScriptedChannel {
    pub(crate) fn with_messages(messages: impl IntoIterator<Item = Value>) -> Self {
        Self {
            inbound: messages.into_iter().collect(),
            sent: Vec::new(),
        }
    }
}

impl Channel for ScriptedChannel {
    fn receive(&mut self) -> Option<Result<Value, QueryServerError>> {
        self.inbound.pop_front().map(Ok)
    }

    fn respond(&mut self, value: Option<&Value>) -> Result<(), QueryServerError> {
        if let Some(value) = value {
            self.sent.push(value.clone());
        }
        Ok(())
    }
}

/// Functions referenced by the unit and behaviour tests, plus the builtin
/// reducers.
pub(crate) fn sample_compiler() -> NativeCompiler {
    let mut compiler = NativeCompiler::with_builtins();
    compiler
        .register("emit_id", |_scope, args| {
            Ok(json!([[args[0]["_id"], "bar"]]))
        })
        .register("emit_nothing", |_scope, _args| Ok(json!([])))
        .register("emit_scalar", |_scope, _args| Ok(json!(7)))
        .register("explode", |_scope, _args| {
            Err(FunctionError::fault("TypeError", "cannot read property"))
        })
        .register("sum_values", |_scope, args| {
            let total: i64 = args[1]
                .as_array()
                .map(|values| values.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            Ok(json!(total))
        })
        .register("is_even", |_scope, args| {
            Ok(json!(args[0]["n"].as_i64().is_some_and(|n| n % 2 == 0)))
        })
        .register("userctx_is_admin", |_scope, args| {
            let roles = args.get(2).and_then(|ctx| ctx.get("roles")).cloned();
            Ok(json!(roles.is_some_and(|roles| roles == json!(["_admin"]))))
        })
        .register("require_author", |_scope, args| {
            if args[0].get("author").is_none() {
                return Err(FunctionError::forbidden("documents need an author"));
            }
            if args[0]["author"] == json!("") {
                return Err(FunctionError::assertion("author must not be empty"));
            }
            Ok(Value::Null)
        })
        .register("detail", |scope, args| {
            scope.send("doc:")?;
            Ok(json!(args[0]["_id"]
                .as_str()
                .map(str::to_owned)
                .unwrap_or_default()))
        })
        .register("legacy_list", |scope, args| {
            if args[1]["reject"] == json!(true) {
                return Err(QueryServerError::render("row rejected").into());
            }
            match (&args[0], &args[1]) {
                (head, Value::Null) if !head.is_null() => scope.send("<ul>")?,
                (Value::Null, Value::Null) => scope.send("</ul>")?,
                (_, row) => scope.send(format!("<li>{}</li>", row["key"]))?,
            }
            Ok(json!({"info": args[3]}))
        })
        .register("lib_user", |scope, args| {
            let lib = scope.require("views/lib/answer")?;
            let answer = lib
                .get("value")
                .and_then(|export| export.as_value())
                .cloned()
                .unwrap_or_default();
            Ok(json!([[args[0]["_id"], answer]]))
        })
        .register("list_keys", |scope, _args| {
            while let Some(row) = scope.get_row()? {
                scope.send(row["key"].as_str().unwrap_or_default().to_owned())?;
            }
            Ok(json!("end"))
        })
        .register("bump", |_scope, args| {
            let mut doc = args[0].clone();
            doc["count"] = json!(doc["count"].as_i64().unwrap_or(0) + 1);
            Ok(json!([doc, "bumped"]))
        })
        .register("noisy", |scope, args| {
            scope.log(format!("mapping {}", args[0]["_id"].as_str().unwrap_or_default()));
            Ok(json!([]))
        })
        .register("answer_module", |scope, _args| {
            scope.export("value", json!(42));
            Ok(Value::Null)
        })
        .register("revised_answer_module", |scope, _args| {
            scope.export("value", json!(7));
            Ok(Value::Null)
        });
    compiler
}

/// A worker speaking `version` with the sample compiler.
pub(crate) fn worker_for(settings: WorkerSettings) -> Worker {
    Worker::new(settings, Rc::new(sample_compiler()), Bundles::disabled())
}
