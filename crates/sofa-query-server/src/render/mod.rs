//! Show, list and update rendering.
//!
//! Render functions build a response from chunks sent with `send`, headers
//! set with `start`, their own return value, and optionally a builder chosen
//! by content negotiation. List functions additionally pull view rows from
//! the host through the same channel the dispatcher reads from.

mod rows;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::args::Args;
use crate::codec::Channel;
use crate::compiler::{Invocation, ProvidedBuilder, QueryFunction, RenderHooks};
use crate::errors::{FunctionError, QueryServerError};
use crate::mime::{MimeProvider, accept_header};
use crate::worker::Worker;

pub(crate) use rows::{RowStates, list_begin, list_row, list_tail};

const RENDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::render");

/// Render hooks backed by one render call.
pub(crate) struct Responder<'c> {
    rows: Option<&'c mut dyn Channel>,
    mime: MimeProvider<ProvidedBuilder>,
    chunks: Vec<String>,
    headers: Map<String, Value>,
    content_type: Option<String>,
    got_row: bool,
    last_row: bool,
}

impl<'c> Responder<'c> {
    /// Hooks for shows and updates; `get_row` is unavailable.
    pub(crate) fn new() -> Self {
        Self {
            rows: None,
            mime: MimeProvider::new(),
            chunks: Vec::new(),
            headers: Map::new(),
            content_type: None,
            got_row: false,
            last_row: false,
        }
    }

    /// Hooks for lists, pulling rows from `channel`.
    pub(crate) fn streaming(channel: &'c mut dyn Channel) -> Self {
        Self {
            rows: Some(channel),
            ..Self::new()
        }
    }

    fn call(
        &mut self,
        function: &dyn QueryFunction,
        args: Vec<Value>,
    ) -> Result<Value, FunctionError> {
        let mut invocation = Invocation::with_render(self);
        function.call(&mut invocation, args)
    }

    /// Runs the negotiated builder, remembering the chosen content type.
    fn run_provides(
        &mut self,
        request: &Value,
        default_key: Option<&str>,
    ) -> Result<Value, FunctionError> {
        let mut mime = std::mem::take(&mut self.mime);
        let outcome = mime.negotiate(request, default_key, |builder, content_type| {
            self.content_type = content_type;
            let mut invocation = Invocation::with_render(&mut *self);
            builder.run(&mut invocation)
        });
        self.mime = mime;
        outcome
    }

    fn take_chunks(&mut self) -> String {
        std::mem::take(&mut self.chunks).concat()
    }

    fn emit(&mut self, message: &Value) -> Result<(), QueryServerError> {
        match self.rows.as_deref_mut() {
            Some(channel) => channel.respond(Some(message)),
            None => Err(QueryServerError::render(
                "get_row() is only available in list functions",
            )),
        }
    }

    fn start_message(&mut self) -> Value {
        let mut headers = self.headers.clone();
        if let Some(content_type) = &self.content_type {
            headers
                .entry("Content-Type")
                .or_insert_with(|| Value::String(content_type.clone()));
        }
        json!(["start", self.take_chunks_list(), {"headers": headers}])
    }

    fn take_chunks_list(&mut self) -> Vec<String> {
        std::mem::take(&mut self.chunks)
    }
}

impl RenderHooks for Responder<'_> {
    fn start(&mut self, headers: Map<String, Value>) -> Result<(), QueryServerError> {
        if let Some((name, value)) = headers.iter().find(|(_, value)| !value.is_string()) {
            return Err(QueryServerError::render(format!(
                "header '{name}' must be a string, got {value}"
            )));
        }
        self.headers.extend(headers);
        Ok(())
    }

    fn send(&mut self, chunk: String) {
        self.chunks.push(chunk);
    }

    fn get_row(&mut self) -> Result<Option<Value>, QueryServerError> {
        if self.rows.is_none() {
            return Err(QueryServerError::render(
                "get_row() is only available in list functions",
            ));
        }
        if self.last_row {
            return Ok(None);
        }
        let message = if self.got_row {
            json!(["chunks", self.take_chunks_list()])
        } else {
            self.got_row = true;
            self.start_message()
        };
        self.emit(&message)?;

        let received = match self.rows.as_deref_mut().and_then(|channel| channel.receive()) {
            Some(received) => received?,
            None => {
                return Err(QueryServerError::fatal(
                    "list_error",
                    "input closed while waiting for a list row",
                ));
            }
        };
        match received.as_array().map(Vec::as_slice) {
            Some([command, row]) if command == "list_row" => Ok(Some(row.clone())),
            Some([command]) if command == "list_end" => {
                self.last_row = true;
                Ok(None)
            }
            _ => Err(QueryServerError::fatal(
                "list_error",
                format!("expected list_row or list_end, got {received}"),
            )),
        }
    }

    fn provides(&mut self, key: String, builder: ProvidedBuilder) {
        self.mime.provides(&key, builder);
    }

    fn register_type(&mut self, key: String, mimes: Vec<String>) {
        self.mime.register_type(&key, mimes);
    }

    fn response_with(
        &mut self,
        request: &Value,
        fallback: Option<&str>,
    ) -> Result<Value, FunctionError> {
        match self.run_provides(request, fallback) {
            Ok(value) => {
                let mut response = wrap_response(value)?;
                if let Some(content_type) = self.content_type.clone() {
                    set_header(&mut response, "Content-Type", content_type);
                }
                Ok(Value::Object(response))
            }
            Err(FunctionError::Raised(QueryServerError::NotAcceptable { .. })) => {
                let requested = accept_header(request)
                    .or_else(|| request.pointer("/query/format").and_then(Value::as_str))
                    .unwrap_or_default();
                Ok(json!({"code": 406, "body": format!("Not acceptable: {requested}")}))
            }
            Err(other) => Err(other),
        }
    }
}

/// Turns a render result into a response object: strings become bodies,
/// `null` an empty response.
fn wrap_response(value: Value) -> Result<Map<String, Value>, QueryServerError> {
    match value {
        Value::String(body) => {
            let mut response = Map::new();
            response.insert("body".into(), Value::String(body));
            Ok(response)
        }
        Value::Object(response) => Ok(response),
        Value::Null => Ok(Map::new()),
        other => Err(QueryServerError::render(format!(
            "render functions must return a string or an object, got {other}"
        ))),
    }
}

fn set_header(response: &mut Map<String, Value>, name: &str, value: String) {
    let headers = response
        .entry("headers")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(headers) = headers {
        headers.insert(name.to_owned(), Value::String(value));
    }
}

fn body_of(response: &Map<String, Value>) -> &str {
    response.get("body").and_then(Value::as_str).unwrap_or_default()
}

/// Renders a show function called as `(doc, req)`.
pub(crate) fn render_show(
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let request = args.get(1).cloned().unwrap_or_default();
    let mut responder = Responder::new();
    let returned = responder.call(function, args)?;
    let mut response = wrap_response(returned)?;
    let mut body = responder.take_chunks();
    body.push_str(body_of(&response));

    if responder.mime.is_provides_used() {
        let provided = responder.run_provides(&request, None)?;
        let provided_chunks = responder.take_chunks();
        match provided {
            Value::Object(replacement) => response = replacement,
            Value::String(text) => {
                body.push_str(&provided_chunks);
                body.push_str(&text);
                response.insert("body".into(), Value::String(body));
                if let Some(content_type) = responder.content_type.clone() {
                    set_header(&mut response, "Content-Type", content_type);
                }
            }
            other => {
                return Err(QueryServerError::render(format!(
                    "provided builders must return a string or an object, got {other}"
                )));
            }
        }
    } else {
        response.insert("body".into(), Value::String(body));
    }

    for (name, value) in std::mem::take(&mut responder.headers) {
        if let Value::String(value) = value {
            set_header(&mut response, &name, value);
        }
    }
    debug!(target: RENDER_TARGET, function = function.name(), "rendered show");
    Ok(json!(["resp", response]))
}

/// Renders a list function called as `(head, req)`, streaming rows.
pub(crate) fn render_list(
    function: &dyn QueryFunction,
    channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let request = args.get(1).cloned().unwrap_or_default();
    let mut responder = Responder::streaming(channel);
    let mut tail = responder.call(function, args)?;
    if responder.mime.is_provides_used() {
        tail = responder.run_provides(&request, None)?;
    }
    if !responder.got_row {
        responder.get_row()?;
    }
    match tail {
        Value::Null => {}
        Value::String(text) => responder.chunks.push(text),
        other => {
            return Err(QueryServerError::render(format!(
                "list functions must return a string, got {other}"
            )));
        }
    }
    debug!(target: RENDER_TARGET, function = function.name(), "rendered list");
    Ok(json!(["end", responder.take_chunks_list()]))
}

/// Runs an update function called as `(doc, req)`.
pub(crate) fn render_update(
    function: &dyn QueryFunction,
    args: Vec<Value>,
    allow_get: bool,
) -> Result<Value, QueryServerError> {
    let method = args
        .get(1)
        .and_then(|request| request.get("method"))
        .and_then(Value::as_str);
    if method == Some("GET") && !allow_get {
        return Err(QueryServerError::error(
            "method_not_allowed",
            "Update functions do not allow GET",
        ));
    }
    let mut responder = Responder::new();
    let returned = responder.call(function, args)?;
    let Value::Array(mut pair) = returned else {
        return Err(QueryServerError::render(
            "update functions must return [doc, response]",
        ));
    };
    if pair.len() != 2 {
        return Err(QueryServerError::render(
            "update functions must return [doc, response]",
        ));
    }
    let response = pair.pop().unwrap_or_default();
    let doc = pair.pop().unwrap_or_default();
    let mut response = wrap_response(response)?;
    let chunks = responder.take_chunks();
    if !chunks.is_empty() {
        let body = format!("{chunks}{}", body_of(&response));
        response.insert("body".into(), Value::String(body));
    }
    Ok(json!(["up", doc, response]))
}

/// Renders with `response_with` available and returns the bare response
/// object, as legacy hosts expect.
pub(crate) fn render_legacy(
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut responder = Responder::new();
    let returned = responder.call(function, args)?;
    let mut response = wrap_response(returned)?;
    let chunks = responder.take_chunks();
    if !chunks.is_empty() {
        let body = format!("{chunks}{}", body_of(&response));
        response.insert("body".into(), Value::String(body));
    }
    Ok(Value::Object(response))
}

/// `["show", source, doc, req]`.
pub(crate) fn show(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("show", args);
    let source = args.string("source")?;
    let function = worker.compile_plain(&source, "show")?;
    render_show(function.as_ref(), args.rest())
}

/// `["list", head, req]` using the first stored function.
pub(crate) fn list(
    worker: &mut Worker,
    channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let function = worker.state().function(0)?;
    render_list(function.as_ref(), channel, args)
}

/// `["update", source, doc, req]`.
pub(crate) fn update(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("update", args);
    let source = args.string("source")?;
    let function = worker.compile_plain(&source, "update")?;
    render_update(function.as_ref(), args.rest(), worker.allow_get_update())
}

/// `["show_doc", source, doc, req]`.
pub(crate) fn show_doc(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    let mut args = Args::new("show_doc", args);
    let source = args.string("source")?;
    let function = worker.compile_plain(&source, "show_doc")?;
    render_legacy(function.as_ref(), args.rest())
}

/// ddoc `shows`: `[doc, req]`.
pub(crate) fn ddoc_shows(
    _worker: &mut Worker,
    _channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    render_show(function, args)
}

/// ddoc `lists`: `[head, req]`, then rows on demand.
pub(crate) fn ddoc_lists(
    _worker: &mut Worker,
    channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    render_list(function, channel, args)
}

/// ddoc `updates`: `[doc, req]`.
pub(crate) fn ddoc_updates(
    worker: &mut Worker,
    _channel: &mut dyn Channel,
    function: &dyn QueryFunction,
    args: Vec<Value>,
) -> Result<Value, QueryServerError> {
    render_update(function, args, worker.allow_get_update())
}
