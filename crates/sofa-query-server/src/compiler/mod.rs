//! Seam between the server and the code that turns source text into
//! callable query functions.
//!
//! The server never interprets function source itself. It hands the text to
//! a [`FunctionCompiler`] together with [`Bindings`] (logging and, for
//! design-document functions, `require`) and receives a [`QueryFunction`].
//! During a call the function reaches those bindings, its exports table and
//! any render hooks through a [`Scope`].

mod builtins;
mod native;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::errors::{FunctionError, QueryServerError};
use crate::protocol::LogSink;

pub use native::{NativeBody, NativeCompiler};

/// Names exported by a module, in name order.
pub type ExportTable = BTreeMap<String, Export>;

/// Resolves a `require` path relative to the requiring function.
pub type RequireHook = Rc<dyn Fn(&str) -> Result<Rc<ExportTable>, QueryServerError>>;

/// Response builder registered through [`Scope::provides`].
pub type Builder = Box<dyn FnOnce(&mut Scope<'_, '_>) -> Result<Value, FunctionError>>;

/// Turns source text into a callable function.
pub trait FunctionCompiler {
    /// Compiles `source` with the ambient `bindings`.
    ///
    /// # Errors
    ///
    /// Returns a recoverable `compilation_error` when the source cannot be
    /// compiled.
    fn compile(
        &self,
        source: &str,
        bindings: Bindings,
        options: &CompileOptions,
    ) -> Result<Rc<dyn QueryFunction>, QueryServerError>;
}

/// A compiled query function.
pub trait QueryFunction {
    /// Label used in diagnostics.
    fn name(&self) -> &str;

    /// Invokes the function with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns whatever the function raised.
    fn call(&self, invocation: &mut Invocation<'_>, args: Vec<Value>)
    -> Result<Value, FunctionError>;
}

impl fmt::Debug for dyn QueryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryFunction").field(&self.name()).finish()
    }
}

/// Calls `function` without render hooks and discards its exports.
///
/// # Errors
///
/// Propagates the function's failure.
pub fn call_plain(function: &dyn QueryFunction, args: Vec<Value>) -> Result<Value, FunctionError> {
    let mut invocation = Invocation::new();
    function.call(&mut invocation, args)
}

/// Diagnostic context passed to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Where the source came from, e.g. `shows/detail` or `add_fun`.
    pub label: String,
    /// Owning design document, if any.
    pub ddoc_id: Option<String>,
}

impl CompileOptions {
    /// Options for a function without an owning design document.
    #[must_use]
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ddoc_id: None,
        }
    }

    /// Options for a function stored in a design document.
    #[must_use]
    pub fn in_ddoc(ddoc_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ddoc_id: Some(ddoc_id.into()),
        }
    }
}

/// Capabilities a compiled function is bound to at compile time.
#[derive(Clone)]
pub struct Bindings {
    log: LogSink,
    require: Option<RequireHook>,
}

impl Bindings {
    /// Bindings with logging only.
    #[must_use]
    pub fn new(log: LogSink) -> Self {
        Self { log, require: None }
    }

    /// Adds a `require` resolver.
    #[must_use]
    pub fn with_require(mut self, require: RequireHook) -> Self {
        self.require = Some(require);
        self
    }

    /// Logging capability.
    #[must_use]
    pub const fn log(&self) -> &LogSink {
        &self.log
    }

    /// Whether `require` is available.
    #[must_use]
    pub const fn can_require(&self) -> bool {
        self.require.is_some()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("log", &self.log)
            .field("require", &self.require.is_some())
            .finish()
    }
}

/// A value or function exported by a module.
#[derive(Clone)]
pub enum Export {
    /// Plain data.
    Value(Value),
    /// A callable.
    Function(Rc<dyn QueryFunction>),
}

impl Export {
    /// Returns the exported data, if this is not a function.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Function(_) => None,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Function(function) => f.debug_tuple("Function").field(&function.name()).finish(),
        }
    }
}

impl From<Value> for Export {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Rc<dyn QueryFunction>> for Export {
    fn from(function: Rc<dyn QueryFunction>) -> Self {
        Self::Function(function)
    }
}

/// Hooks available to show, list and update functions while they render.
pub trait RenderHooks {
    /// Records response headers; values must be strings.
    ///
    /// # Errors
    ///
    /// Returns `render_error` for non-string header values.
    fn start(&mut self, headers: Map<String, Value>) -> Result<(), QueryServerError>;

    /// Appends a body chunk.
    fn send(&mut self, chunk: String);

    /// Pulls the next view row; `None` once rows are exhausted.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside list rendering and `list_error` when
    /// the host answers with an unexpected message.
    fn get_row(&mut self) -> Result<Option<Value>, QueryServerError>;

    /// Registers a candidate builder for a representation key.
    fn provides(&mut self, key: String, builder: ProvidedBuilder);

    /// Registers MIME types for a representation key.
    fn register_type(&mut self, key: String, mimes: Vec<String>);

    /// Negotiates among the registered builders and wraps the result as a
    /// response object.
    ///
    /// # Errors
    ///
    /// Propagates builder failures.
    fn response_with(
        &mut self,
        request: &Value,
        fallback: Option<&str>,
    ) -> Result<Value, FunctionError>;
}

/// A builder together with the bindings of the function that registered it.
pub struct ProvidedBuilder {
    bindings: Bindings,
    body: Builder,
}

impl ProvidedBuilder {
    /// Pairs a builder with its bindings.
    #[must_use]
    pub fn new(bindings: Bindings, body: Builder) -> Self {
        Self { bindings, body }
    }

    /// Runs the builder once.
    ///
    /// # Errors
    ///
    /// Propagates the builder's failure.
    pub fn run(self, invocation: &mut Invocation<'_>) -> Result<Value, FunctionError> {
        let Self { bindings, body } = self;
        let mut scope = Scope::new(&bindings, invocation);
        body(&mut scope)
    }
}

impl fmt::Debug for ProvidedBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidedBuilder").finish_non_exhaustive()
    }
}

/// Per-call state: render hooks, if rendering, and the exports table.
#[derive(Default)]
pub struct Invocation<'a> {
    render: Option<&'a mut dyn RenderHooks>,
    exports: ExportTable,
}

impl<'a> Invocation<'a> {
    /// A call without render hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A call that may use render hooks.
    pub fn with_render(render: &'a mut dyn RenderHooks) -> Self {
        Self {
            render: Some(render),
            exports: ExportTable::new(),
        }
    }

    /// Consumes the call, returning what the function exported.
    #[must_use]
    pub fn into_exports(self) -> ExportTable {
        self.exports
    }
}

/// What a query function sees while it runs.
pub struct Scope<'s, 'a> {
    bindings: &'s Bindings,
    invocation: &'s mut Invocation<'a>,
}

impl<'s, 'a> Scope<'s, 'a> {
    /// Joins compile-time bindings with a call.
    #[must_use]
    pub fn new(bindings: &'s Bindings, invocation: &'s mut Invocation<'a>) -> Self {
        Self {
            bindings,
            invocation,
        }
    }

    /// Sends a message to the host log.
    pub fn log(&self, message: impl Into<Value>) {
        self.bindings.log.log(&message.into());
    }

    /// Imports the exports of another module in the same design document.
    ///
    /// # Errors
    ///
    /// Returns a resolution error for bad paths, cycles, or when the function
    /// was compiled without `require`.
    pub fn require(&self, path: &str) -> Result<Rc<ExportTable>, FunctionError> {
        let hook = self.bindings.require.as_ref().ok_or_else(|| {
            QueryServerError::resolution(format!(
                "require('{path}') is not available outside design documents"
            ))
        })?;
        Ok(hook(path)?)
    }

    /// Publishes a name in this call's exports table.
    pub fn export(&mut self, name: impl Into<String>, export: impl Into<Export>) {
        self.invocation.exports.insert(name.into(), export.into());
    }

    /// Calls a function exported by a required module.
    ///
    /// # Errors
    ///
    /// Faults when `name` is missing or is not a function; otherwise
    /// propagates the callee's failure.
    pub fn call_export(
        &mut self,
        exports: &ExportTable,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, FunctionError> {
        match exports.get(name) {
            Some(Export::Function(function)) => function.call(self.invocation, args),
            Some(Export::Value(_)) => Err(FunctionError::fault(
                "TypeError",
                format!("export '{name}' is not a function"),
            )),
            None => Err(FunctionError::fault(
                "ReferenceError",
                format!("module has no export '{name}'"),
            )),
        }
    }

    fn hooks(&mut self, operation: &str) -> Result<&mut (dyn RenderHooks + 'a), FunctionError> {
        match self.invocation.render.as_deref_mut() {
            Some(hooks) => Ok(hooks),
            None => Err(QueryServerError::render(format!(
                "{operation}() is only available while rendering"
            ))
            .into()),
        }
    }

    /// Sets response headers.
    ///
    /// # Errors
    ///
    /// Returns `render_error` unless `headers` is an object of strings.
    pub fn start(&mut self, headers: Value) -> Result<(), FunctionError> {
        let Value::Object(headers) = headers else {
            return Err(QueryServerError::render("start() expects an object of headers").into());
        };
        Ok(self.hooks("start")?.start(headers)?)
    }

    /// Appends a body chunk.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside rendering.
    pub fn send(&mut self, chunk: impl Into<String>) -> Result<(), FunctionError> {
        self.hooks("send")?.send(chunk.into());
        Ok(())
    }

    /// Pulls the next row while rendering a list.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside list rendering.
    pub fn get_row(&mut self) -> Result<Option<Value>, FunctionError> {
        Ok(self.hooks("get_row")?.get_row()?)
    }

    /// Registers a response builder for a representation key.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside rendering.
    pub fn provides<F>(&mut self, key: &str, builder: F) -> Result<(), FunctionError>
    where
        F: FnOnce(&mut Scope<'_, '_>) -> Result<Value, FunctionError> + 'static,
    {
        let provided = ProvidedBuilder::new(self.bindings.clone(), Box::new(builder));
        self.hooks("provides")?.provides(key.to_owned(), provided);
        Ok(())
    }

    /// Registers MIME types for a representation key.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside rendering.
    pub fn register_type(&mut self, key: &str, mimes: &[&str]) -> Result<(), FunctionError> {
        let mimes = mimes.iter().map(|mime| (*mime).to_owned()).collect();
        self.hooks("register_type")?.register_type(key.to_owned(), mimes);
        Ok(())
    }

    /// Picks a registered builder for `request` and returns its response.
    ///
    /// # Errors
    ///
    /// Returns `render_error` outside rendering and propagates builder
    /// failures.
    pub fn response_with(
        &mut self,
        request: &Value,
        fallback: Option<&str>,
    ) -> Result<Value, FunctionError> {
        self.hooks("response_with")?.response_with(request, fallback)
    }
}
