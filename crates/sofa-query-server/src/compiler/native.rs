//! Compiler backed by Rust closures registered under their source text.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use super::{Bindings, CompileOptions, FunctionCompiler, Invocation, QueryFunction, Scope};
use crate::errors::{FunctionError, QueryServerError};

const COMPILER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::compiler");

/// Body of a natively implemented query function.
pub type NativeBody = Rc<dyn Fn(&mut Scope<'_, '_>, Vec<Value>) -> Result<Value, FunctionError>>;

/// Maps source text to Rust implementations.
///
/// Lookup ignores leading and trailing whitespace, so a design document may
/// indent or line-wrap the source text freely.
#[derive(Clone, Default)]
pub struct NativeCompiler {
    bodies: HashMap<String, NativeBody>,
}

impl NativeCompiler {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the `_sum`, `_count` and `_stats` reducers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut compiler = Self::new();
        super::builtins::register(&mut compiler);
        compiler
    }

    /// Registers `body` as the implementation of `source`.
    pub fn register<F>(&mut self, source: &str, body: F) -> &mut Self
    where
        F: Fn(&mut Scope<'_, '_>, Vec<Value>) -> Result<Value, FunctionError> + 'static,
    {
        self.bodies.insert(source.trim().to_owned(), Rc::new(body));
        self
    }

    /// Whether `source` has an implementation.
    pub fn knows(&self, source: &str) -> bool {
        self.bodies.contains_key(source.trim())
    }
}

impl fmt::Debug for NativeCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<_> = self.bodies.keys().collect();
        sources.sort();
        f.debug_struct("NativeCompiler").field("sources", &sources).finish()
    }
}

impl FunctionCompiler for NativeCompiler {
    fn compile(
        &self,
        source: &str,
        bindings: Bindings,
        options: &CompileOptions,
    ) -> Result<Rc<dyn QueryFunction>, QueryServerError> {
        let key = source.trim();
        let body = self.bodies.get(key).ok_or_else(|| {
            QueryServerError::error(
                "compilation_error",
                format!("no implementation registered for {}:\n{key}", options.label),
            )
        })?;
        debug!(
            target: COMPILER_TARGET,
            label = %options.label,
            ddoc = options.ddoc_id.as_deref().unwrap_or(""),
            "compiled function"
        );
        let name = if options.label.is_empty() {
            key.to_owned()
        } else {
            options.label.clone()
        };
        Ok(Rc::new(NativeFunction {
            name,
            bindings,
            body: Rc::clone(body),
        }))
    }
}

struct NativeFunction {
    name: String,
    bindings: Bindings,
    body: NativeBody,
}

impl QueryFunction for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        invocation: &mut Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<Value, FunctionError> {
        let mut scope = Scope::new(&self.bindings, invocation);
        (self.body)(&mut scope, args)
    }
}
