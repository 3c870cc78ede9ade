//! Cached design documents and the `require` machinery bound to them.
//!
//! Each cached document keeps its body untouched next to two memo tables:
//! compiled entry points keyed by function path and executed modules keyed
//! by module id. Modules currently being executed are tracked so a module
//! that requires itself, directly or through others, fails instead of
//! recursing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::debug;

use crate::bundle::Bundles;
use crate::compiler::{
    Bindings, CompileOptions, ExportTable, FunctionCompiler, Invocation, QueryFunction,
};
use crate::errors::QueryServerError;
use crate::protocol::LogSink;
use crate::resolver::{self, ModuleContext};

const DDOC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ddoc");

/// Shared handle to a cached design document.
pub type SharedDesignDoc = Rc<RefCell<DesignDoc>>;

/// A design document body plus the compiled state derived from it.
#[derive(Debug)]
pub struct DesignDoc {
    id: String,
    body: Value,
    functions: HashMap<String, Rc<dyn QueryFunction>>,
    modules: HashMap<String, Rc<ExportTable>>,
    loading: Vec<String>,
}

impl DesignDoc {
    /// Wraps a document body.
    #[must_use]
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
            functions: HashMap::new(),
            modules: HashMap::new(),
            loading: Vec::new(),
        }
    }

    /// Document id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Document body as received from the host.
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    /// Source text stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns a resolution error when the path is missing or does not end
    /// in a string.
    pub fn function_source(&self, path: &[String]) -> Result<String, QueryServerError> {
        path.iter()
            .try_fold(&self.body, |node, key| node.get(key.as_str()))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                QueryServerError::resolution(format!(
                    "missing function '{}' in design document '{}'",
                    path.join("/"),
                    self.id
                ))
            })
    }

    /// Previously compiled entry point at `path`.
    #[must_use]
    pub fn cached_function(&self, path: &str) -> Option<Rc<dyn QueryFunction>> {
        self.functions.get(path).cloned()
    }

    /// Memoises a compiled entry point.
    pub fn cache_function(&mut self, path: impl Into<String>, function: Rc<dyn QueryFunction>) {
        self.functions.insert(path.into(), function);
    }

    /// Number of memoised modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

/// Design documents announced by the host, by id.
#[derive(Debug, Default)]
pub struct DDocCache {
    docs: HashMap<String, SharedDesignDoc>,
}

impl DDocCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `body` under `id`, discarding compiled state of any previous
    /// version.
    pub fn insert(&mut self, id: impl Into<String>, body: Value) -> SharedDesignDoc {
        let id = id.into();
        debug!(target: DDOC_TARGET, ddoc = %id, "caching design document");
        let doc = Rc::new(RefCell::new(DesignDoc::new(id.clone(), body)));
        self.docs.insert(id, Rc::clone(&doc));
        doc
    }

    /// Looks up a cached document.
    pub fn get(&self, id: &str) -> Option<SharedDesignDoc> {
        self.docs.get(id).cloned()
    }

    /// Number of cached documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Compiles and executes modules of one design document on `require`.
///
/// The loader holds the document weakly: compiled functions keep loaders
/// alive through their bindings, and the document keeps those functions.
pub struct ModuleLoader {
    doc: Weak<RefCell<DesignDoc>>,
    compiler: Rc<dyn FunctionCompiler>,
    bundles: Bundles,
    log: LogSink,
}

impl ModuleLoader {
    /// Creates a loader for `doc`.
    #[must_use]
    pub fn new(
        doc: &SharedDesignDoc,
        compiler: Rc<dyn FunctionCompiler>,
        bundles: Bundles,
        log: LogSink,
    ) -> Rc<Self> {
        Rc::new(Self {
            doc: Rc::downgrade(doc),
            compiler,
            bundles,
            log,
        })
    }

    /// Bindings for a function positioned at `from`; its `require` resolves
    /// relative to the container of `from`.
    pub fn bindings_for(self: &Rc<Self>, from: ModuleContext) -> Bindings {
        let loader = Rc::clone(self);
        Bindings::new(self.log.clone())
            .with_require(Rc::new(move |path: &str| loader.require(path, &from)))
    }

    /// Resolves `path`, executing the module on first use.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for bad paths and cycles, and propagates
    /// compile, bundle and execution failures.
    pub fn require(
        self: &Rc<Self>,
        path: &str,
        from: &ModuleContext,
    ) -> Result<Rc<ExportTable>, QueryServerError> {
        let doc = self.doc.upgrade().ok_or_else(|| {
            QueryServerError::resolution("design document is no longer cached")
        })?;
        let start = from.parent().cloned().unwrap_or_default();

        let (module, id, source) = {
            let state = doc.borrow();
            let module = resolver::resolve(path, start, &state.body)?;
            let id = module.id().unwrap_or_default().to_owned();
            if let Some(exports) = state.modules.get(&id) {
                debug!(target: DDOC_TARGET, module = %id, "module cache hit");
                return Ok(Rc::clone(exports));
            }
            if state.loading.contains(&id) {
                let mut chain = state.loading.clone();
                chain.push(id.clone());
                return Err(QueryServerError::resolution(format!(
                    "circular require in design document '{}': {}",
                    state.id,
                    chain.join(" -> ")
                )));
            }
            let source = module
                .current(&state.body)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            (module, id, source)
        };

        doc.borrow_mut().loading.push(id.clone());
        let loaded = self.load(&doc, &module, &id, &source);
        doc.borrow_mut().loading.retain(|loading| loading != &id);

        let exports = Rc::new(loaded?);
        doc.borrow_mut().modules.insert(id, Rc::clone(&exports));
        Ok(exports)
    }

    fn load(
        self: &Rc<Self>,
        doc: &SharedDesignDoc,
        module: &ModuleContext,
        id: &str,
        source: &str,
    ) -> Result<ExportTable, QueryServerError> {
        if self.bundles.applies_to(source) {
            debug!(target: DDOC_TARGET, module = %id, "importing bundle module");
            return self.bundles.import(source);
        }
        let options = CompileOptions::in_ddoc(doc.borrow().id.clone(), id);
        let function = self
            .compiler
            .compile(source, self.bindings_for(module.clone()), &options)?;
        debug!(target: DDOC_TARGET, module = %id, "executing module");
        let mut invocation = Invocation::new();
        function.call(&mut invocation, Vec::new())?;
        Ok(invocation.into_exports())
    }
}

#[cfg(test)]
mod tests;
