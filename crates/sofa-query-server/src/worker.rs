//! Everything a handler can reach while serving one request.

use std::rc::Rc;

use sofa_config::{Config, ProtocolVersion};
use tracing::debug;

use crate::bundle::Bundles;
use crate::compiler::{Bindings, CompileOptions, FunctionCompiler, QueryFunction};
use crate::ddoc::{DDocCache, ModuleLoader, SharedDesignDoc};
use crate::errors::QueryServerError;
use crate::protocol::{LogSink, ResponseStyle, VIEW_LIBS_SINCE};
use crate::resolver::ModuleContext;
use crate::state::QueryState;

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

/// Settings that shape a worker, taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Protocol revision announced by the host.
    pub version: ProtocolVersion,
    /// Whether update functions accept `GET`.
    pub allow_get_update: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::LATEST,
            allow_get_update: false,
        }
    }
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            version: config.protocol_version(),
            allow_get_update: config.allow_get_update,
        }
    }
}

/// Compiler, caches and state shared by all handlers of one connection.
pub struct Worker {
    settings: WorkerSettings,
    log: LogSink,
    compiler: Rc<dyn FunctionCompiler>,
    bundles: Bundles,
    state: QueryState,
    ddocs: DDocCache,
}

impl Worker {
    /// Creates a worker with empty state.
    #[must_use]
    pub fn new(
        settings: WorkerSettings,
        compiler: Rc<dyn FunctionCompiler>,
        bundles: Bundles,
    ) -> Self {
        Self {
            log: LogSink::new(ResponseStyle::for_version(settings.version)),
            settings,
            compiler,
            bundles,
            state: QueryState::new(),
            ddocs: DDocCache::new(),
        }
    }

    /// Negotiated protocol revision.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.settings.version
    }

    /// Encoding for errors and log lines.
    #[must_use]
    pub const fn style(&self) -> ResponseStyle {
        self.log.style()
    }

    /// Sink that function log lines are queued on.
    #[must_use]
    pub const fn log(&self) -> &LogSink {
        &self.log
    }

    /// Whether update functions accept `GET`.
    #[must_use]
    pub const fn allow_get_update(&self) -> bool {
        self.settings.allow_get_update
    }

    /// Query state.
    #[must_use]
    pub const fn state(&self) -> &QueryState {
        &self.state
    }

    /// Mutable query state.
    pub fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    /// Cached design documents.
    #[must_use]
    pub const fn ddocs(&self) -> &DDocCache {
        &self.ddocs
    }

    /// Mutable design-document cache.
    pub fn ddocs_mut(&mut self) -> &mut DDocCache {
        &mut self.ddocs
    }

    /// Compiles a function that can log but not `require`.
    ///
    /// # Errors
    ///
    /// Propagates compilation failures.
    pub fn compile_plain(
        &self,
        source: &str,
        label: &str,
    ) -> Result<Rc<dyn QueryFunction>, QueryServerError> {
        self.compiler.compile(
            source,
            Bindings::new(self.log.clone()),
            &CompileOptions::labelled(label),
        )
    }

    /// Compiles a view function; from 1.1.0 on it may `require` from the
    /// view library.
    ///
    /// # Errors
    ///
    /// Propagates compilation failures.
    pub fn compile_view(&mut self, source: &str) -> Result<Rc<dyn QueryFunction>, QueryServerError> {
        if self.version() < VIEW_LIBS_SINCE {
            return self.compile_plain(source, "add_fun");
        }
        let doc = self.state.lib_doc();
        let bindings = self.loader(&doc).bindings_for(ModuleContext::default());
        let options = CompileOptions::in_ddoc(doc.borrow().id(), "add_fun");
        self.compiler.compile(source, bindings, &options)
    }

    /// Compiled function at `path` in `doc`, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns a resolution error for missing paths and propagates
    /// compilation failures.
    pub fn ddoc_function(
        &self,
        doc: &SharedDesignDoc,
        path: &[String],
    ) -> Result<Rc<dyn QueryFunction>, QueryServerError> {
        let key = path.join("/");
        if let Some(function) = doc.borrow().cached_function(&key) {
            return Ok(function);
        }
        let (source, options) = {
            let doc = doc.borrow();
            (doc.function_source(path)?, CompileOptions::in_ddoc(doc.id(), key.as_str()))
        };
        let bindings = self.loader(doc).bindings_for(ModuleContext::default());
        let function = self.compiler.compile(&source, bindings, &options)?;
        debug!(target: WORKER_TARGET, ddoc = %doc.borrow().id(), path = %key, "compiled design function");
        doc.borrow_mut().cache_function(key, Rc::clone(&function));
        Ok(function)
    }

    fn loader(&self, doc: &SharedDesignDoc) -> Rc<ModuleLoader> {
        ModuleLoader::new(
            doc,
            Rc::clone(&self.compiler),
            self.bundles.clone(),
            self.log.clone(),
        )
    }
}
