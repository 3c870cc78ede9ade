//! Worker process that runs design-document query functions for a document
//! database.
//!
//! The host starts the worker, announces nothing further about itself and
//! then writes one JSON array per line to the worker's standard input. The
//! worker answers every request with exactly one JSON line on standard
//! output. Function log messages travel on the same stream, ahead of the
//! response they belong to.
//!
//! The crate is organised around three engines:
//!
//! - [`dispatch`] builds a command table for the protocol revision the host
//!   speaks and routes messages to handlers, including the `ddoc`
//!   sub-commands for functions stored in design documents.
//! - [`resolver`] and [`ddoc`] implement `require`: paths relative to the
//!   requiring function, per-document module caches and cycle detection.
//! - [`mime`] selects among the response builders a render function
//!   registered with `provides`, using the `format` query parameter or the
//!   `Accept` header.
//!
//! Function source text is never interpreted here. A [`compiler::FunctionCompiler`]
//! turns it into callables; [`compiler::NativeCompiler`] maps source text to
//! Rust closures and ships the builtin `_sum`, `_count` and `_stats`
//! reducers.

pub mod args;
pub mod bundle;
pub mod codec;
pub mod compiler;
pub mod ddoc;
pub mod dispatch;
pub mod errors;
mod filters;
pub mod mime;
pub mod protocol;
mod render;
pub mod resolver;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod telemetry;
mod validate;
mod views;
pub mod worker;

pub use bundle::{BundleImporter, Bundles};
pub use codec::{Channel, JsonLines};
pub use compiler::{FunctionCompiler, NativeCompiler, QueryFunction};
pub use errors::{FunctionError, QueryServerError, Severity};
pub use server::{QueryServer, ServeOutcome};
pub use worker::{Worker, WorkerSettings};

#[cfg(test)]
mod tests;
