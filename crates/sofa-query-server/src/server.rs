//! The read, dispatch, respond loop.

use std::io::{BufRead, Write};
use std::rc::Rc;

use serde_json::Value;
use sofa_config::Config;
use tracing::{error, info, warn};

use crate::bundle::Bundles;
use crate::codec::{Channel, JsonLines};
use crate::compiler::FunctionCompiler;
use crate::dispatch::{CommandTable, DISPATCH_TARGET, QueryRequest};
use crate::errors::{QueryServerError, Severity};
use crate::protocol::forbidden;
use crate::worker::{Worker, WorkerSettings};

/// How a serving loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The host closed its stream.
    Finished,
    /// A fatal condition stopped the loop after it was reported.
    Failed(QueryServerError),
}

impl ServeOutcome {
    /// Whether the loop ended without a fatal condition.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// A worker bound to the command table of its protocol revision.
pub struct QueryServer {
    worker: Worker,
    commands: CommandTable,
}

impl QueryServer {
    /// Builds a server from startup configuration.
    #[must_use]
    pub fn new(config: &Config, compiler: Rc<dyn FunctionCompiler>) -> Self {
        let bundles = Bundles::new(config.enable_bundles, config.bundle_cache.clone());
        Self::with_bundles(WorkerSettings::from(config), compiler, bundles)
    }

    /// Builds a server with explicit bundle handling.
    pub fn with_bundles(
        settings: WorkerSettings,
        compiler: Rc<dyn FunctionCompiler>,
        bundles: Bundles,
    ) -> Self {
        Self {
            commands: CommandTable::for_version(settings.version),
            worker: Worker::new(settings, compiler, bundles),
        }
    }

    /// Handler state.
    #[must_use]
    pub const fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Commands this server answers.
    #[must_use]
    pub const fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Dispatches one decoded message.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for malformed messages and whatever the
    /// handler raises.
    pub fn process_request(
        &mut self,
        channel: &mut dyn Channel,
        message: Value,
    ) -> Result<Value, QueryServerError> {
        let request = QueryRequest::parse(message)?;
        self.commands.dispatch(&mut self.worker, channel, request)
    }

    /// Serves JSON lines from `input` until it ends or a fatal condition.
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, output: W) -> ServeOutcome {
        let mut channel = JsonLines::new(input, output, self.worker.log().clone());
        self.serve_channel(&mut channel)
    }

    /// Serves messages from `channel` until it ends or a fatal condition.
    pub fn serve_channel(&mut self, channel: &mut dyn Channel) -> ServeOutcome {
        info!(target: DISPATCH_TARGET, version = %self.worker.version(), "serving requests");
        while let Some(received) = channel.receive() {
            let outcome = received.and_then(|message| self.process_request(channel, message));
            let response = match outcome {
                Ok(value) => value,
                Err(error) => match self.report(channel, error) {
                    Some(fatal) => return ServeOutcome::Failed(fatal),
                    None => continue,
                },
            };
            if let Err(error) = channel.respond(Some(&response)) {
                error!(target: DISPATCH_TARGET, %error, "failed to write response");
                return ServeOutcome::Failed(error);
            }
        }
        info!(target: DISPATCH_TARGET, "input closed");
        ServeOutcome::Finished
    }

    /// Answers a failed request; returns the error when the loop must stop.
    fn report(&self, channel: &mut dyn Channel, error: QueryServerError) -> Option<QueryServerError> {
        let style = self.worker.style();
        match error.severity() {
            Severity::Forbidden => {
                warn!(target: DISPATCH_TARGET, reason = %error.reason(), "access denied");
                let response = forbidden(&error.reason());
                channel.respond(Some(&response)).err()
            }
            Severity::Recoverable => {
                warn!(target: DISPATCH_TARGET, id = error.error_id(), reason = %error.reason(), "request failed");
                let response = style.error(error.error_id(), &error.reason());
                channel.respond(Some(&response)).err()
            }
            Severity::Fatal => {
                error!(target: DISPATCH_TARGET, id = error.error_id(), reason = %error.reason(), "fatal error");
                let response = style.condition(&error);
                if let Err(write_error) = channel.respond(Some(&response)) {
                    warn!(target: DISPATCH_TARGET, %write_error, "could not report fatal error");
                }
                Some(error)
            }
        }
    }
}
