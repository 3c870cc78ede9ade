//! Version-gated command table.

use std::collections::BTreeMap;

use serde_json::Value;
use sofa_config::ProtocolVersion;
use tracing::debug;

use super::ddoc::DdocRouter;
use super::request::QueryRequest;
use crate::codec::Channel;
use crate::errors::QueryServerError;
use crate::protocol::{DDOC_COMMAND_SINCE, RENDER_COMMANDS_SINCE, VIEW_LIBS_SINCE};
use crate::worker::Worker;
use crate::{filters, render, state, validate, views};

/// Tracing target for dispatch operations.
pub const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// A top-level command handler. The channel is passed through for handlers
/// that talk to the host mid-request.
pub type Handler =
    fn(&mut Worker, &mut dyn Channel, Vec<Value>) -> Result<Value, QueryServerError>;

/// Commands available for one protocol revision.
#[derive(Debug)]
pub struct CommandTable {
    version: ProtocolVersion,
    commands: BTreeMap<&'static str, Handler>,
    ddoc: Option<DdocRouter>,
}

impl CommandTable {
    /// Builds the table for `version`.
    #[must_use]
    pub fn for_version(version: ProtocolVersion) -> Self {
        let mut commands: BTreeMap<&'static str, Handler> = BTreeMap::new();
        commands.insert("reset", state::reset);
        commands.insert("add_fun", state::add_fun);
        commands.insert("map_doc", views::map_doc);
        commands.insert("reduce", views::reduce);
        commands.insert("rereduce", views::rereduce);

        if version >= VIEW_LIBS_SINCE {
            commands.insert("add_lib", state::add_lib);
        }
        if version < RENDER_COMMANDS_SINCE {
            commands.insert("show_doc", render::show_doc);
            commands.insert("list_begin", render::list_begin);
            commands.insert("list_row", render::list_row);
            commands.insert("list_tail", render::list_tail);
            commands.insert("validate", validate::validate);
        } else if version < DDOC_COMMAND_SINCE {
            commands.insert("show", render::show);
            commands.insert("list", render::list);
            commands.insert("update", render::update);
            commands.insert("filter", filters::filter);
            commands.insert("validate", validate::validate);
        }

        let ddoc = (version >= DDOC_COMMAND_SINCE).then(|| DdocRouter::for_version(version));
        debug!(
            target: DISPATCH_TARGET,
            %version,
            commands = commands.len() + usize::from(ddoc.is_some()),
            "built command table"
        );
        Self {
            version,
            commands,
            ddoc,
        }
    }

    /// Revision the table was built for.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Whether `command` is available.
    #[must_use]
    pub fn contains(&self, command: &str) -> bool {
        self.commands.contains_key(command) || (command == "ddoc" && self.ddoc.is_some())
    }

    /// Available command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        if self.ddoc.is_some() {
            names.push("ddoc");
            names.sort_unstable();
        }
        names
    }

    /// Design-document sub-handlers, empty before 0.11.0.
    #[must_use]
    pub fn ddoc_handlers(&self) -> Vec<&'static str> {
        self.ddoc.as_ref().map(DdocRouter::names).unwrap_or_default()
    }

    /// Runs the handler for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryServerError::UnknownCommand`] for commands outside the
    /// table and whatever the handler raises.
    pub fn dispatch(
        &self,
        worker: &mut Worker,
        channel: &mut dyn Channel,
        request: QueryRequest,
    ) -> Result<Value, QueryServerError> {
        let (command, args) = request.into_parts();
        debug!(target: DISPATCH_TARGET, command = %command, args = args.len(), "dispatching");
        if command == "ddoc" {
            if let Some(router) = &self.ddoc {
                return router.dispatch(worker, channel, args);
            }
        }
        match self.commands.get(command.as_str()) {
            Some(handler) => handler(worker, channel, args),
            None => Err(QueryServerError::unknown_command(command)),
        }
    }
}
