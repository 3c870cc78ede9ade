//! Entry point for the `sofa-query-server` binary.

use std::io::{self, Write};
use std::process::{self, ExitCode};
use std::rc::Rc;

use sofa_config::Config;
use sofa_query_server::shutdown::{self, SystemShutdownSignal};
use sofa_query_server::{NativeCompiler, QueryServer, ServeOutcome, telemetry};
use tracing::{error, info, warn};

const MAIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::main");

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => error.exit(),
    };
    if let Err(error) = telemetry::initialise(&config) {
        let _ = writeln!(io::stderr().lock(), "sofa-query-server: {error}");
    }

    match SystemShutdownSignal::install() {
        Ok(signal) => {
            shutdown::watch(signal, |_| process::exit(0));
        }
        Err(error) => warn!(target: MAIN_TARGET, %error, "running without signal handlers"),
    }

    if config.enable_bundles {
        warn!(
            target: MAIN_TARGET,
            "bundles are enabled but this build has no bundle importer; bundle modules will fail"
        );
    }

    let mut server = QueryServer::new(&config, Rc::new(NativeCompiler::with_builtins()));
    info!(target: MAIN_TARGET, version = %config.protocol_version(), "query server started");
    match server.serve(io::stdin().lock(), io::stdout().lock()) {
        ServeOutcome::Finished => ExitCode::SUCCESS,
        ServeOutcome::Failed(failure) => {
            error!(target: MAIN_TARGET, %failure, "query server stopped");
            ExitCode::FAILURE
        }
    }
}
