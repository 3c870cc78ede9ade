//! Termination signals.
//!
//! The host stops a worker by closing its input or by signalling it. Both are
//! a graceful end; only fatal protocol conditions produce a failing exit.

use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");

/// Blocks until the process should stop.
pub trait ShutdownSignal: Send + 'static {
    /// Returns the signal number once one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when listening is impossible.
    fn wait(self) -> Result<Option<i32>, ShutdownError>;
}

/// Errors reported while listening for signals.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Listens for `SIGINT` and `SIGTERM`.
pub struct SystemShutdownSignal {
    signals: Signals,
}

impl SystemShutdownSignal {
    /// Registers the handlers immediately so no signal is missed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals =
            Signals::new([SIGTERM, SIGINT]).map_err(|source| ShutdownError::Install { source })?;
        Ok(Self { signals })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(mut self) -> Result<Option<i32>, ShutdownError> {
        Ok(self.signals.forever().next())
    }
}

/// Runs `on_signal` on a background thread once `signal` fires.
pub fn watch<S, F>(signal: S, on_signal: F) -> thread::JoinHandle<()>
where
    S: ShutdownSignal,
    F: FnOnce(i32) + Send + 'static,
{
    thread::spawn(move || match signal.wait() {
        Ok(Some(number)) => {
            info!(target: SHUTDOWN_TARGET, signal = number, "shutdown signal received");
            on_signal(number);
        }
        Ok(None) => {}
        Err(error) => info!(target: SHUTDOWN_TARGET, %error, "signal watcher stopped"),
    })
}
