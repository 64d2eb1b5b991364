//! System signals that stop a running download.
//!
//! * Unix: Ctrl-C (SIGINT) and SIGTERM
//! * Windows: Ctrl-C only
//!
//! # Example
//!
//! ```no_run
//! use tunefetch::signal::Handler;
//!
//! async fn example() {
//!     let mut signals = Handler::new().unwrap();
//!     let signal = signals.recv().await;
//!     println!("stopping on {signal}");
//! }
//! ```

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signal that asked the process to stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[expect(clippy::module_name_repetitions)]
pub enum ShutdownSignal {
    /// Interrupt signal (Ctrl-C/SIGINT)
    Interrupt,
    /// Termination signal (SIGTERM)
    Terminate,
}

/// Waits for shutdown signals.
///
/// Register the handler before starting work, so that a signal arriving
/// early is not lost.
pub struct Handler {
    #[cfg(unix)]
    sigterm: Signal,
}

impl Handler {
    /// Registers the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    ///
    /// On Windows, this only waits for Ctrl-C.
    pub async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                _ = self.sigterm.recv() => ShutdownSignal::Terminate,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            ShutdownSignal::Interrupt
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "Ctrl+C"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}
