//! Operator stop requests
//!
//! [`TerminationGuard`] is a shared, write-once flag. The interrupt and
//! termination handlers installed by [`TerminationGuard::install`] flip it
//! from running to stop-requested; the control loop polls it with
//! [`TerminationGuard::is_stop_requested`]. Tests build a
//! [`TerminationGuard::detached`] guard and call
//! [`TerminationGuard::request_stop`] directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

/// Guard installation failure. Fatal before any device is opened.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Failed to install termination signal handlers: {0}")]
    SigInit(#[from] ctrlc::Error),
}

/// Cloneable handle to the process stop flag
#[derive(Debug, Clone, Default)]
pub struct TerminationGuard {
    stop: Arc<AtomicBool>,
}

impl TerminationGuard {
    /// A guard not connected to any OS signal
    pub fn detached() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGTERM handlers that request a stop.
    ///
    /// Handlers can be installed once per process; a second call fails.
    pub fn install() -> Result<Self, GuardError> {
        let guard = Self::detached();
        let handle = guard.clone();
        ctrlc::set_handler(move || {
            if handle.request_stop() {
                info!("Termination requested, stopping after the current frame");
            } else {
                warn!("Termination already requested");
            }
        })?;
        Ok(guard)
    }

    /// Move from running to stop-requested.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn request_stop(&self) -> bool {
        self.stop
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Non-blocking, lock-free status query
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}
