//! Lane Perception Core
//!
//! Control loop that pulls frames from a live camera or a stored sequence,
//! hands each one to lane detection, recovers from transient failures and
//! honors operator stop requests.

pub mod frames;
pub mod settings;
pub mod state_machine;
pub mod termination;

pub use frames::list_frames;
pub use settings::{ConfigError, PipelineConfig};
pub use state_machine::{
    ExitStatus, PerceptionError, PerceptionState, PerceptionStateMachine, RecoveryPolicy, RunReport, Transition,
};
pub use termination::{GuardError, TerminationGuard};

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log output format
pub const LOG_FORMAT_ENV: &str = "LANE_TRACKER_LOG_FORMAT";

/// Exit code used when the termination guard cannot be installed
pub const GUARD_FAILURE_EXIT_CODE: u8 = 255;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Read [`LOG_FORMAT_ENV`]; anything but `json` selects compact output
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Initialize logging. `RUST_LOG` overrides the default `info` level.
pub fn init_logging(format: LogFormat) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| e.to_string())
}
