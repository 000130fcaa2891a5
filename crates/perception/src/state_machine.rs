//! Perception control loop
//!
//! ```text
//! INIT ──ok──▶ CAPTURING ──frame──▶ PROCESSING ──ok──▶ CAPTURING
//!  │              │  │                  │   └──stop──▶ SHUTTING_DOWN
//!  │              │  └──end of stream──────────────────▶ SHUTTING_DOWN
//!  │              └──capture failure──▶ RECOVERING ◀──detection failure
//!  │                                     │  ├──retry──▶ CAPTURING
//!  │                                     │  └──stop / exhausted──▶ SHUTTING_DOWN
//!  └──init failure──▶ TERMINATED ◀──────────────────── SHUTTING_DOWN
//! ```
//!
//! The machine owns the frame source, the camera model and the detector for
//! its whole lifetime. The termination guard is polled once per processed
//! frame and once per recovery, never inside a detection call.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use adas::{AdasError, LaneDetect, LaneState};
use camera_capture::{CameraError, FrameEvent, FrameSource, VideoFrame};
use camera_geometry::{CameraInitError, CameraModel};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::TerminationGuard;

/// Lifecycle phase of the perception loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerceptionState {
    Init,
    Capturing,
    Processing,
    Recovering,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for PerceptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerceptionState::Init => "INIT",
            PerceptionState::Capturing => "CAPTURING",
            PerceptionState::Processing => "PROCESSING",
            PerceptionState::Recovering => "RECOVERING",
            PerceptionState::ShuttingDown => "SHUTTING_DOWN",
            PerceptionState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// One edge taken by the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PerceptionState,
    pub to: PerceptionState,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Stream ended or an operator stop was honored
    Success,
    /// Camera model or frame source could not be initialized
    InitFailure,
    /// Too many consecutive capture or detection failures
    RecoveryExhausted,
}

impl ExitStatus {
    /// Process exit code
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::InitFailure => 1,
            ExitStatus::RecoveryExhausted => 2,
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitStatus::Success
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// Failures observed by the loop
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Frame source initialization failed: {0}")]
    SourceInit(#[source] CameraError),

    #[error("Camera initialization failed: {0}")]
    CameraInit(#[from] CameraInitError),

    #[error("Frame source not ready: {0}")]
    SourceNotReady(String),

    #[error("Capture failure: {0}")]
    Capture(#[from] CameraError),

    #[error("Detection failure: {0}")]
    Detection(#[from] AdasError),
}

impl PerceptionError {
    /// Failures that route through RECOVERING rather than INIT
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PerceptionError::Capture(_) | PerceptionError::Detection(_))
    }
}

/// Bounded retry policy for capture and detection failures
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Consecutive failures tolerated before giving up. Zero gives up on
    /// the first failure.
    pub retry_budget: u32,

    /// Pause before returning to CAPTURING
    pub backoff: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            backoff: Duration::ZERO,
        }
    }
}

/// Summary of a finished run
#[derive(Debug)]
pub struct RunReport {
    pub status: ExitStatus,

    /// Frames that made it through detection
    pub frames_processed: u64,

    /// Times RECOVERING was entered
    pub recoveries: u32,

    /// True when the run ended because of the termination guard
    pub stop_requested: bool,

    /// Output of the most recent successful detection
    pub last_detection: Option<LaneState>,

    /// Most recent failure, if any
    pub last_failure: Option<PerceptionError>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            status: ExitStatus::Success,
            frames_processed: 0,
            recoveries: 0,
            stop_requested: false,
            last_detection: None,
            last_failure: None,
        }
    }
}

/// The perception loop.
///
/// Construction never fails: initialization errors from the camera model or
/// the frame source are carried into INIT and end the run there with
/// [`ExitStatus::InitFailure`].
pub struct PerceptionStateMachine<D: LaneDetect> {
    state: PerceptionState,
    source: Option<Box<dyn FrameSource>>,
    camera: Option<Arc<CameraModel>>,
    init_errors: Vec<PerceptionError>,
    detector: D,
    policy: RecoveryPolicy,
    consecutive_failures: u32,
}

impl<D: LaneDetect> PerceptionStateMachine<D> {
    pub fn new<S>(
        source: Result<S, CameraError>,
        camera: Result<CameraModel, CameraInitError>,
        detector: D,
        policy: RecoveryPolicy,
    ) -> Self
    where
        S: FrameSource + 'static,
    {
        let mut init_errors = Vec::new();

        let camera = match camera {
            Ok(camera) => Some(Arc::new(camera)),
            Err(e) => {
                init_errors.push(PerceptionError::CameraInit(e));
                None
            }
        };

        let source = match source {
            Ok(source) => Some(Box::new(source) as Box<dyn FrameSource>),
            Err(e) => {
                init_errors.push(PerceptionError::SourceInit(e));
                None
            }
        };

        Self {
            state: PerceptionState::Init,
            source,
            camera,
            init_errors,
            detector,
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> PerceptionState {
        self.state
    }

    pub fn camera(&self) -> Option<&Arc<CameraModel>> {
        self.camera.as_ref()
    }

    /// Drive the machine to TERMINATED
    pub fn run(self, guard: &TerminationGuard) -> RunReport {
        self.run_observed(guard, |_| {})
    }

    /// Drive the machine to TERMINATED, reporting every transition
    pub fn run_observed<F>(mut self, guard: &TerminationGuard, mut observer: F) -> RunReport
    where
        F: FnMut(Transition),
    {
        let mut report = RunReport::new();
        let mut pending: Option<VideoFrame> = None;

        while self.state != PerceptionState::Terminated {
            let next = match self.state {
                PerceptionState::Init => self.initialize(&mut report),
                PerceptionState::Capturing => self.capture(&mut pending, &mut report),
                PerceptionState::Processing => self.process(pending.take(), guard, &mut report),
                PerceptionState::Recovering => self.recover(guard, &mut report),
                PerceptionState::ShuttingDown => {
                    self.release_resources();
                    PerceptionState::Terminated
                }
                PerceptionState::Terminated => break,
            };

            let transition = Transition {
                from: self.state,
                to: next,
            };
            debug!("State transition {} -> {}", transition.from, transition.to);
            observer(transition);
            self.state = next;
        }

        info!(
            "Perception loop terminated: {:?} (exit code {}), {} frames processed, {} recoveries",
            report.status,
            report.status.code(),
            report.frames_processed,
            report.recoveries
        );
        report
    }

    fn initialize(&mut self, report: &mut RunReport) -> PerceptionState {
        if !self.init_errors.is_empty() {
            for e in &self.init_errors {
                error!("{}", e);
            }
            report.last_failure = self.init_errors.pop();
            return self.abort_init(report);
        }

        let (Some(source), Some(camera)) = (self.source.as_ref(), self.camera.as_ref()) else {
            return self.abort_init(report);
        };

        if !source.is_ready() {
            let e = PerceptionError::SourceNotReady(source.describe());
            error!("{}", e);
            report.last_failure = Some(e);
            return self.abort_init(report);
        }

        info!("{}", camera);
        info!("Frame source: {}", source.describe());
        PerceptionState::Capturing
    }

    fn abort_init(&mut self, report: &mut RunReport) -> PerceptionState {
        self.release_resources();
        report.status = ExitStatus::InitFailure;
        PerceptionState::Terminated
    }

    fn capture(&mut self, pending: &mut Option<VideoFrame>, report: &mut RunReport) -> PerceptionState {
        let Some(source) = self.source.as_mut() else {
            return PerceptionState::ShuttingDown;
        };

        match source.next_frame() {
            Ok(FrameEvent::Frame(frame)) => {
                *pending = Some(frame);
                PerceptionState::Processing
            }
            Ok(FrameEvent::EndOfStream) => {
                info!("End of stream after {} frames", report.frames_processed);
                PerceptionState::ShuttingDown
            }
            Err(e) => {
                let e = PerceptionError::from(e);
                warn!("{}", e);
                report.last_failure = Some(e);
                PerceptionState::Recovering
            }
        }
    }

    fn process(
        &mut self,
        frame: Option<VideoFrame>,
        guard: &TerminationGuard,
        report: &mut RunReport,
    ) -> PerceptionState {
        let (Some(frame), Some(camera)) = (frame, self.camera.as_ref()) else {
            return PerceptionState::Capturing;
        };

        match self.detector.detect(&frame, camera) {
            Ok(lanes) => {
                debug!(
                    "Frame {}: lanes_detected={} position={:?} offset={:.2}m",
                    frame.sequence, lanes.lanes_detected, lanes.position, lanes.center_offset_m
                );
                report.frames_processed += 1;
                report.last_detection = Some(lanes);
                self.consecutive_failures = 0;

                if guard.is_stop_requested() {
                    info!("Stop requested, shutting down after frame {}", frame.sequence);
                    report.stop_requested = true;
                    PerceptionState::ShuttingDown
                } else {
                    PerceptionState::Capturing
                }
            }
            Err(e) => {
                let e = PerceptionError::from(e);
                warn!("Frame {}: {}", frame.sequence, e);
                report.last_failure = Some(e);
                PerceptionState::Recovering
            }
        }
    }

    fn recover(&mut self, guard: &TerminationGuard, report: &mut RunReport) -> PerceptionState {
        self.consecutive_failures += 1;
        report.recoveries += 1;

        if guard.is_stop_requested() {
            info!("Stop requested during recovery");
            report.stop_requested = true;
            return PerceptionState::ShuttingDown;
        }

        if self.consecutive_failures >= self.policy.retry_budget {
            error!(
                "Recovery exhausted after {} consecutive failures",
                self.consecutive_failures
            );
            report.status = ExitStatus::RecoveryExhausted;
            return PerceptionState::ShuttingDown;
        }

        warn!(
            "Recovering ({}/{})",
            self.consecutive_failures, self.policy.retry_budget
        );
        if !self.policy.backoff.is_zero() {
            thread::sleep(self.policy.backoff);
        }
        PerceptionState::Capturing
    }

    /// Source first, then the camera handle
    fn release_resources(&mut self) {
        if let Some(mut source) = self.source.take() {
            debug!("Releasing {}", source.describe());
            source.release();
        }
        self.camera = None;
    }
}
