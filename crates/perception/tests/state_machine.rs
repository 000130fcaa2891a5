//! End-to-end runs of the perception loop over playback and live sources

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use adas::{AdasError, LaneDetector, LaneState};
use camera_capture::{CameraError, CaptureDevice, FrameDecoder, LiveCapture, SequencePlayback, VideoFrame};
use camera_geometry::{CalibrationDir, CameraInitError, CameraModel, FovPolicy, Resolution};
use ndarray::{array, Array2};
use perception::{
    ExitStatus, PerceptionError, PerceptionState, PerceptionStateMachine, RecoveryPolicy, TerminationGuard,
    Transition,
};

const W: u32 = 64;
const H: u32 = 48;

fn camera() -> CameraModel {
    CameraModel::new(
        "road_front",
        array![[60.0, 0.0, 32.0], [0.0, 60.0, 24.0], [0.0, 0.0, 1.0]],
        Array2::eye(4),
        Resolution::new(H as i32, W as i32),
        FovPolicy::default(),
    )
    .unwrap()
}

fn frame_paths(n: usize) -> Vec<PathBuf> {
    (0..n).map(|i| PathBuf::from(format!("frame_{:03}.png", i))).collect()
}

/// Renders two vertical lane markings at x = 16 and x = 48
struct LaneDecoder;

impl FrameDecoder for LaneDecoder {
    fn decode(&mut self, _path: &Path, sequence: u32) -> Result<VideoFrame, CameraError> {
        let mut data = vec![0u8; (W * H * 3) as usize];
        for y in 0..H {
            for x in [16, 48] {
                let idx = ((y * W + x) * 3) as usize;
                data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Ok(VideoFrame::new(data, W, H, 0, sequence))
    }
}

fn accept_all(_: &VideoFrame, _: &CameraModel) -> Result<LaneState, AdasError> {
    Ok(LaneState::default())
}

fn run_collect<D: adas::LaneDetect>(
    machine: PerceptionStateMachine<D>,
    guard: &TerminationGuard,
) -> (Vec<Transition>, perception::RunReport) {
    let mut transitions = Vec::new();
    let report = machine.run_observed(guard, |t| transitions.push(t));
    (transitions, report)
}

fn entries(transitions: &[Transition], state: PerceptionState) -> usize {
    transitions.iter().filter(|t| t.to == state).count()
}

/// Live device whose reads always time out
struct DeadDevice {
    streaming: bool,
    stops: Rc<Cell<u32>>,
}

impl CaptureDevice for DeadDevice {
    fn name(&self) -> &str {
        "mock://dead"
    }

    fn start(&mut self) -> Result<(), CameraError> {
        self.streaming = true;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError> {
        Err(CameraError::Timeout(timeout))
    }

    fn stop(&mut self) {
        self.streaming = false;
        self.stops.set(self.stops.get() + 1);
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}

fn dead_capture(stops: &Rc<Cell<u32>>) -> LiveCapture<DeadDevice> {
    let device = DeadDevice {
        streaming: false,
        stops: Rc::clone(stops),
    };
    LiveCapture::open(device, Duration::from_millis(5)).unwrap()
}

#[test]
fn test_playback_of_three_frames() {
    use PerceptionState::*;

    let source = SequencePlayback::with_decoder(frame_paths(3), LaneDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), Ok(camera()), LaneDetector::default(), RecoveryPolicy::default());
    let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

    assert_eq!(entries(&transitions, Processing), 3);
    assert_eq!(entries(&transitions, Recovering), 0);
    let tail: Vec<_> = transitions[transitions.len() - 2..].to_vec();
    assert_eq!(
        tail,
        vec![
            Transition {
                from: Capturing,
                to: ShuttingDown
            },
            Transition {
                from: ShuttingDown,
                to: Terminated
            },
        ]
    );
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.status.code(), 0);
    assert_eq!(report.frames_processed, 3);
    assert!(report.last_detection.unwrap().lanes_detected);
}

#[test]
fn test_failing_live_source_exhausts_budget() {
    for budget in [1u32, 3, 5] {
        let stops = Rc::new(Cell::new(0));
        let policy = RecoveryPolicy {
            retry_budget: budget,
            backoff: Duration::ZERO,
        };
        let machine = PerceptionStateMachine::new(Ok(dead_capture(&stops)), Ok(camera()), accept_all, policy);
        let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

        assert_eq!(entries(&transitions, PerceptionState::Recovering), budget as usize);
        assert_eq!(entries(&transitions, PerceptionState::Processing), 0);
        assert_eq!(report.status, ExitStatus::RecoveryExhausted);
        assert_ne!(report.status.code(), 0);
        assert!(matches!(report.last_failure, Some(PerceptionError::Capture(CameraError::Timeout(_)))));
        assert_eq!(stops.get(), 1, "device must be stopped exactly once");
    }
}

#[test]
fn test_zero_budget_enters_recovering_once() {
    // Every failure routes through RECOVERING; a zero budget gives up there
    let stops = Rc::new(Cell::new(0));
    let policy = RecoveryPolicy {
        retry_budget: 0,
        backoff: Duration::ZERO,
    };
    let machine = PerceptionStateMachine::new(Ok(dead_capture(&stops)), Ok(camera()), accept_all, policy);
    let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

    assert_eq!(entries(&transitions, PerceptionState::Recovering), 1);
    assert!(transitions.contains(&Transition {
        from: PerceptionState::Recovering,
        to: PerceptionState::ShuttingDown
    }));
    assert!(!transitions.contains(&Transition {
        from: PerceptionState::Recovering,
        to: PerceptionState::Capturing
    }));
    assert_eq!(report.status, ExitStatus::RecoveryExhausted);
    assert_eq!(stops.get(), 1);
}

#[test]
fn test_stop_requested_mid_sequence() {
    let guard = TerminationGuard::detached();
    let handle = guard.clone();
    let mut seen = 0;
    let detector = move |_: &VideoFrame, _: &CameraModel| -> Result<LaneState, AdasError> {
        seen += 1;
        if seen == 2 {
            handle.request_stop();
        }
        Ok(LaneState::default())
    };

    let source = SequencePlayback::with_decoder(frame_paths(5), LaneDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), Ok(camera()), detector, RecoveryPolicy::default());
    let (transitions, report) = run_collect(machine, &guard);

    assert_eq!(entries(&transitions, PerceptionState::Processing), 2);
    assert_eq!(
        transitions.last(),
        Some(&Transition {
            from: PerceptionState::ShuttingDown,
            to: PerceptionState::Terminated
        })
    );
    assert_eq!(report.status, ExitStatus::Success);
    assert!(report.stop_requested);
    assert_eq!(report.frames_processed, 2);
}

#[test]
fn test_missing_calibration_is_init_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let stops = Rc::new(Cell::new(0));
    let camera = CameraModel::load("road_front", &CalibrationDir::at(tmp.path()), FovPolicy::default());
    assert!(matches!(camera, Err(CameraInitError::NotFound(_))));

    let machine = PerceptionStateMachine::new(Ok(dead_capture(&stops)), camera, accept_all, RecoveryPolicy::default());
    let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

    assert_eq!(
        transitions,
        vec![Transition {
            from: PerceptionState::Init,
            to: PerceptionState::Terminated
        }]
    );
    assert_eq!(report.status, ExitStatus::InitFailure);
    assert_eq!(report.status.code(), 1);
    assert!(matches!(report.last_failure, Some(PerceptionError::CameraInit(_))));
    assert_eq!(stops.get(), 1, "opened device must be released on init failure");
}

#[test]
fn test_source_open_failure_is_init_failure() {
    let source: Result<SequencePlayback, CameraError> = Err(CameraError::Unsupported("/dev/video1".into()));
    let machine = PerceptionStateMachine::new(source, Ok(camera()), accept_all, RecoveryPolicy::default());
    let report = machine.run(&TerminationGuard::detached());

    assert_eq!(report.status, ExitStatus::InitFailure);
    assert!(matches!(report.last_failure, Some(PerceptionError::SourceInit(_))));
}

#[test]
fn test_detection_failure_recovers() {
    use PerceptionState::*;

    let mut calls = 0;
    let detector = move |_: &VideoFrame, _: &CameraModel| -> Result<LaneState, AdasError> {
        calls += 1;
        if calls == 2 {
            return Err(AdasError::Inference("transient".into()));
        }
        Ok(LaneState::default())
    };

    let source = SequencePlayback::with_decoder(frame_paths(3), LaneDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), Ok(camera()), detector, RecoveryPolicy::default());
    let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

    assert!(transitions.contains(&Transition {
        from: Processing,
        to: Recovering
    }));
    assert!(transitions.contains(&Transition {
        from: Recovering,
        to: Capturing
    }));
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.recoveries, 1);
}

#[test]
fn test_mismatched_frames_exhaust_budget() {
    // The detector rejects every frame whose size differs from the camera
    struct TinyDecoder;
    impl FrameDecoder for TinyDecoder {
        fn decode(&mut self, _path: &Path, sequence: u32) -> Result<VideoFrame, CameraError> {
            Ok(VideoFrame::new(vec![0; 12], 2, 2, 0, sequence))
        }
    }

    let source = SequencePlayback::with_decoder(frame_paths(5), TinyDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), Ok(camera()), LaneDetector::default(), RecoveryPolicy::default());
    let report = machine.run(&TerminationGuard::detached());

    assert_eq!(report.status, ExitStatus::RecoveryExhausted);
    assert_eq!(report.status.code(), 2);
    assert_eq!(report.recoveries, 3);
    assert!(matches!(
        report.last_failure,
        Some(PerceptionError::Detection(AdasError::InvalidFrame(_)))
    ));
}

#[test]
fn test_empty_playback_terminates_cleanly() {
    use PerceptionState::*;

    let source = SequencePlayback::with_decoder(Vec::new(), LaneDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), Ok(camera()), accept_all, RecoveryPolicy::default());
    let (transitions, report) = run_collect(machine, &TerminationGuard::detached());

    let states: Vec<_> = transitions.iter().map(|t| t.to).collect();
    assert_eq!(states, vec![Capturing, ShuttingDown, Terminated]);
    assert_eq!(report.status, ExitStatus::Success);
}

#[test]
fn test_calibration_file_to_detection() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("ConfigFiles").join("Camera");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("road_front.yaml"),
        "%YAML:1.0
CAMERA_MATRIX_INTRINSIC: !!opencv-matrix
   rows: 3
   cols: 3
   dt: d
   data: [ 60., 0., 32., 0., 60., 24., 0., 0., 1. ]
CAMERA_MATRIX_EXTRINSIC: !!opencv-matrix
   rows: 4
   cols: 4
   dt: d
   data: [ 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1. ]
CAMERA_RES: [ 64, 48 ]
",
    )
    .unwrap();

    let camera = CameraModel::load("road_front", &CalibrationDir::at(tmp.path()), FovPolicy::FromIntrinsic);
    let source = SequencePlayback::with_decoder(frame_paths(2), LaneDecoder);
    let machine = PerceptionStateMachine::new(Ok(source), camera, LaneDetector::default(), RecoveryPolicy::default());
    let report = machine.run(&TerminationGuard::detached());

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.frames_processed, 2);
    let lanes = report.last_detection.unwrap();
    assert!(lanes.lanes_detected);
    assert_eq!(lanes.position, adas::LanePosition::Center);
}
