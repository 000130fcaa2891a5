//! Calibration sources
//!
//! Calibration files live next to the running executable under
//! `ConfigFiles/Camera/<name>.yaml` and follow the OpenCV `FileStorage` YAML
//! layout:
//!
//! ```yaml
//! %YAML:1.0
//! CAMERA_MATRIX_INTRINSIC: !!opencv-matrix
//!    rows: 3
//!    cols: 3
//!    dt: d
//!    data: [ 1000., 0., 960., 0., 1000., 540., 0., 0., 1. ]
//! CAMERA_MATRIX_EXTRINSIC: !!opencv-matrix
//!    rows: 4
//!    cols: 4
//!    dt: d
//!    data: [ ... ]
//! CAMERA_RES: [ 1920, 1080 ]
//! ```
//!
//! `CAMERA_RES` is `[width, height]`.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::{CameraInitError, Resolution};

const KEY_INTRINSIC: &str = "CAMERA_MATRIX_INTRINSIC";
const KEY_EXTRINSIC: &str = "CAMERA_MATRIX_EXTRINSIC";
const KEY_RESOLUTION: &str = "CAMERA_RES";

/// The three fields a camera model consumes from its calibration
#[derive(Debug, Clone)]
pub struct CalibrationRecord {
    pub intrinsic: Array2<f64>,
    pub extrinsic: Array2<f64>,
    pub resolution: Resolution,
}

/// Resolves the calibration for a camera name
pub trait CalibrationLookup {
    fn lookup(&self, camera: &str) -> Result<CalibrationRecord, CameraInitError>;
}

/// Calibration files under `<root>/ConfigFiles/Camera/`
#[derive(Debug, Clone)]
pub struct CalibrationDir {
    root: PathBuf,
    degraded: bool,
}

impl CalibrationDir {
    /// Root at the directory holding the running executable.
    ///
    /// If that directory cannot be determined the lookup falls back to the
    /// working directory and is flagged as degraded.
    pub fn beside_executable() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        match exe_dir {
            Some(root) => Self { root, degraded: false },
            None => {
                warn!("Unable to find the path to the binary; searching for camera configuration files in the working directory");
                Self {
                    root: PathBuf::from("."),
                    degraded: true,
                }
            }
        }
    }

    /// Root at an explicit directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            degraded: false,
        }
    }

    /// True when the executable directory could not be resolved
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Path of the calibration file for `camera`
    pub fn path_for(&self, camera: &str) -> PathBuf {
        self.root
            .join("ConfigFiles")
            .join("Camera")
            .join(format!("{}.yaml", camera))
    }
}

impl CalibrationLookup for CalibrationDir {
    fn lookup(&self, camera: &str) -> Result<CalibrationRecord, CameraInitError> {
        let path = self.path_for(camera);
        if !path.is_file() {
            warn!("Unable to load camera configuration, file not found: {}", path.display());
            return Err(CameraInitError::NotFound(path));
        }

        let text = fs::read_to_string(&path).map_err(|source| CameraInitError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Parsing calibration for {} from {}", camera, path.display());
        parse_calibration(camera, &path, &text)
    }
}

#[derive(Debug, Deserialize)]
struct OpenCvMatrix {
    rows: usize,
    cols: usize,
    #[serde(default)]
    data: Vec<f64>,
}

/// Parse calibration YAML text. `path` is only used in error messages.
pub fn parse_calibration(camera: &str, path: &Path, text: &str) -> Result<CalibrationRecord, CameraInitError> {
    let parse_err = |reason: String| CameraInitError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    // OpenCV writes a YAML 1.0 directive that YAML 1.2 parsers reject.
    let body: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("%YAML"))
        .collect::<Vec<_>>()
        .join("\n");

    let doc: Value = serde_yaml::from_str(&body).map_err(|e| parse_err(e.to_string()))?;

    let intrinsic = read_matrix(field(&doc, camera, KEY_INTRINSIC)?).map_err(|r| parse_err(format!("{}: {}", KEY_INTRINSIC, r)))?;
    let extrinsic = read_matrix(field(&doc, camera, KEY_EXTRINSIC)?).map_err(|r| parse_err(format!("{}: {}", KEY_EXTRINSIC, r)))?;

    let res: Vec<i64> = serde_yaml::from_value(field(&doc, camera, KEY_RESOLUTION)?.clone())
        .map_err(|e| parse_err(format!("{}: {}", KEY_RESOLUTION, e)))?;
    let &[width, height] = res.as_slice() else {
        return Err(parse_err(format!("{}: expected [width, height], got {} values", KEY_RESOLUTION, res.len())));
    };
    let to_i32 = |v: i64| i32::try_from(v).map_err(|_| parse_err(format!("{}: {} out of range", KEY_RESOLUTION, v)));

    Ok(CalibrationRecord {
        intrinsic,
        extrinsic,
        resolution: Resolution::new(to_i32(height)?, to_i32(width)?),
    })
}

fn field<'a>(doc: &'a Value, camera: &str, key: &'static str) -> Result<&'a Value, CameraInitError> {
    doc.get(key).map(untag).ok_or_else(|| CameraInitError::MissingField {
        camera: camera.to_string(),
        field: key,
    })
}

fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

fn read_matrix(value: &Value) -> Result<Array2<f64>, String> {
    let m: OpenCvMatrix = serde_yaml::from_value(value.clone()).map_err(|e| e.to_string())?;
    if m.rows.checked_mul(m.cols) != Some(m.data.len()) {
        return Err(format!(
            "{}x{} matrix with {} data values",
            m.rows,
            m.cols,
            m.data.len()
        ));
    }
    Array2::from_shape_vec((m.rows, m.cols), m.data).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraModel, FovPolicy, Point2i};

    const CALIBRATION: &str = "%YAML:1.0
CAMERA_MATRIX_INTRINSIC: !!opencv-matrix
   rows: 3
   cols: 3
   dt: d
   data: [ 1000., 0., 320., 0., 1000., 240., 0., 0., 1. ]
CAMERA_MATRIX_EXTRINSIC: !!opencv-matrix
   rows: 4
   cols: 4
   dt: d
   data: [ 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 1.5, 0., 0., 0., 1. ]
CAMERA_RES: [ 640, 480 ]
";

    fn write_calibration(root: &Path, camera: &str, text: &str) {
        let dir = root.join("ConfigFiles").join("Camera");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.yaml", camera)), text).unwrap();
    }

    #[test]
    fn test_parse_opencv_yaml() {
        let record = parse_calibration("road_front", Path::new("test.yaml"), CALIBRATION).unwrap();
        assert_eq!(record.intrinsic.dim(), (3, 3));
        assert_eq!(record.intrinsic[[0, 2]], 320.0);
        assert_eq!(record.extrinsic.dim(), (4, 4));
        assert_eq!(record.extrinsic[[2, 3]], 1.5);
        assert_eq!(record.resolution, Resolution::new(480, 640));
    }

    #[test]
    fn test_load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_calibration(tmp.path(), "road_front", CALIBRATION);

        let lookup = CalibrationDir::at(tmp.path());
        assert!(!lookup.is_degraded());
        let cam = CameraModel::load("road_front", &lookup, FovPolicy::default()).unwrap();
        assert_eq!(cam.name(), "road_front");
        assert_eq!(cam.origin_iccs_in_ics(), Point2i::new(320, 240));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let lookup = CalibrationDir::at(tmp.path());
        let err = CameraModel::load("nope", &lookup, FovPolicy::default()).unwrap_err();
        match err {
            CameraInitError::NotFound(path) => assert!(path.ends_with("ConfigFiles/Camera/nope.yaml")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_key_is_reported() {
        let text = CALIBRATION.replace("CAMERA_RES: [ 640, 480 ]", "");
        let err = parse_calibration("road_front", Path::new("x.yaml"), &text).unwrap_err();
        assert!(matches!(err, CameraInitError::MissingField { field: "CAMERA_RES", .. }));
    }

    #[test]
    fn test_empty_matrix_fails_model_construction() {
        let text = "CAMERA_MATRIX_INTRINSIC: { rows: 0, cols: 0, data: [] }
CAMERA_MATRIX_EXTRINSIC: { rows: 4, cols: 4, data: [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1] }
CAMERA_RES: [640, 480]
";
        let record = parse_calibration("road_front", Path::new("x.yaml"), text).unwrap();
        let err = CameraModel::from_calibration("road_front", record, FovPolicy::default()).unwrap_err();
        assert!(matches!(err, CameraInitError::EmptyMatrix("Intrinsic")));
    }

    #[test]
    fn test_zero_resolution_fails_model_construction() {
        let text = CALIBRATION.replace("[ 640, 480 ]", "[ 0, 0 ]");
        let record = parse_calibration("road_front", Path::new("x.yaml"), &text).unwrap();
        let err = CameraModel::from_calibration("road_front", record, FovPolicy::default()).unwrap_err();
        assert!(matches!(err, CameraInitError::InvalidResolution { .. }));
    }

    #[test]
    fn test_data_length_mismatch_is_parse_error() {
        let text = CALIBRATION.replace("rows: 3", "rows: 2");
        let err = parse_calibration("road_front", Path::new("x.yaml"), &text).unwrap_err();
        assert!(matches!(err, CameraInitError::Parse { .. }));
    }

    #[test]
    fn test_oversized_dimensions_are_parse_error() {
        let text = CALIBRATION.replace(
            "rows: 3\n   cols: 3",
            "rows: 4294967296\n   cols: 4294967296",
        );
        assert!(text.contains("rows: 4294967296"));
        let err = parse_calibration("road_front", Path::new("x.yaml"), &text).unwrap_err();
        assert!(matches!(err, CameraInitError::Parse { .. }));
    }

    #[test]
    fn test_beside_executable_points_at_config_files() {
        let lookup = CalibrationDir::beside_executable();
        let path = lookup.path_for("road_front");
        assert!(path.ends_with("ConfigFiles/Camera/road_front.yaml"));
    }
}
