//! Camera Geometry
//!
//! Immutable description of a road camera and the coordinate systems every
//! downstream geometric computation relies on:
//! - Image coordinate system (ICS): origin at the top-left pixel
//! - Image-center coordinate system (ICCS): origin at the image center
//! - Field-of-view angles relative to the optical axis
//!
//! A [`CameraModel`] is either fully valid or never constructed.

pub mod calibration;
pub mod model;

pub use calibration::{CalibrationDir, CalibrationLookup, CalibrationRecord};
pub use model::{CameraModel, FieldOfView, FovPolicy, Point2i, Resolution};

use std::path::PathBuf;
use thiserror::Error;

/// Camera initialization errors. Always fatal for the affected camera.
#[derive(Error, Debug)]
pub enum CameraInitError {
    #[error("Calibration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse calibration file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Calibration for camera {camera} is missing {field}")]
    MissingField { camera: String, field: &'static str },

    #[error("{0} matrix is empty")]
    EmptyMatrix(&'static str),

    #[error("{name} matrix must be {expected}x{expected}, got {rows}x{cols}")]
    MatrixShape {
        name: &'static str,
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Resolution must be positive, got [{vertical} x {horizontal}]")]
    InvalidResolution { vertical: i32, horizontal: i32 },

    #[error("Focal length must be positive to derive the field of view")]
    InvalidFocalLength,
}
