//! Camera model and coordinate transforms

use std::fmt;
use std::ops::{Add, Neg, Sub};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CalibrationLookup, CalibrationRecord, CameraInitError};

/// Integer pixel position.
///
/// Arithmetic wraps on `i32` overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point2i {
    pub x: i32,
    pub y: i32,
}

impl Point2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Point2i {
    type Output = Point2i;

    fn add(self, rhs: Point2i) -> Point2i {
        Point2i::new(self.x.wrapping_add(rhs.x), self.y.wrapping_add(rhs.y))
    }
}

impl Sub for Point2i {
    type Output = Point2i;

    fn sub(self, rhs: Point2i) -> Point2i {
        Point2i::new(self.x.wrapping_sub(rhs.x), self.y.wrapping_sub(rhs.y))
    }
}

impl Neg for Point2i {
    type Output = Point2i;

    fn neg(self) -> Point2i {
        Point2i::new(self.x.wrapping_neg(), self.y.wrapping_neg())
    }
}

impl fmt::Display for Point2i {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Image resolution, vertical first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Rows (image height)
    pub vertical: i32,
    /// Columns (image width)
    pub horizontal: i32,
}

impl Resolution {
    pub const fn new(vertical: i32, horizontal: i32) -> Self {
        Self { vertical, horizontal }
    }

    pub fn is_positive(&self) -> bool {
        self.vertical > 0 && self.horizontal > 0
    }
}

/// Field of view in degrees, vertical first
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub vertical_deg: f32,
    pub horizontal_deg: f32,
}

impl FieldOfView {
    pub const fn new(vertical_deg: f32, horizontal_deg: f32) -> Self {
        Self {
            vertical_deg,
            horizontal_deg,
        }
    }

    /// Historical fallback used when no field of view is configured
    pub const FALLBACK: FieldOfView = FieldOfView {
        vertical_deg: 45.0,
        horizontal_deg: 60.0,
    };
}

/// How a model obtains its field of view
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FovPolicy {
    /// Use the given angles as-is
    Fixed(FieldOfView),
    /// Derive from the focal lengths in the intrinsic matrix
    FromIntrinsic,
}

impl Default for FovPolicy {
    fn default() -> Self {
        FovPolicy::Fixed(FieldOfView::FALLBACK)
    }
}

impl FovPolicy {
    fn resolve(&self, intrinsic: &Array2<f64>, resolution: Resolution) -> Result<FieldOfView, CameraInitError> {
        match *self {
            FovPolicy::Fixed(fov) => Ok(fov),
            FovPolicy::FromIntrinsic => {
                let fx = intrinsic[[0, 0]];
                let fy = intrinsic[[1, 1]];
                if !(fx > 0.0 && fy > 0.0) {
                    return Err(CameraInitError::InvalidFocalLength);
                }
                let half_v = resolution.vertical as f64 / 2.0;
                let half_h = resolution.horizontal as f64 / 2.0;
                Ok(FieldOfView {
                    vertical_deg: (2.0 * (half_v / fy).atan()).to_degrees() as f32,
                    horizontal_deg: (2.0 * (half_h / fx).atan()).to_degrees() as f32,
                })
            }
        }
    }
}

/// Immutable geometric description of one camera.
///
/// Shared read-only (typically behind an `Arc`) by detection, projection and
/// logging once built.
#[derive(Debug, Clone)]
pub struct CameraModel {
    name: String,
    intrinsic: Array2<f64>,
    extrinsic: Array2<f64>,
    resolution: Resolution,
    fov: FieldOfView,
    /// Origin of the image-center CS expressed in the image CS
    origin_iccs_in_ics: Point2i,
    /// Origin of the image CS expressed in the image-center CS
    origin_ics_in_iccs: Point2i,
}

impl CameraModel {
    /// Build a model, validating every field.
    ///
    /// Fails on an empty or mis-shaped intrinsic (3x3) or extrinsic (4x4)
    /// matrix and on a non-positive resolution component. Nothing is
    /// defaulted.
    pub fn new(
        name: impl Into<String>,
        intrinsic: Array2<f64>,
        extrinsic: Array2<f64>,
        resolution: Resolution,
        fov_policy: FovPolicy,
    ) -> Result<Self, CameraInitError> {
        check_matrix("Intrinsic", &intrinsic, 3)?;
        check_matrix("Extrinsic", &extrinsic, 4)?;
        if !resolution.is_positive() {
            return Err(CameraInitError::InvalidResolution {
                vertical: resolution.vertical,
                horizontal: resolution.horizontal,
            });
        }

        let fov = fov_policy.resolve(&intrinsic, resolution)?;
        let origin_iccs_in_ics = Point2i::new(resolution.horizontal / 2, resolution.vertical / 2);

        Ok(Self {
            name: name.into(),
            intrinsic,
            extrinsic,
            resolution,
            fov,
            origin_iccs_in_ics,
            origin_ics_in_iccs: -origin_iccs_in_ics,
        })
    }

    /// Build from an already-parsed calibration record
    pub fn from_calibration(
        name: impl Into<String>,
        record: CalibrationRecord,
        fov_policy: FovPolicy,
    ) -> Result<Self, CameraInitError> {
        Self::new(name, record.intrinsic, record.extrinsic, record.resolution, fov_policy)
    }

    /// Resolve the calibration for `name` through `lookup` and build the model
    pub fn load<L: CalibrationLookup + ?Sized>(
        name: &str,
        lookup: &L,
        fov_policy: FovPolicy,
    ) -> Result<Self, CameraInitError> {
        let record = lookup.lookup(name)?;
        let model = Self::from_calibration(name, record, fov_policy)?;
        debug!("Camera model {} loaded", name);
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 3x3 intrinsic matrix
    pub fn intrinsic(&self) -> &Array2<f64> {
        &self.intrinsic
    }

    /// 4x4 extrinsic matrix
    pub fn extrinsic(&self) -> &Array2<f64> {
        &self.extrinsic
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn field_of_view(&self) -> FieldOfView {
        self.fov
    }

    /// Origin of the image-center CS in image coordinates: `(w/2, h/2)`
    pub fn origin_iccs_in_ics(&self) -> Point2i {
        self.origin_iccs_in_ics
    }

    /// Origin of the image CS in image-center coordinates: `-(w/2, h/2)`
    pub fn origin_ics_in_iccs(&self) -> Point2i {
        self.origin_ics_in_iccs
    }

    /// Focal lengths `(fx, fy)` in pixels
    pub fn focal_lengths(&self) -> (f64, f64) {
        (self.intrinsic[[0, 0]], self.intrinsic[[1, 1]])
    }

    pub fn ics_to_iccs(&self, p: Point2i) -> Point2i {
        p + self.origin_ics_in_iccs
    }

    pub fn iccs_to_ics(&self, p: Point2i) -> Point2i {
        p + self.origin_iccs_in_ics
    }

    /// Angles `(vertical°, horizontal°)` of an ICCS point off the optical axis.
    ///
    /// Linear in pixels: the full width spans the horizontal field of view and
    /// the full height spans the vertical one.
    pub fn iccs_to_angles(&self, p: Point2i) -> (f32, f32) {
        let vertical = p.y as f32 * self.fov.vertical_deg / self.resolution.vertical as f32;
        let horizontal = p.x as f32 * self.fov.horizontal_deg / self.resolution.horizontal as f32;
        (vertical, horizontal)
    }

    /// Inverse of [`CameraModel::iccs_to_angles`], rounded to the nearest pixel
    pub fn angles_to_iccs(&self, vertical_deg: f32, horizontal_deg: f32) -> Point2i {
        let y = vertical_deg * self.resolution.vertical as f32 / self.fov.vertical_deg;
        let x = horizontal_deg * self.resolution.horizontal as f32 / self.fov.horizontal_deg;
        Point2i::new(x.round() as i32, y.round() as i32)
    }

    /// Whether an ICS point lies inside the image
    pub fn contains(&self, p: Point2i) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.resolution.horizontal && p.y < self.resolution.vertical
    }
}

fn check_matrix(name: &'static str, m: &Array2<f64>, expected: usize) -> Result<(), CameraInitError> {
    if m.is_empty() {
        return Err(CameraInitError::EmptyMatrix(name));
    }
    let (rows, cols) = m.dim();
    if rows != expected || cols != expected {
        return Err(CameraInitError::MatrixShape {
            name,
            expected,
            rows,
            cols,
        });
    }
    Ok(())
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Camera Properties]")?;
        writeln!(f, "Name                    : {}", self.name)?;
        writeln!(f, "Extrinsic Camera Matrix :")?;
        writeln!(f, "{}", self.extrinsic)?;
        writeln!(f, "Intrinsic Camera Matrix :")?;
        writeln!(f, "{}", self.intrinsic)?;
        writeln!(
            f,
            "Resolution [V x H]      : [ {} x {} ]",
            self.resolution.vertical, self.resolution.horizontal
        )?;
        writeln!(
            f,
            "Field-of-View [V, H]    : [ {} , {} ]",
            self.fov.vertical_deg, self.fov.horizontal_deg
        )?;
        writeln!(f, "Origin-ICCS-ICS         : {}", self.origin_iccs_in_ics)?;
        write!(f, "Origin-ICS-ICCS         : {}", self.origin_ics_in_iccs)
    }
}
