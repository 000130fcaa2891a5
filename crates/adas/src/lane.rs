//! Lane detection

use camera_capture::VideoFrame;
use camera_geometry::{CameraModel, Point2i};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AdasConfig, AdasError, LaneDetect};

/// Vehicle position relative to the lane center
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanePosition {
    #[default]
    Center,
    Left,
    Right,
    Unknown,
}

/// Lane detection state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneState {
    /// Lane lines detected
    pub lanes_detected: bool,

    /// Vehicle position in lane
    pub position: LanePosition,

    /// Departing from lane
    pub departing: bool,

    /// Left lane line points in image coordinates [(x, y), ...]
    pub left_lane: Vec<(f32, f32)>,

    /// Right lane line points
    pub right_lane: Vec<(f32, f32)>,

    /// Offset of the vehicle from lane center (meters, positive = right)
    pub center_offset_m: f32,

    /// Where the two lane lines meet, in image-center coordinates
    pub vanishing_point: Option<Point2i>,
}

/// Lane detector.
///
/// Scans rows in the lower half of the image outward from the image center
/// for the first bright pixel on each side; those hits form the left and
/// right lane lines.
pub struct LaneDetector {
    config: AdasConfig,
}

impl LaneDetector {
    pub fn new(config: AdasConfig) -> Self {
        Self { config }
    }

    fn scan_rows(&self, height: u32) -> Vec<u32> {
        let top = height / 2;
        let bottom = height.saturating_sub(1);
        let n = self.config.scan_rows.max(1);
        if n == 1 || bottom <= top {
            return vec![bottom];
        }
        (0..n).map(|i| top + (bottom - top) * i / (n - 1)).collect()
    }
}

impl Default for LaneDetector {
    fn default() -> Self {
        Self::new(AdasConfig::default())
    }
}

impl LaneDetect for LaneDetector {
    fn detect(&mut self, frame: &VideoFrame, camera: &CameraModel) -> Result<LaneState, AdasError> {
        let res = camera.resolution();
        if frame.width as i32 != res.horizontal || frame.height as i32 != res.vertical {
            return Err(AdasError::InvalidFrame(format!(
                "frame {}x{} does not match camera {} resolution {}x{}",
                frame.width,
                frame.height,
                camera.name(),
                res.horizontal,
                res.vertical
            )));
        }
        if !frame.is_well_formed() {
            return Err(AdasError::InvalidFrame(format!(
                "buffer of {} bytes for {}x{} RGB",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let gray = frame.to_grayscale();
        let width = frame.width as usize;
        let center_x = camera.origin_iccs_in_ics().x as usize;
        let threshold = self.config.marking_threshold;

        let rows = self.scan_rows(frame.height);
        let mut left_lane = Vec::new();
        let mut right_lane = Vec::new();
        let mut hits = Vec::new();

        for &y in &rows {
            let row = &gray[y as usize * width..(y as usize + 1) * width];
            let left = row[..center_x].iter().rposition(|&v| v >= threshold);
            let right = row[center_x..].iter().position(|&v| v >= threshold).map(|dx| center_x + dx);

            if let Some(x) = left {
                left_lane.push((x as f32, y as f32));
            }
            if let Some(x) = right {
                right_lane.push((x as f32, y as f32));
            }
            if let (Some(l), Some(r)) = (left, right) {
                hits.push((l as f32, r as f32));
            }
        }

        let support = hits.len() as f32 / rows.len() as f32;
        let lanes_detected = support >= self.config.lane_confidence;
        debug!("Lane scan: {}/{} rows with both markings", hits.len(), rows.len());

        // Bottom-most row is closest to the vehicle
        let Some(&(l, r)) = hits.last().filter(|_| lanes_detected) else {
            return Ok(LaneState {
                lanes_detected: false,
                position: LanePosition::Unknown,
                left_lane,
                right_lane,
                ..Default::default()
            });
        };

        let lane_width_px = (r - l).max(1.0);
        let offset_px = center_x as f32 - (l + r) / 2.0;
        let offset_ratio = offset_px / (lane_width_px / 2.0);

        let position = if offset_ratio > self.config.departure_threshold {
            LanePosition::Right
        } else if offset_ratio < -self.config.departure_threshold {
            LanePosition::Left
        } else {
            LanePosition::Center
        };

        let vanishing_point = intersect(&left_lane, &right_lane).map(|(x, y)| {
            camera.ics_to_iccs(Point2i::new(x.round() as i32, y.round() as i32))
        });

        Ok(LaneState {
            lanes_detected: true,
            position,
            departing: self.config.lane_departure_enabled && position != LanePosition::Center,
            center_offset_m: offset_px / lane_width_px * self.config.lane_width_m,
            left_lane,
            right_lane,
            vanishing_point,
        })
    }
}

/// Intersection of the lines through the end points of two polylines
fn intersect(a: &[(f32, f32)], b: &[(f32, f32)]) -> Option<(f32, f32)> {
    let (&(x1, y1), &(x2, y2)) = (a.first()?, a.last()?);
    let (&(x3, y3), &(x4, y4)) = (b.first()?, b.last()?);

    let denom = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / denom;
    Some((x1 + t * (x2 - x1), y1 + t * (y2 - y1)))
}
