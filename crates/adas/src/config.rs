//! ADAS configuration

use serde::{Deserialize, Serialize};

/// ADAS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdasConfig {
    /// Lane departure warning enabled
    pub lane_departure_enabled: bool,

    /// Fraction of scan rows that must show both markings
    pub lane_confidence: f32,

    /// Grayscale intensity at or above which a pixel counts as marking
    pub marking_threshold: u8,

    /// Number of rows scanned in the lower half of the image
    pub scan_rows: u32,

    /// Offset from lane center, as a fraction of half the lane width,
    /// beyond which the vehicle counts as off-center
    pub departure_threshold: f32,

    /// Assumed lane width (meters) for converting pixel offsets
    pub lane_width_m: f32,
}

impl Default for AdasConfig {
    fn default() -> Self {
        Self {
            lane_departure_enabled: true,
            lane_confidence: 0.7,
            marking_threshold: 180,
            scan_rows: 8,
            departure_threshold: 0.25,
            lane_width_m: 3.5,
        }
    }
}
