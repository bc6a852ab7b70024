// src/speed.rs
//
// Real-world speed from consecutive top-down positions.
//
// Only valid under the planar-road, fixed-camera assumption baked into
// the single calibrated homography: the pixels-per-meter scale is treated
// as uniform across the calibrated region.

use crate::geometry::PerspectiveManager;
use crate::pipeline::kinematics::VehicleKinematics;
use crate::types::SpeedConfig;

pub struct SpeedEstimator {
    config: SpeedConfig,
}

impl SpeedEstimator {
    pub fn new(config: SpeedConfig) -> Self {
        Self { config }
    }

    pub fn limit_kph(&self) -> f64 {
        self.config.limit_kph
    }

    /// Speed in km/h from the vehicle's last two image-space positions.
    /// None when there is no previous sample or `dt` is non-positive.
    pub fn speed_kph(
        &self,
        kinematics: &VehicleKinematics,
        pm: &PerspectiveManager,
        dt: f64,
    ) -> Option<f64> {
        let prev = kinematics.previous_position?;
        let last = kinematics.last_position;

        let p1 = pm.map_to_top_down(prev.0 as f64, prev.1 as f64)?;
        let p2 = pm.map_to_top_down(last.0 as f64, last.1 as f64)?;
        self.speed_from_top_down(p1, p2, dt)
    }

    /// Core conversion: top-down pixel displacement -> km/h.
    pub fn speed_from_top_down(
        &self,
        p1: (f64, f64),
        p2: (f64, f64),
        dt: f64,
    ) -> Option<f64> {
        if dt <= 0.0 {
            return None;
        }
        let dist_pixels = ((p2.0 - p1.0).powi(2) + (p2.1 - p1.1).powi(2)).sqrt();
        let dist_meters = dist_pixels / self.config.pixels_per_meter;
        Some(dist_meters / dt * 3.6)
    }

    pub fn is_speeding(&self, speed_kph: f64) -> bool {
        speed_kph > self.config.limit_kph
    }
}
