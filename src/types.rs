use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub geometry: GeometryConfig,
    pub infrastructure: InfrastructureConfig,
    pub signals: SignalConfig,
    pub speed: SpeedConfig,
    pub pedestrian: PedestrianConfig,
    pub violations: ViolationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub frame_width: usize,
    pub frame_height: usize,
    /// Calibration trapezoid in normalized [0,1] frame coordinates,
    /// ordered top-left, top-right, bottom-right, bottom-left.
    pub calibration: [[f64; 2]; 4],
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            frame_width: 1920,
            frame_height: 1080,
            // Approximation for a 45-60 degree pole/drone tilt
            calibration: [[0.35, 0.45], [0.65, 0.45], [0.95, 0.95], [0.05, 0.95]],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    pub roi_top_ratio: f32,
    pub roi_bottom_ratio: f32,
    /// Minimum HSV value (0-255) for a pixel to count as road marking
    pub min_value: f32,
    /// Maximum HSV saturation (0-100) for a pixel to count as road marking
    pub max_saturation: f32,
    pub hough_threshold: u32,
    pub min_line_length: f32,
    pub max_line_gap: f32,
    /// Segments within this angle of horizontal (degrees) are kept
    pub max_angle_deg: f32,
    /// Vertical clustering tolerance for crosswalk stripes (top-down px)
    pub cluster_tolerance_px: f32,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            roi_top_ratio: 0.25,
            roi_bottom_ratio: 0.95,
            min_value: 140.0,
            max_saturation: 31.0,
            hough_threshold: 25,
            min_line_length: 30.0,
            max_line_gap: 20.0,
            max_angle_deg: 15.0,
            cluster_tolerance_px: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Continuous unknown observations for longer than this force the
    /// stable state back to unknown
    pub stale_timeout_secs: f64,
    /// Vehicles below this pixel velocity count as stopped for
    /// association learning
    pub stop_velocity_px: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: 2.0,
            stop_velocity_px: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedConfig {
    pub pixels_per_meter: f64,
    pub limit_kph: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            pixels_per_meter: 20.0,
            limit_kph: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PedestrianConfig {
    /// How far outside the crosswalk (px) a vehicle still counts as near
    pub near_band_px: f32,
    /// How far inside the crosswalk (px) a vehicle still counts as near
    pub inside_band_px: f32,
    /// Vehicles above this pixel velocity are not yielding
    pub yield_velocity_px: f32,
}

impl Default for PedestrianConfig {
    fn default() -> Self {
        Self {
            near_band_px: 100.0,
            inside_band_px: 50.0,
            yield_velocity_px: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Seconds before the same vehicle may be reported again
    pub cooldown_secs: f64,
    /// Minimum pixel velocity for a red-light runner (standing in the
    /// intersection is not a violation)
    pub red_light_velocity_px: f32,
    /// Kinematics entries older than this are garbage-collected
    pub stale_track_ttl_secs: f64,
    pub min_vehicle_confidence: f32,
    pub min_signal_confidence: f32,
    pub min_pedestrian_confidence: f32,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 15.0,
            red_light_velocity_px: 30.0,
            stale_track_ttl_secs: 60.0,
            min_vehicle_confidence: 0.25,
            min_signal_confidence: 0.15,
            min_pedestrian_confidence: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Packed RGB frame, row-major, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, timestamp: f64) -> Self {
        debug_assert_eq!(data.len(), width * height * 3);
        Self {
            data,
            width,
            height,
            timestamp,
        }
    }

    pub fn black(width: usize, height: usize, timestamp: f64) -> Self {
        Self::new(vec![0u8; width * height * 3], width, height, timestamp)
    }

    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let i = (y * self.width + x) * 3;
        (self.data[i], self.data[i + 1], self.data[i + 2])
    }

    #[inline]
    pub fn set_rgb(&mut self, x: usize, y: usize, r: u8, g: u8, b: u8) {
        let i = (y * self.width + x) * 3;
        self.data[i] = r;
        self.data[i + 1] = g;
        self.data[i + 2] = b;
    }

    /// Deep-copied sub-region, clamped to the frame bounds.
    /// Returns None for a zero-area crop.
    pub fn crop(&self, bbox: &[f32; 4]) -> Option<Frame> {
        let x1 = (bbox[0].max(0.0) as usize).min(self.width);
        let y1 = (bbox[1].max(0.0) as usize).min(self.height);
        let x2 = (bbox[2].max(0.0) as usize).min(self.width);
        let y2 = (bbox[3].max(0.0) as usize).min(self.height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        let (w, h) = (x2 - x1, y2 - y1);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in y1..y2 {
            let row = (y * self.width + x1) * 3;
            data.extend_from_slice(&self.data[row..row + w * 3]);
        }
        Some(Frame::new(data, w, h, self.timestamp))
    }
}

/// Single-channel (mask / grayscale) buffer, row-major.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self::new(vec![0u8; width * height], width, height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Vehicle,
    Pedestrian,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackId {
    Tracked(u64),
    Untracked,
}

impl TrackId {
    pub fn id(&self) -> Option<u64> {
        match self {
            TrackId::Tracked(id) => Some(*id),
            TrackId::Untracked => None,
        }
    }
}

/// One detector output. Produced fresh each frame by the external
/// detector/tracker; the core never mutates it.
#[derive(Debug, Clone)]
pub struct DetectedObject {
    /// [x1, y1, x2, y2] in image pixels
    pub bbox: [f32; 4],
    pub class: ObjectClass,
    pub track_id: TrackId,
    pub confidence: f32,
}

impl DetectedObject {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }

    /// Bottom-center of the box — where the object meets the ground plane.
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.bbox[0] + self.bbox[2]) / 2.0, self.bbox[3])
    }
}

/// Quadrilateral in image coordinates (stop line or crosswalk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Polygon {
    pub points: [[f32; 2]; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    RedLight,
    Yield,
    Speeding,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub vehicle_id: u64,
    pub signal_id: Option<u64>,
    pub message: String,
    /// Pipeline clock seconds at emission time
    pub timestamp: f64,
    pub speed_kph: Option<f64>,
    pub limit_kph: Option<f64>,
}

impl ViolationEvent {
    /// Wire form expected by the streaming/transport boundary.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "violation",
            "payload": self,
        })
    }
}

/// Emission envelope for the reporting/OCR boundary. The crop is a deep
/// copy — the reasoning core never shares frame buffers with the
/// background reporting side (it may outlive this frame).
#[derive(Debug, Clone)]
pub struct ViolationRecord {
    pub event: ViolationEvent,
    pub vehicle_crop: Option<Frame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = Frame::black(100, 50, 0.0);
        let crop = frame.crop(&[-10.0, -10.0, 30.0, 20.0]).unwrap();
        assert_eq!(crop.width, 30);
        assert_eq!(crop.height, 20);
    }

    #[test]
    fn test_crop_zero_area_is_none() {
        let frame = Frame::black(100, 50, 0.0);
        assert!(frame.crop(&[40.0, 10.0, 40.0, 30.0]).is_none());
        assert!(frame.crop(&[120.0, 10.0, 140.0, 30.0]).is_none());
    }

    #[test]
    fn test_crop_is_deep_copy() {
        let mut frame = Frame::black(10, 10, 0.0);
        frame.set_rgb(5, 5, 200, 100, 50);
        let crop = frame.crop(&[4.0, 4.0, 8.0, 8.0]).unwrap();
        frame.set_rgb(5, 5, 0, 0, 0);
        assert_eq!(crop.rgb(1, 1), (200, 100, 50));
    }

    #[test]
    fn test_violation_event_wire_form() {
        let event = ViolationEvent {
            kind: ViolationKind::RedLight,
            vehicle_id: 12,
            signal_id: Some(3),
            message: "Vehicle 12 crossed red light 3 (learned lane)".to_string(),
            timestamp: 41.2,
            speed_kph: None,
            limit_kph: None,
        };
        let json = event.to_json();
        assert_eq!(json["type"], "violation");
        assert_eq!(json["payload"]["kind"], "red_light");
        assert_eq!(json["payload"]["vehicle_id"], 12);
    }
}
