// src/lib.rs
//
// Traffic-violation reasoning core. Converts noisy per-frame detections
// (vehicles, pedestrians, traffic signals) into deduplicated violation
// events: red-light running, failure to yield, speeding.
//
// Object detection/tracking, plate OCR, report generation, and transport
// are external collaborators; this crate owns the per-frame reasoning
// between them.

pub mod config;
pub mod enhancement;
pub mod geometry;
pub mod infrastructure;
pub mod pedestrian;
pub mod pipeline;
pub mod signal;
pub mod speed;
pub mod types;

pub use geometry::{GeometryError, PerspectiveManager, TOP_DOWN_SIZE};
pub use infrastructure::InfrastructureExtractor;
pub use pedestrian::{TrackedVehicle, YieldChecker};
pub use pipeline::{FrameAnalysis, ViolationPipeline};
pub use signal::{ColorClassifier, HsvColorClassifier, SignalState};
pub use speed::SpeedEstimator;
pub use types::{
    Config, DetectedObject, Frame, GrayFrame, ObjectClass, Polygon, TrackId, ViolationEvent,
    ViolationKind, ViolationRecord,
};
