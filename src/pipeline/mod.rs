// src/pipeline/mod.rs

pub mod cooldown;
pub mod kinematics;
pub mod metrics;
pub mod orchestrator;

pub use cooldown::CooldownRegistry;
pub use kinematics::{KinematicsRegistry, VehicleKinematics};
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::{FrameAnalysis, SignalAnnotation, ViolationPipeline};
