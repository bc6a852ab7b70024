// src/pipeline/orchestrator.rs
//
// Per-frame composition of the reasoning components, and the only owner
// of cross-frame mutable state (kinematics, signal instances, cooldowns).
// One frame is processed synchronously to completion before the next; the
// pipeline clock advances by the caller-supplied dt, so all temporal
// logic is deterministic and replayable.

use crate::enhancement::ImageEnhancer;
use crate::geometry::{GeometryError, PerspectiveManager};
use crate::infrastructure::{virtual_stop_line, InfrastructureExtractor};
use crate::pedestrian::{TrackedVehicle, YieldChecker};
use crate::pipeline::cooldown::CooldownRegistry;
use crate::pipeline::kinematics::KinematicsRegistry;
use crate::pipeline::metrics::PipelineMetrics;
use crate::signal::{ColorClassifier, HsvColorClassifier, SignalState, SignalStateMachine};
use crate::speed::SpeedEstimator;
use crate::types::{
    Config, DetectedObject, Frame, GrayFrame, ObjectClass, Polygon, ViolationEvent, ViolationKind,
    ViolationRecord,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Everything the transport/rendering side needs about one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameAnalysis {
    pub violations: Vec<ViolationRecord>,
    pub vehicles: Vec<TrackedVehicle>,
    pub signals: Vec<SignalAnnotation>,
    pub stop_lines: Vec<Polygon>,
    pub crosswalks: Vec<Polygon>,
    /// True when the stop line was synthesized from signal positions
    /// instead of detected paint
    pub virtual_stop_line: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalAnnotation {
    pub id: Option<u64>,
    pub bbox: [f32; 4],
    pub state: SignalState,
}

struct Candidate {
    kind: ViolationKind,
    vehicle_id: u64,
    signal_id: Option<u64>,
    bbox: [f32; 4],
    message: String,
    speed_kph: Option<f64>,
    limit_kph: Option<f64>,
}

pub struct ViolationPipeline {
    config: Config,
    pm: PerspectiveManager,
    enhancer: ImageEnhancer,
    extractor: InfrastructureExtractor,
    yield_checker: YieldChecker,
    speed: SpeedEstimator,
    classifier: Box<dyn ColorClassifier>,
    signals: HashMap<u64, SignalStateMachine>,
    kinematics: KinematicsRegistry,
    cooldowns: CooldownRegistry,
    metrics: PipelineMetrics,
    /// Accumulated dt, seconds. All timestamps and windows use this
    /// clock, never the wall clock.
    clock: f64,
}

impl ViolationPipeline {
    pub fn new(config: Config) -> Result<Self, GeometryError> {
        Self::with_classifier(config, Box::new(HsvColorClassifier))
    }

    /// Same pipeline with a swapped-in signal color classifier (external
    /// model, test stub).
    pub fn with_classifier(
        config: Config,
        classifier: Box<dyn ColorClassifier>,
    ) -> Result<Self, GeometryError> {
        let pm = PerspectiveManager::new(&config.geometry)?;
        Ok(Self {
            pm,
            enhancer: ImageEnhancer::default(),
            extractor: InfrastructureExtractor::new(config.infrastructure.clone()),
            yield_checker: YieldChecker::new(config.pedestrian.clone()),
            speed: SpeedEstimator::new(config.speed.clone()),
            classifier,
            signals: HashMap::new(),
            kinematics: KinematicsRegistry::new(config.violations.stale_track_ttl_secs),
            cooldowns: CooldownRegistry::new(config.violations.cooldown_secs),
            metrics: PipelineMetrics::new(),
            clock: 0.0,
            config,
        })
    }

    pub fn set_calibration(&mut self, points: [[f64; 2]; 4]) -> Result<(), GeometryError> {
        self.pm.set_calibration(points)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn signal_state(&self, id: u64) -> Option<SignalState> {
        self.signals.get(&id).map(|m| m.state())
    }

    /// Run the full reasoning pass over one frame.
    ///
    /// `detections` come from the external detector/tracker, `road_mask`
    /// from the optional segmentation collaborator, `dt` is the elapsed
    /// time since the previous frame in seconds.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detections: &[DetectedObject],
        road_mask: Option<&GrayFrame>,
        dt: f64,
    ) -> FrameAnalysis {
        self.clock += dt.max(0.0);
        let now = self.clock;
        self.metrics.inc(&self.metrics.total_frames);

        let enhanced = self.enhancer.preprocess(frame);

        // Class-specific confidence floors; signals get a lower bar
        // because they are small and routinely scored low
        let mut vehicle_dets: Vec<&DetectedObject> = Vec::new();
        let mut pedestrian_dets: Vec<&DetectedObject> = Vec::new();
        let mut signal_dets: Vec<&DetectedObject> = Vec::new();
        for det in detections {
            let floor = match det.class {
                ObjectClass::Vehicle => self.config.violations.min_vehicle_confidence,
                ObjectClass::Signal => self.config.violations.min_signal_confidence,
                ObjectClass::Pedestrian => self.config.violations.min_pedestrian_confidence,
            };
            if det.confidence < floor {
                continue;
            }
            match det.class {
                ObjectClass::Vehicle => vehicle_dets.push(det),
                ObjectClass::Pedestrian => pedestrian_dets.push(det),
                ObjectClass::Signal => signal_dets.push(det),
            }
        }

        // Signal states: classify the crop, smooth per instance
        let mut signal_annotations = Vec::with_capacity(signal_dets.len());
        let mut active_signal_ids = Vec::new();
        for sig in &signal_dets {
            let raw = match enhanced.crop(&sig.bbox) {
                Some(crop) => self.classifier.classify(&crop),
                None => SignalState::Unknown,
            };
            let state = match sig.track_id.id() {
                Some(id) => {
                    active_signal_ids.push(id);
                    let machine = self.signals.entry(id).or_insert_with(|| {
                        SignalStateMachine::new(id, now, self.config.signals.clone())
                    });
                    machine.update(raw, now)
                }
                // No stable identity to smooth over; surface the raw read
                None => raw,
            };
            signal_annotations.push(SignalAnnotation {
                id: sig.track_id.id(),
                bbox: sig.bbox,
                state,
            });
        }

        // Kinematics for tracked vehicles
        let mut vehicles: Vec<TrackedVehicle> = Vec::with_capacity(vehicle_dets.len());
        for det in &vehicle_dets {
            let Some(id) = det.track_id.id() else {
                continue;
            };
            let kin = self.kinematics.observe(id, det.center(), now, dt);
            let speed_kph = self.speed.speed_kph(kin, &self.pm, dt);
            kin.real_speed = speed_kph;
            vehicles.push(TrackedVehicle {
                id,
                bbox: det.bbox,
                velocity: kin.pixel_velocity,
                speed_kph,
            });
        }

        // Behavioral association learning: vehicles holding still during
        // a red phase mark the ground cells that signal controls
        let (fw, fh) = (frame.width as f32, frame.height as f32);
        for vehicle in &vehicles {
            if vehicle.velocity >= self.config.signals.stop_velocity_px {
                continue;
            }
            let (cx, cy) = vehicle.center();
            for id in &active_signal_ids {
                if let Some(machine) = self.signals.get_mut(id) {
                    if machine.state() == SignalState::Red {
                        machine.record_stop(cx / fw, cy / fh);
                    }
                }
            }
        }

        // Stop lines / crosswalks, with everything we detected masked out
        let exclusion: Vec<[f32; 4]> = vehicle_dets
            .iter()
            .chain(pedestrian_dets.iter())
            .map(|d| d.bbox)
            .collect();
        let infra = self
            .extractor
            .extract(&enhanced, road_mask, &exclusion, &self.pm);
        let mut stop_lines = infra.stop_lines;
        let crosswalks = infra.crosswalks;

        for _ in &stop_lines {
            self.metrics.inc(&self.metrics.stop_lines_detected);
        }
        if !crosswalks.is_empty() {
            self.metrics.inc(&self.metrics.crosswalks_detected);
        }

        let mut is_virtual = false;
        if stop_lines.is_empty() && !signal_dets.is_empty() {
            if let Some(poly) = virtual_stop_line(&signal_dets, frame.width) {
                debug!("No painted stop line; synthesizing from signal positions");
                stop_lines.push(poly);
                is_virtual = true;
                self.metrics.inc(&self.metrics.virtual_stop_lines);
            }
        }

        let mut candidates: Vec<Candidate> = Vec::new();

        // 1. Failure to yield
        for vehicle_id in
            self.yield_checker
                .check_yield_violations(&vehicles, &pedestrian_dets, &crosswalks)
        {
            if let Some(vehicle) = vehicles.iter().find(|v| v.id == vehicle_id) {
                candidates.push(Candidate {
                    kind: ViolationKind::Yield,
                    vehicle_id,
                    signal_id: None,
                    bbox: vehicle.bbox,
                    message: format!(
                        "Vehicle {} failed to yield to pedestrian at crosswalk",
                        vehicle_id
                    ),
                    speed_kph: None,
                    limit_kph: None,
                });
            }
        }

        // 2. Speeding
        for vehicle in &vehicles {
            let Some(speed) = vehicle.speed_kph else {
                continue;
            };
            if self.speed.is_speeding(speed) {
                candidates.push(Candidate {
                    kind: ViolationKind::Speeding,
                    vehicle_id: vehicle.id,
                    signal_id: None,
                    bbox: vehicle.bbox,
                    message: format!(
                        "Vehicle {} exceeded speed limit: {:.2} km/h (limit {:.0})",
                        vehicle.id,
                        speed,
                        self.speed.limit_kph()
                    ),
                    speed_kph: Some(speed),
                    limit_kph: Some(self.speed.limit_kph()),
                });
            }
        }

        // 3. Red light, via the learned association regions
        for vehicle in &vehicles {
            if vehicle.velocity < self.config.violations.red_light_velocity_px {
                continue;
            }
            let (fx, fy) = vehicle.bottom_center();
            let (nx, ny) = (fx / fw, fy / fh);
            for id in &active_signal_ids {
                let Some(machine) = self.signals.get(id) else {
                    continue;
                };
                if machine.state() == SignalState::Red && machine.is_associated(nx, ny) {
                    candidates.push(Candidate {
                        kind: ViolationKind::RedLight,
                        vehicle_id: vehicle.id,
                        signal_id: Some(*id),
                        bbox: vehicle.bbox,
                        message: format!(
                            "Vehicle {} crossed red light {} (learned lane)",
                            vehicle.id, id
                        ),
                        speed_kph: vehicle.speed_kph,
                        limit_kph: None,
                    });
                    break;
                }
            }
        }

        // Cooldown gate and emission. The stamp is shared across kinds,
        // so the first candidate for a vehicle wins the window.
        let mut violations = Vec::new();
        for candidate in candidates {
            if self.cooldowns.is_cooling_down(candidate.vehicle_id, now) {
                debug!(
                    "Suppressing {:?} for vehicle {} (cooldown)",
                    candidate.kind, candidate.vehicle_id
                );
                self.metrics.inc(&self.metrics.suppressed_by_cooldown);
                continue;
            }
            self.cooldowns.stamp(candidate.vehicle_id, now);

            let counter = match candidate.kind {
                ViolationKind::RedLight => &self.metrics.red_light_violations,
                ViolationKind::Yield => &self.metrics.yield_violations,
                ViolationKind::Speeding => &self.metrics.speeding_violations,
            };
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            info!("{}", candidate.message);
            violations.push(ViolationRecord {
                event: ViolationEvent {
                    kind: candidate.kind,
                    vehicle_id: candidate.vehicle_id,
                    signal_id: candidate.signal_id,
                    message: candidate.message,
                    timestamp: now,
                    speed_kph: candidate.speed_kph,
                    limit_kph: candidate.limit_kph,
                },
                // Deep copy from the ORIGINAL frame: the reporting side
                // runs OCR on reality, not on the enhanced buffer, and
                // must never share memory with the frame path
                vehicle_crop: frame.crop(&candidate.bbox),
            });
        }

        self.kinematics.gc(now);

        FrameAnalysis {
            violations,
            vehicles,
            signals: signal_annotations,
            stop_lines,
            crosswalks,
            virtual_stop_line: is_virtual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeometryConfig, TrackId};

    /// Classifier stub: the color model is a swap point, so tests drive
    /// the state machine directly through it.
    struct FixedColor(SignalState);

    impl ColorClassifier for FixedColor {
        fn classify(&self, _crop: &Frame) -> SignalState {
            self.0
        }
    }

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("violation_detection=debug")
            .try_init();
    }

    fn small_config() -> Config {
        init_logging();
        Config {
            geometry: GeometryConfig {
                frame_width: 640,
                frame_height: 360,
                ..GeometryConfig::default()
            },
            ..Config::default()
        }
    }

    fn vehicle(id: u64, bbox: [f32; 4]) -> DetectedObject {
        DetectedObject {
            bbox,
            class: ObjectClass::Vehicle,
            track_id: TrackId::Tracked(id),
            confidence: 0.9,
        }
    }

    fn signal(id: u64, bbox: [f32; 4]) -> DetectedObject {
        DetectedObject {
            bbox,
            class: ObjectClass::Signal,
            track_id: TrackId::Tracked(id),
            confidence: 0.5,
        }
    }

    #[test]
    fn test_speeding_emitted_once_then_cooled_down() {
        let mut config = small_config();
        config.violations.cooldown_secs = 10.0;
        let mut pipeline = ViolationPipeline::new(config).unwrap();
        let frame = Frame::black(640, 360, 0.0);

        // Fast lateral move near the bottom of the calibrated region:
        // ~330 top-down px/s at 20 px/m is well past the 40 km/h limit
        let positions = [196.0f32, 396.0, 596.0];
        let mut per_frame = Vec::new();
        for x in positions {
            let dets = [vehicle(1, [x - 4.0, 296.0, x + 4.0, 304.0])];
            let analysis = pipeline.process_frame(&frame, &dets, None, 1.0);
            per_frame.push(analysis.violations.len());
        }

        // First frame has no velocity yet; second emits; third suppressed
        assert_eq!(per_frame, vec![0, 1, 0]);
        let summary = pipeline.metrics().summary();
        assert_eq!(summary.speeding_violations, 1);
        assert!(summary.suppressed_by_cooldown >= 1);
    }

    #[test]
    fn test_red_light_violation_after_learned_association() {
        let mut pipeline =
            ViolationPipeline::with_classifier(small_config(), Box::new(FixedColor(SignalState::Red)))
                .unwrap();
        let frame = Frame::black(640, 360, 0.0);
        let sig = signal(50, [300.0, 10.0, 320.0, 60.0]);

        // Three frames stopped at the same spot: the track exists from
        // frame one, measures zero velocity on frames two and three, and
        // records two stops into signal 50's heatmap
        for _ in 0..3 {
            let dets = [vehicle(7, [296.0, 298.0, 304.0, 302.0]), sig.clone()];
            let analysis = pipeline.process_frame(&frame, &dets, None, 0.1);
            assert!(analysis.violations.is_empty());
        }
        assert_eq!(pipeline.signal_state(50), Some(SignalState::Red));

        // Now the same vehicle drives through the learned cell at 80 px/s
        let dets = [vehicle(7, [304.0, 298.0, 312.0, 302.0]), sig.clone()];
        let analysis = pipeline.process_frame(&frame, &dets, None, 0.1);
        assert_eq!(analysis.violations.len(), 1);
        let event = &analysis.violations[0].event;
        assert_eq!(event.kind, ViolationKind::RedLight);
        assert_eq!(event.vehicle_id, 7);
        assert_eq!(event.signal_id, Some(50));
        assert!(analysis.violations[0].vehicle_crop.is_some());
    }

    #[test]
    fn test_green_light_never_accumulates_associations() {
        let mut pipeline = ViolationPipeline::with_classifier(
            small_config(),
            Box::new(FixedColor(SignalState::Green)),
        )
        .unwrap();
        let frame = Frame::black(640, 360, 0.0);
        let sig = signal(51, [300.0, 10.0, 320.0, 60.0]);

        for _ in 0..3 {
            let dets = [vehicle(8, [296.0, 298.0, 304.0, 302.0]), sig.clone()];
            pipeline.process_frame(&frame, &dets, None, 0.1);
        }
        let dets = [vehicle(8, [304.0, 298.0, 312.0, 302.0]), sig.clone()];
        let analysis = pipeline.process_frame(&frame, &dets, None, 0.1);
        assert!(analysis.violations.is_empty());
    }

    #[test]
    fn test_virtual_stop_line_synthesized_from_signals() {
        let mut pipeline =
            ViolationPipeline::with_classifier(small_config(), Box::new(FixedColor(SignalState::Red)))
                .unwrap();
        let frame = Frame::black(640, 360, 0.0);
        let dets = [signal(60, [100.0, 20.0, 120.0, 80.0])];
        let analysis = pipeline.process_frame(&frame, &dets, None, 0.033);
        assert!(analysis.virtual_stop_line);
        assert_eq!(analysis.stop_lines.len(), 1);
        // Band centered on the signal box bottom
        assert_eq!(analysis.stop_lines[0].points[0][1], 80.0 - 8.0);
    }

    #[test]
    fn test_low_confidence_detections_ignored() {
        let mut pipeline = ViolationPipeline::new(small_config()).unwrap();
        let frame = Frame::black(640, 360, 0.0);
        let mut det = vehicle(9, [100.0, 100.0, 140.0, 130.0]);
        det.confidence = 0.1;
        let analysis = pipeline.process_frame(&frame, &[det], None, 0.033);
        assert!(analysis.vehicles.is_empty());
    }

    #[test]
    fn test_empty_detections_are_fine() {
        let mut pipeline = ViolationPipeline::new(small_config()).unwrap();
        let frame = Frame::black(640, 360, 0.0);
        let analysis = pipeline.process_frame(&frame, &[], None, 0.033);
        assert!(analysis.violations.is_empty());
        assert!(analysis.vehicles.is_empty());
        assert!(analysis.stop_lines.is_empty());
        assert!(!analysis.virtual_stop_line);
    }
}
