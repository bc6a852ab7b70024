// src/pedestrian.rs
//
// Failure-to-yield detection at crosswalks.
//
// A vehicle violates when it keeps moving near a crosswalk that has a
// pedestrian inside it. "Near" is a signed-distance band around the
// polygon edge so vehicles already stopped at the line, or far away,
// never trigger.

use crate::types::{DetectedObject, PedestrianConfig, Polygon};
use tracing::debug;

/// Per-frame vehicle view assembled by the orchestrator: identity plus
/// the kinematic fields violation logic needs.
#[derive(Debug, Clone, Copy)]
pub struct TrackedVehicle {
    pub id: u64,
    pub bbox: [f32; 4],
    /// Image-plane velocity in px/s
    pub velocity: f32,
    pub speed_kph: Option<f64>,
}

impl TrackedVehicle {
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.bbox[0] + self.bbox[2]) / 2.0, self.bbox[3])
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

pub struct YieldChecker {
    config: PedestrianConfig,
}

impl YieldChecker {
    pub fn new(config: PedestrianConfig) -> Self {
        Self { config }
    }

    /// Vehicle ids failing to yield at the primary crosswalk.
    pub fn check_yield_violations(
        &self,
        vehicles: &[TrackedVehicle],
        pedestrians: &[&DetectedObject],
        crosswalks: &[Polygon],
    ) -> Vec<u64> {
        let Some(crosswalk) = crosswalks.first() else {
            return Vec::new();
        };
        if pedestrians.is_empty() {
            return Vec::new();
        }

        let occupied = pedestrians
            .iter()
            .any(|p| point_in_polygon(p.center(), crosswalk));
        if !occupied {
            return Vec::new();
        }

        let mut violators = Vec::new();
        for vehicle in vehicles {
            let dist = signed_distance(vehicle.bottom_center(), crosswalk);
            // Inside-positive: approaching vehicles sit just outside
            let near = dist > -self.config.near_band_px && dist < self.config.inside_band_px;
            let not_yielding = vehicle.velocity > self.config.yield_velocity_px;
            if near && not_yielding {
                debug!(
                    "Vehicle {} moving at {:.1} px/s {:.0} px from occupied crosswalk",
                    vehicle.id, vehicle.velocity, dist
                );
                violators.push(vehicle.id);
            }
        }
        violators
    }
}

/// Ray-cast point-in-polygon test.
pub fn point_in_polygon(point: (f32, f32), poly: &Polygon) -> bool {
    let (px, py) = point;
    let pts = &poly.points;
    let mut inside = false;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let (xi, yi) = (pts[i][0], pts[i][1]);
        let (xj, yj) = (pts[j][0], pts[j][1]);
        if ((yi > py) != (yj > py))
            && px < (xj - xi) * (py - yi) / (yj - yi) + xi
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Distance from a point to the polygon edge, positive inside and
/// negative outside.
pub fn signed_distance(point: (f32, f32), poly: &Polygon) -> f32 {
    let mut min_dist = f32::MAX;
    let pts = &poly.points;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let d = point_segment_distance(point, (pts[j][0], pts[j][1]), (pts[i][0], pts[i][1]));
        min_dist = min_dist.min(d);
        j = i;
    }
    if point_in_polygon(point, poly) {
        min_dist
    } else {
        -min_dist
    }
}

fn point_segment_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let (apx, apy) = (p.0 - a.0, p.1 - a.1);
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq > 0.0 {
        ((apx * abx + apy * aby) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * abx, a.1 + t * aby);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectClass, TrackId};

    fn crosswalk() -> Polygon {
        Polygon {
            points: [
                [200.0, 200.0],
                [400.0, 200.0],
                [400.0, 300.0],
                [200.0, 300.0],
            ],
        }
    }

    fn pedestrian(bbox: [f32; 4]) -> DetectedObject {
        DetectedObject {
            bbox,
            class: ObjectClass::Pedestrian,
            track_id: TrackId::Tracked(10),
            confidence: 0.8,
        }
    }

    fn vehicle(id: u64, bbox: [f32; 4], velocity: f32) -> TrackedVehicle {
        TrackedVehicle {
            id,
            bbox,
            velocity,
            speed_kph: None,
        }
    }

    #[test]
    fn test_moving_vehicle_near_occupied_crosswalk_violates() {
        let checker = YieldChecker::new(PedestrianConfig::default());
        let peds = [pedestrian([250.0, 240.0, 270.0, 280.0])];
        let ped_refs: Vec<&DetectedObject> = peds.iter().collect();
        // Bottom-center at (140, 280): 60 px left of the crosswalk edge
        let vehicles = [vehicle(1, [100.0, 240.0, 180.0, 280.0], 20.0)];
        let violations = checker.check_yield_violations(&vehicles, &ped_refs, &[crosswalk()]);
        assert_eq!(violations, vec![1]);
    }

    #[test]
    fn test_stopped_vehicle_does_not_violate() {
        let checker = YieldChecker::new(PedestrianConfig::default());
        let peds = [pedestrian([250.0, 240.0, 270.0, 280.0])];
        let ped_refs: Vec<&DetectedObject> = peds.iter().collect();
        let vehicles = [vehicle(2, [100.0, 240.0, 180.0, 280.0], 2.0)];
        let violations = checker.check_yield_violations(&vehicles, &ped_refs, &[crosswalk()]);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_empty_crosswalk_means_no_violation() {
        let checker = YieldChecker::new(PedestrianConfig::default());
        // Pedestrian well outside the polygon
        let peds = [pedestrian([500.0, 500.0, 520.0, 540.0])];
        let ped_refs: Vec<&DetectedObject> = peds.iter().collect();
        let vehicles = [vehicle(3, [100.0, 240.0, 180.0, 280.0], 20.0)];
        let violations = checker.check_yield_violations(&vehicles, &ped_refs, &[crosswalk()]);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_no_crosswalk_or_no_pedestrians_early_out() {
        let checker = YieldChecker::new(PedestrianConfig::default());
        let vehicles = [vehicle(4, [100.0, 240.0, 180.0, 280.0], 20.0)];
        assert!(checker
            .check_yield_violations(&vehicles, &[], &[crosswalk()])
            .is_empty());
        let peds = [pedestrian([250.0, 240.0, 270.0, 280.0])];
        let ped_refs: Vec<&DetectedObject> = peds.iter().collect();
        assert!(checker
            .check_yield_violations(&vehicles, &ped_refs, &[])
            .is_empty());
    }

    #[test]
    fn test_far_vehicle_not_flagged() {
        let checker = YieldChecker::new(PedestrianConfig::default());
        let peds = [pedestrian([250.0, 240.0, 270.0, 280.0])];
        let ped_refs: Vec<&DetectedObject> = peds.iter().collect();
        // Bottom-center at (40, 280): 160 px out, beyond the near band
        let vehicles = [vehicle(5, [0.0, 240.0, 80.0, 280.0], 20.0)];
        let violations = checker.check_yield_violations(&vehicles, &ped_refs, &[crosswalk()]);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_signed_distance_sign_convention() {
        let poly = crosswalk();
        assert!(signed_distance((300.0, 250.0), &poly) > 0.0);
        assert!(signed_distance((100.0, 250.0), &poly) < 0.0);
        assert!((signed_distance((180.0, 250.0), &poly) - -20.0).abs() < 1e-3);
        assert!((signed_distance((220.0, 250.0), &poly) - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_point_in_polygon_basics() {
        let poly = crosswalk();
        assert!(point_in_polygon((260.0, 260.0), &poly));
        assert!(!point_in_polygon((100.0, 100.0), &poly));
    }
}
