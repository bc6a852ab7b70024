// src/pipeline/kinematics.rs
//
// Per-track motion state, owned by the orchestrator and keyed by the
// external tracker's identity.

use std::collections::HashMap;
use tracing::debug;

/// Velocity assigned to a track on its first observation. High on
/// purpose: a vehicle we have never measured must not be mistaken for a
/// stopped one by the association learner.
pub const NEW_TRACK_VELOCITY: f32 = 999.0;

#[derive(Debug, Clone, Copy)]
pub struct VehicleKinematics {
    /// Image-plane box center this frame
    pub last_position: (f32, f32),
    /// Image-plane box center the previous frame this track was seen
    pub previous_position: Option<(f32, f32)>,
    pub last_update_time: f64,
    /// Image-plane velocity in px/s
    pub pixel_velocity: f32,
    /// Top-down speed in km/h, when computable
    pub real_speed: Option<f64>,
}

impl VehicleKinematics {
    pub fn first_observation(position: (f32, f32), now: f64) -> Self {
        Self {
            last_position: position,
            previous_position: None,
            last_update_time: now,
            pixel_velocity: NEW_TRACK_VELOCITY,
            real_speed: None,
        }
    }
}

pub struct KinematicsRegistry {
    map: HashMap<u64, VehicleKinematics>,
    stale_ttl: f64,
}

impl KinematicsRegistry {
    pub fn new(stale_ttl: f64) -> Self {
        Self {
            map: HashMap::new(),
            stale_ttl,
        }
    }

    /// Record this frame's position for a track and update its velocity.
    pub fn observe(
        &mut self,
        id: u64,
        position: (f32, f32),
        now: f64,
        dt: f64,
    ) -> &mut VehicleKinematics {
        let entry = self
            .map
            .entry(id)
            .or_insert_with(|| VehicleKinematics::first_observation(position, now));

        if entry.last_update_time < now {
            let prev = entry.last_position;
            entry.previous_position = Some(prev);
            entry.last_position = position;
            entry.last_update_time = now;
            entry.pixel_velocity = if dt > 0.0 {
                let (dx, dy) = (position.0 - prev.0, position.1 - prev.1);
                (dx * dx + dy * dy).sqrt() / dt as f32
            } else {
                NEW_TRACK_VELOCITY
            };
        }
        entry
    }

    pub fn get(&self, id: u64) -> Option<&VehicleKinematics> {
        self.map.get(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop tracks not seen within the TTL. Stale entries are harmless
    /// but unbounded growth over a long session is not.
    pub fn gc(&mut self, now: f64) {
        let before = self.map.len();
        let ttl = self.stale_ttl;
        self.map.retain(|_, k| now - k.last_update_time <= ttl);
        if self.map.len() < before {
            debug!("Evicted {} stale vehicle tracks", before - self.map.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_has_sentinel_velocity() {
        let mut reg = KinematicsRegistry::new(60.0);
        let kin = reg.observe(1, (100.0, 100.0), 0.0, 0.033);
        assert_eq!(kin.pixel_velocity, NEW_TRACK_VELOCITY);
        assert!(kin.previous_position.is_none());
    }

    #[test]
    fn test_velocity_from_consecutive_positions() {
        let mut reg = KinematicsRegistry::new(60.0);
        reg.observe(1, (100.0, 100.0), 0.0, 0.0);
        let kin = reg.observe(1, (130.0, 140.0), 0.5, 0.5);
        // 50 px displacement over 0.5 s
        assert!((kin.pixel_velocity - 100.0).abs() < 1e-3);
        assert_eq!(kin.previous_position, Some((100.0, 100.0)));
        assert_eq!(kin.last_position, (130.0, 140.0));
    }

    #[test]
    fn test_non_positive_dt_keeps_sentinel() {
        let mut reg = KinematicsRegistry::new(60.0);
        reg.observe(1, (100.0, 100.0), 0.0, 0.0);
        let kin = reg.observe(1, (100.0, 100.0), 0.1, 0.0);
        assert_eq!(kin.pixel_velocity, NEW_TRACK_VELOCITY);
    }

    #[test]
    fn test_gc_evicts_stale_tracks_only() {
        let mut reg = KinematicsRegistry::new(60.0);
        reg.observe(1, (0.0, 0.0), 0.0, 0.033);
        reg.observe(2, (0.0, 0.0), 55.0, 0.033);
        reg.gc(70.0);
        assert!(reg.get(1).is_none());
        assert!(reg.get(2).is_some());
        assert_eq!(reg.len(), 1);
    }
}
