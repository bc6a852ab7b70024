// src/pipeline/cooldown.rs
//
// Deduplication of repeated reports of the same physical event. Keyed by
// vehicle id only: a vehicle already reported within the window is not
// reported again for ANY violation kind. That coupling under-reports
// simultaneous distinct violations and is deliberate policy — one report
// per offender per window is what the downstream reporting side wants.

use std::collections::HashMap;

pub struct CooldownRegistry {
    window_secs: f64,
    last_report: HashMap<u64, f64>,
}

impl CooldownRegistry {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            last_report: HashMap::new(),
        }
    }

    pub fn is_cooling_down(&self, vehicle_id: u64, now: f64) -> bool {
        self.last_report
            .get(&vehicle_id)
            .is_some_and(|&t| now - t < self.window_secs)
    }

    pub fn stamp(&mut self, vehicle_id: u64, now: f64) {
        self.last_report.insert(vehicle_id, now);
    }
}
