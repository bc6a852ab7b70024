// src/pipeline/metrics.rs
//
// Production observability. Counters for every violation path plus
// suppression, exported as a serializable summary for logs or a
// /metrics-style endpoint on the transport side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub red_light_violations: Arc<AtomicU64>,
    pub yield_violations: Arc<AtomicU64>,
    pub speeding_violations: Arc<AtomicU64>,
    pub suppressed_by_cooldown: Arc<AtomicU64>,
    pub stop_lines_detected: Arc<AtomicU64>,
    pub virtual_stop_lines: Arc<AtomicU64>,
    pub crosswalks_detected: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            red_light_violations: Arc::new(AtomicU64::new(0)),
            yield_violations: Arc::new(AtomicU64::new(0)),
            speeding_violations: Arc::new(AtomicU64::new(0)),
            suppressed_by_cooldown: Arc::new(AtomicU64::new(0)),
            stop_lines_detected: Arc::new(AtomicU64::new(0)),
            virtual_stop_lines: Arc::new(AtomicU64::new(0)),
            crosswalks_detected: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            red_light_violations: self.red_light_violations.load(Ordering::Relaxed),
            yield_violations: self.yield_violations.load(Ordering::Relaxed),
            speeding_violations: self.speeding_violations.load(Ordering::Relaxed),
            suppressed_by_cooldown: self.suppressed_by_cooldown.load(Ordering::Relaxed),
            stop_lines_detected: self.stop_lines_detected.load(Ordering::Relaxed),
            virtual_stop_lines: self.virtual_stop_lines.load(Ordering::Relaxed),
            crosswalks_detected: self.crosswalks_detected.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub red_light_violations: u64,
    pub yield_violations: u64,
    pub speeding_violations: u64,
    pub suppressed_by_cooldown: u64,
    pub stop_lines_detected: u64,
    pub virtual_stop_lines: u64,
    pub crosswalks_detected: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_round_trip_into_summary() {
        let metrics = PipelineMetrics::new();
        metrics.inc(&metrics.total_frames);
        metrics.inc(&metrics.total_frames);
        metrics.inc(&metrics.speeding_violations);
        let summary = metrics.summary();
        assert_eq!(summary.total_frames, 2);
        assert_eq!(summary.speeding_violations, 1);
        assert_eq!(summary.red_light_violations, 0);
    }
}
