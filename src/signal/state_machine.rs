// src/signal/state_machine.rs
//
// Per-signal temporal smoothing and behavioral-association learning.
//
// Raw per-frame color classifications flicker (glare, partial occlusion,
// bulb PWM). A short voting window plus asymmetric transition thresholds
// keeps the stable state from chattering while still committing quickly
// on the transitions that matter for enforcement (yellow -> red).
//
// Time is injected by the caller (pipeline clock seconds), never read
// from the wall clock, so hysteresis and staleness are deterministic and
// frame-order dependent as required.

use crate::types::SignalConfig;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Raw-observation voting window depth.
pub const HISTORY_SIZE: usize = 5;

/// Side length of the association heatmap over normalized ground
/// coordinates.
pub const GRID_SIZE: usize = 40;

/// One strong stop event at a cell marks it as controlled by the signal.
const ASSOCIATION_THRESHOLD: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    Unknown,
    Red,
    Yellow,
    Green,
}

impl SignalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalState::Unknown => "unknown",
            SignalState::Red => "red",
            SignalState::Yellow => "yellow",
            SignalState::Green => "green",
        }
    }
}

pub struct SignalStateMachine {
    id: u64,
    state: SignalState,
    last_state_change: f64,
    /// Last time a non-unknown raw observation arrived
    last_valid_observation: f64,
    history: VecDeque<SignalState>,
    /// Accumulated stop weights over normalized ground-plane cells.
    /// Never decays — association confidence only grows with observed
    /// traffic (an explicit trade-off; add multiplicative decay here if
    /// forgetting is ever needed).
    heatmap: Vec<f32>,
    config: SignalConfig,
}

impl SignalStateMachine {
    pub fn new(id: u64, now: f64, config: SignalConfig) -> Self {
        debug!("Creating signal state machine for signal {}", id);
        Self {
            id,
            state: SignalState::Unknown,
            last_state_change: now,
            last_valid_observation: now,
            history: VecDeque::with_capacity(HISTORY_SIZE),
            heatmap: vec![0.0; GRID_SIZE * GRID_SIZE],
            config,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Feed one raw classification; returns the smoothed stable state.
    pub fn update(&mut self, raw: SignalState, now: f64) -> SignalState {
        if raw == SignalState::Unknown {
            // Stale-data protection: continuously unknown for too long
            // means the crop is unusable (occluded, out of frame) and any
            // remembered state is a liability.
            if now - self.last_valid_observation > self.config.stale_timeout_secs {
                if self.state != SignalState::Unknown {
                    info!(
                        "Signal {} stale for {:.1}s, forcing unknown",
                        self.id,
                        now - self.last_valid_observation
                    );
                }
                self.state = SignalState::Unknown;
                self.history.clear();
                return self.state;
            }
        } else {
            self.last_valid_observation = now;
        }

        self.history.push_back(raw);
        if self.history.len() > HISTORY_SIZE {
            self.history.pop_front();
        }

        let Some((dominant, votes)) = self.dominant_observation() else {
            return self.state;
        };

        let next = match (self.state, dominant) {
            (current, d) if current == d => None,
            // First valid read commits immediately
            (SignalState::Unknown, d) => Some(d),
            (SignalState::Green, SignalState::Yellow) if votes >= 3 => Some(SignalState::Yellow),
            (SignalState::Green, SignalState::Red) if votes >= 3 => Some(SignalState::Red),
            // Yellow commits fast toward red, reverts to green reluctantly
            (SignalState::Yellow, SignalState::Red) if votes >= 2 => Some(SignalState::Red),
            (SignalState::Yellow, SignalState::Green) if votes >= 4 => Some(SignalState::Green),
            (SignalState::Red, SignalState::Green) if votes >= 3 => Some(SignalState::Green),
            // No red -> yellow path
            _ => None,
        };

        if let Some(next) = next {
            debug!(
                "Signal {} transition {} -> {} ({} votes)",
                self.id,
                self.state.as_str(),
                next.as_str(),
                votes
            );
            self.state = next;
            self.last_state_change = now;
        }
        self.state
    }

    /// Most frequent non-unknown entry in the window and its vote count.
    /// Ties break toward red (fail-safe for enforcement).
    fn dominant_observation(&self) -> Option<(SignalState, usize)> {
        let mut best: Option<(SignalState, usize)> = None;
        for candidate in [SignalState::Red, SignalState::Yellow, SignalState::Green] {
            let votes = self.history.iter().filter(|&&s| s == candidate).count();
            if votes > 0 && best.map_or(true, |(_, b)| votes > b) {
                best = Some((candidate, votes));
            }
        }
        best
    }

    /// Record that a vehicle was observed stationary at normalized ground
    /// coordinates while this signal was red. Stamps the cell with weight
    /// 1.0 and its 8 neighbors with 0.5.
    pub fn record_stop(&mut self, norm_x: f32, norm_y: f32) {
        let (gx, gy) = grid_cell(norm_x, norm_y);
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let nx = gx as i32 + dx;
                let ny = gy as i32 + dy;
                if (0..GRID_SIZE as i32).contains(&nx) && (0..GRID_SIZE as i32).contains(&ny) {
                    let weight = if dx == 0 && dy == 0 { 1.0 } else { 0.5 };
                    self.heatmap[ny as usize * GRID_SIZE + nx as usize] += weight;
                }
            }
        }
    }

    pub fn association_score(&self, norm_x: f32, norm_y: f32) -> f32 {
        let (gx, gy) = grid_cell(norm_x, norm_y);
        self.heatmap[gy * GRID_SIZE + gx]
    }

    /// Is this ground position in a lane controlled by the signal,
    /// according to the learned stop pattern?
    pub fn is_associated(&self, norm_x: f32, norm_y: f32) -> bool {
        self.association_score(norm_x, norm_y) >= ASSOCIATION_THRESHOLD
    }
}

fn grid_cell(norm_x: f32, norm_y: f32) -> (usize, usize) {
    let gx = ((norm_x * GRID_SIZE as f32) as i32).clamp(0, GRID_SIZE as i32 - 1) as usize;
    let gy = ((norm_y * GRID_SIZE as f32) as i32).clamp(0, GRID_SIZE as i32 - 1) as usize;
    (gx, gy)
}
